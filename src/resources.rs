// QuickBooks resource operations
// Fixed read/query/create templates over the authenticated client

use reqwest::Method;
use serde_json::{Map, Value};

use crate::config::QUERY_MAX_RESULTS_LIMIT;
use crate::error::UpstreamError;
use crate::http_client::QuickBooksClient;

/// Default MAXRESULTS for list queries
pub const DEFAULT_MAX_RESULTS: u32 = 100;

/// Accounting entities exposed by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    CompanyInfo,
    Customer,
    Invoice,
    Payment,
    Vendor,
    Bill,
    BillPayment,
    Account,
}

impl Entity {
    /// Entity name as used in queries and response envelopes
    pub fn name(self) -> &'static str {
        match self {
            Entity::CompanyInfo => "CompanyInfo",
            Entity::Customer => "Customer",
            Entity::Invoice => "Invoice",
            Entity::Payment => "Payment",
            Entity::Vendor => "Vendor",
            Entity::Bill => "Bill",
            Entity::BillPayment => "BillPayment",
            Entity::Account => "Account",
        }
    }

    /// URL path segment for direct reads and creates
    pub fn resource(self) -> &'static str {
        match self {
            Entity::CompanyInfo => "companyinfo",
            Entity::Customer => "customer",
            Entity::Invoice => "invoice",
            Entity::Payment => "payment",
            Entity::Vendor => "vendor",
            Entity::Bill => "bill",
            Entity::BillPayment => "billpayment",
            Entity::Account => "account",
        }
    }
}

/// `SELECT * FROM <Entity> MAXRESULTS <n>`, with `n` clamped to 1..=1000
pub fn select_all(entity: Entity, max_results: u32) -> String {
    let n = max_results.clamp(1, QUERY_MAX_RESULTS_LIMIT);
    format!("SELECT * FROM {} MAXRESULTS {}", entity.name(), n)
}

/// QuickBooks entity ids are numeric strings
pub fn is_entity_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 32 && id.bytes().all(|b| b.is_ascii_digit())
}

/// Pull `<Entity>` out of a response envelope, `{}` when absent
fn unwrap_entity(mut response: Value, entity: Entity) -> Value {
    response
        .get_mut(entity.name())
        .map(Value::take)
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// Pull `QueryResponse.<Entity>` out of a query response, `[]` when absent
fn unwrap_query(mut response: Value, entity: Entity) -> Vec<Value> {
    match response
        .get_mut("QueryResponse")
        .and_then(|q| q.get_mut(entity.name()))
        .map(Value::take)
    {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

impl QuickBooksClient {
    async fn company_path(&self) -> Result<String, UpstreamError> {
        let tenant_id = self
            .auth_manager()
            .tenant_id()
            .await
            .ok_or(UpstreamError::Unauthenticated)?;
        Ok(format!("/v3/company/{}", tenant_id))
    }

    /// List entities via the query endpoint
    pub async fn query(
        &self,
        entity: Entity,
        max_results: u32,
    ) -> Result<Vec<Value>, UpstreamError> {
        let path = format!("{}/query", self.company_path().await?);
        let query = select_all(entity, max_results);

        tracing::debug!(entity = entity.name(), query = %query, "Querying QuickBooks");

        let response = self
            .call(Method::GET, &path, None, &[("query", query.as_str())])
            .await?;
        Ok(unwrap_query(response, entity))
    }

    /// Read one entity by id
    pub async fn get(&self, entity: Entity, id: &str) -> Result<Value, UpstreamError> {
        let path = format!("{}/{}/{}", self.company_path().await?, entity.resource(), id);
        let response = self.call(Method::GET, &path, None, &[]).await?;
        Ok(unwrap_entity(response, entity))
    }

    /// Create an entity
    pub async fn create(&self, entity: Entity, body: &Value) -> Result<Value, UpstreamError> {
        let path = format!("{}/{}", self.company_path().await?, entity.resource());
        let response = self.call(Method::POST, &path, Some(body), &[]).await?;
        Ok(unwrap_entity(response, entity))
    }

    /// Company information for the connected realm
    pub async fn company_info(&self) -> Result<Value, UpstreamError> {
        let tenant_id = self
            .auth_manager()
            .tenant_id()
            .await
            .ok_or(UpstreamError::Unauthenticated)?;
        self.get(Entity::CompanyInfo, &tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_all_template() {
        assert_eq!(
            select_all(Entity::Customer, DEFAULT_MAX_RESULTS),
            "SELECT * FROM Customer MAXRESULTS 100"
        );
        assert_eq!(
            select_all(Entity::BillPayment, 25),
            "SELECT * FROM BillPayment MAXRESULTS 25"
        );
    }

    #[test]
    fn test_select_all_clamps_max_results() {
        assert_eq!(
            select_all(Entity::Invoice, 0),
            "SELECT * FROM Invoice MAXRESULTS 1"
        );
        assert_eq!(
            select_all(Entity::Invoice, 50_000),
            "SELECT * FROM Invoice MAXRESULTS 1000"
        );
    }

    #[test]
    fn test_entity_names() {
        assert_eq!(Entity::BillPayment.name(), "BillPayment");
        assert_eq!(Entity::BillPayment.resource(), "billpayment");
        assert_eq!(Entity::CompanyInfo.resource(), "companyinfo");
    }

    #[test]
    fn test_is_entity_id() {
        assert!(is_entity_id("42"));
        assert!(is_entity_id("9341452980386843"));
        assert!(!is_entity_id(""));
        assert!(!is_entity_id("../../999/customer/1"));
        assert!(!is_entity_id("1?minorversion=75"));
        assert!(!is_entity_id("1%2F2"));
        assert!(!is_entity_id(&"1".repeat(33)));
    }

    #[test]
    fn test_unwrap_query() {
        let response = json!({
            "QueryResponse": {
                "Vendor": [{"Id": "1"}, {"Id": "2"}],
                "maxResults": 2
            },
            "time": "2024-01-01T00:00:00.000-08:00"
        });
        let vendors = unwrap_query(response, Entity::Vendor);
        assert_eq!(vendors.len(), 2);
        assert_eq!(vendors[1]["Id"], "2");
    }

    #[test]
    fn test_unwrap_query_empty_result() {
        // QuickBooks omits the entity key when nothing matches
        let response = json!({"QueryResponse": {}, "time": "2024-01-01T00:00:00.000-08:00"});
        assert!(unwrap_query(response, Entity::Bill).is_empty());
        assert!(unwrap_query(json!({}), Entity::Bill).is_empty());
    }

    #[test]
    fn test_unwrap_entity() {
        let response = json!({"Invoice": {"Id": "9"}, "time": "now"});
        assert_eq!(unwrap_entity(response, Entity::Invoice), json!({"Id": "9"}));
        assert_eq!(unwrap_entity(json!({"time": "now"}), Entity::Invoice), json!({}));
    }
}
