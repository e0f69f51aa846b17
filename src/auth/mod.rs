// Authentication module
// Manages the OAuth token lifecycle and credential persistence

mod manager;
mod oauth;
mod state;
mod store;
mod types;

pub use manager::AuthManager;
pub use state::PendingStates;
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use types::{ConnectionStatus, CredentialSet, OAuthClient, TokenGrant, ACCOUNTING_SCOPE};
