//! Authentication for the two audiences: the chat platform (shared query
//! key) and dashboard users (argon2 passwords, HS256 bearer tokens).

pub mod auth;
pub mod jwt;
pub mod login;
pub mod password;
pub mod webhook;

pub use auth::{require_session, AuthenticatedUser};
pub use jwt::{extract_bearer_token, Claims, IssuedToken, JwtManager};
pub use webhook::{require_webhook_key, StaticKeyAuthenticator, WebhookAuthenticator};
