use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::store::Store;
use crate::security::jwt::{JwtConfig, JwtManager};
use crate::security::webhook::{StaticKeyAuthenticator, WebhookAuthenticator};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared by every handler as `State<Arc<AppState>>`.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub webhook_auth: Arc<dyn WebhookAuthenticator>,
    pub jwt: JwtManager,
    /// Client for the certificate image service.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn Store>) -> Result<Self> {
        let secret = if config.auth.jwt_secret.is_empty() {
            log::warn!("auth.jwt_secret is unset; using an ephemeral secret for this process");
            format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
        } else {
            config.auth.jwt_secret.clone()
        };
        let jwt = JwtManager::new(
            JwtConfig {
                token_ttl_minutes: config.auth.token_ttl_minutes,
                ..JwtConfig::default()
            },
            &secret,
        )?;
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        let webhook_auth = Arc::new(StaticKeyAuthenticator::new(config.chatfuel.key.clone()));

        Ok(Self {
            config,
            store,
            webhook_auth,
            jwt,
            http,
        })
    }

    pub fn with_webhook_authenticator(mut self, auth: Arc<dyn WebhookAuthenticator>) -> Self {
        self.webhook_auth = auth;
        self
    }
}
