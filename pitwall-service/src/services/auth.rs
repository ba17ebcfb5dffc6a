//! Auth orchestration: OAuth exchange, driver upsert, token mint.

use chrono::{Duration as ChronoDuration, Utc};
use eyre::Context as _;
use pitwall_iracing::{IracingService, UpstreamError};
use secrecy::SecretString;
use tracing::instrument;

use pitwall_types::{DriverId, driver::Driver};

use crate::services::{store::RecordStoreService, token::TokenService};

/// Error kinds of the auth flows.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The upstream call failed; [`UpstreamError::Unauthorized`] keeps its
    /// identity through this wrapper.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// Storage or token-mint failure.
    #[error(transparent)]
    Internal(#[from] eyre::Error),
}

/// A freshly established session, as returned to the client.
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// The session token.
    pub token: String,
    /// Expiry of the session token.
    pub expires_at: chrono::DateTime<Utc>,
    /// The authenticated driver.
    pub driver_id: DriverId,
    /// The driver's display name.
    pub driver_name: String,
}

/// Handles OAuth callback and refresh.
#[derive(Clone)]
pub struct AuthService {
    upstream: IracingService,
    store: RecordStoreService,
    tokens: TokenService,
}

impl AuthService {
    /// Creates the auth service.
    pub fn new(upstream: IracingService, store: RecordStoreService, tokens: TokenService) -> Self {
        Self {
            upstream,
            store,
            tokens,
        }
    }

    /// Completes the authorization-code + PKCE flow.
    ///
    /// Exchanges the code, loads the upstream identity, upserts the driver
    /// record (insert with `login_count = 1` on first login, otherwise
    /// increments the count), and mints a session token carrying the
    /// upstream credentials.
    #[instrument(level = "info", skip_all)]
    pub async fn handle_callback(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<AuthSession, AuthError> {
        let upstream_tokens = self
            .upstream
            .exchange_authorization_code(code, code_verifier, redirect_uri)
            .await?;
        let access = SecretString::from(upstream_tokens.access_token.clone());
        let user = self.upstream.user_info(&access).await?;
        tracing::info!("authenticated driver {}", user.cust_id);

        let now = Utc::now();
        let entitlements = match self
            .store
            .get_driver(user.cust_id)
            .await
            .context("while loading driver")?
        {
            Some(driver) => {
                self.store
                    .record_login(user.cust_id, now)
                    .await
                    .context("while recording login")?;
                driver.entitlements
            }
            None => {
                tracing::info!("first login of driver {}", user.cust_id);
                let driver = Driver {
                    driver_id: user.cust_id,
                    driver_name: user.display_name.clone(),
                    first_login: now,
                    last_login: now,
                    login_count: 1,
                    ingestion_blocked_until: None,
                    entitlements: vec![],
                };
                self.store
                    .insert_driver(&driver)
                    .await
                    .context("while inserting driver")?;
                vec![]
            }
        };

        let upstream_expiry = now + ChronoDuration::seconds(upstream_tokens.expires_in);
        let minted = self
            .tokens
            .create_token(
                user.cust_id,
                &user.display_name,
                &entitlements,
                &upstream_tokens.access_token,
                &upstream_tokens.refresh_token,
                upstream_expiry,
            )
            .await
            .context("while minting session token")?;

        Ok(AuthSession {
            token: minted.token,
            expires_at: minted.expires_at,
            driver_id: user.cust_id,
            driver_name: user.display_name,
        })
    }

    /// Exchanges the stored upstream refresh token for fresh credentials and
    /// mints a new session token preserving identity and entitlements.
    #[instrument(level = "info", skip_all, fields(%driver_id))]
    pub async fn handle_refresh(
        &self,
        driver_id: DriverId,
        driver_name: &str,
        entitlements: &[String],
        upstream_refresh: &SecretString,
    ) -> Result<AuthSession, AuthError> {
        let upstream_tokens = self.upstream.refresh_token(upstream_refresh).await?;
        let now = Utc::now();
        let upstream_expiry = now + ChronoDuration::seconds(upstream_tokens.expires_in);
        let minted = self
            .tokens
            .create_token(
                driver_id,
                driver_name,
                entitlements,
                &upstream_tokens.access_token,
                &upstream_tokens.refresh_token,
                upstream_expiry,
            )
            .await
            .context("while minting session token")?;
        Ok(AuthSession {
            token: minted.token,
            expires_at: minted.expires_at,
            driver_id,
            driver_name: driver_name.to_owned(),
        })
    }
}
