//! Session-token subsystem.
//!
//! Tokens are ES256-signed JWTs whose claim set carries the non-sensitive
//! session claims in the clear plus an envelope-encrypted block holding the
//! upstream credentials. Creation and validation go through the
//! [`KeyProvider`] seam so the cryptographic contract is identical whether
//! keys live in-process or in a remote key-management service.
//!
//! Current `KeyProvider` implementations:
//! - Local (PEM-loaded ECDSA key + 32-byte base64 master key)
//! - AWS KMS
//!
//! Validation collapses every failure into [`TokenError::Invalid`]; callers
//! must not branch on sub-reasons.

use std::{sync::Arc, time::Duration};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead as _, KeyInit as _},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use eyre::Context as _;
use p256::ecdsa::{Signature, VerifyingKey, signature::Verifier as _};
use rand::RngCore as _;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::instrument;
use uuid::Uuid;
use zeroize::Zeroizing;

use pitwall_types::{
    DriverId,
    claims::{EncryptedClaims, SensitiveClaims, SessionClaims},
};

#[cfg(feature = "aws")]
pub mod aws;
pub mod local;

/// Dynamic trait object for the key provider.
///
/// Must be `Send + Sync` to work with async contexts (e.g., Axum).
pub type KeyProviderService = Arc<dyn KeyProvider + Send + Sync>;

/// A fresh envelope data key.
pub struct DataKey {
    /// The raw 32-byte AES-256 key. Zeroized on drop.
    pub plaintext: Zeroizing<Vec<u8>>,
    /// The same key, encrypted by the provider for embedding in the token.
    pub encrypted: Vec<u8>,
}

/// Trait that key-management backends must provide.
#[async_trait]
pub trait KeyProvider {
    /// Produces a fresh 32-byte data key together with its encrypted form.
    async fn generate_data_key(&self) -> eyre::Result<DataKey>;

    /// Decrypts a data key previously produced by [`Self::generate_data_key`].
    async fn decrypt_data_key(&self, encrypted: &[u8]) -> eyre::Result<Zeroizing<Vec<u8>>>;

    /// Signs `message` with ECDSA P-256 / SHA-256, returning the raw 64-byte
    /// `r || s` signature.
    async fn sign_es256(&self, message: &[u8]) -> eyre::Result<Vec<u8>>;

    /// Returns the verifying key matching the signing key.
    async fn verifying_key(&self) -> eyre::Result<VerifyingKey>;
}

/// Error kind of [`TokenService::validate_token`].
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The token failed validation, for whatever reason.
    #[error("invalid token")]
    Invalid,
}

/// A freshly minted session token.
#[derive(Debug, Clone)]
pub struct CreatedToken {
    /// The wire form of the token.
    pub token: String,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// A fully validated session.
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    /// The non-sensitive session claims.
    pub claims: SessionClaims,
    /// The decrypted sensitive claims.
    pub sensitive: SensitiveClaims,
}

#[derive(Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    #[allow(dead_code)]
    typ: Option<String>,
}

/// Creates and validates session tokens.
#[derive(Clone)]
pub struct TokenService {
    provider: KeyProviderService,
    issuer: String,
    expiry: Duration,
    // fetched once, then cached for the lifetime of the service
    cached_verifying_key: Arc<OnceCell<VerifyingKey>>,
}

impl TokenService {
    /// Creates a token service minting tokens with the given issuer and
    /// lifetime.
    pub fn new(provider: KeyProviderService, issuer: impl Into<String>, expiry: Duration) -> Self {
        Self {
            provider,
            issuer: issuer.into(),
            expiry,
            cached_verifying_key: Arc::new(OnceCell::new()),
        }
    }

    /// Mints a signed session token carrying the driver identity and the
    /// envelope-encrypted upstream credentials.
    #[instrument(level = "debug", skip_all, fields(%driver_id))]
    pub async fn create_token(
        &self,
        driver_id: DriverId,
        driver_name: &str,
        entitlements: &[String],
        upstream_access: &str,
        upstream_refresh: &str,
        upstream_expiry: DateTime<Utc>,
    ) -> eyre::Result<CreatedToken> {
        self.create_token_at(
            Utc::now(),
            driver_id,
            driver_name,
            entitlements,
            upstream_access,
            upstream_refresh,
            upstream_expiry,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_token_at(
        &self,
        now: DateTime<Utc>,
        driver_id: DriverId,
        driver_name: &str,
        entitlements: &[String],
        upstream_access: &str,
        upstream_refresh: &str,
        upstream_expiry: DateTime<Utc>,
    ) -> eyre::Result<CreatedToken> {
        let sensitive = SensitiveClaims {
            access_token: upstream_access.to_owned(),
            refresh_token: upstream_refresh.to_owned(),
            expiry: upstream_expiry,
        };
        let sensitive_bytes =
            serde_json::to_vec(&sensitive).context("while serializing sensitive claims")?;

        let data_key = self
            .provider
            .generate_data_key()
            .await
            .context("while generating data key")?;
        let cipher = Aes256Gcm::new_from_slice(&data_key.plaintext)
            .context("while constructing cipher from data key")?;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), sensitive_bytes.as_slice())
            .map_err(|_| eyre::eyre!("could not encrypt sensitive claims"))?;

        let expires_at = now + self.expiry;
        let claims = SessionClaims {
            iss: self.issuer.clone(),
            sub: driver_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            nbf: now.timestamp(),
            sid: Uuid::new_v4(),
            ir_uid: driver_id,
            ir_name: driver_name.to_owned(),
            ent: entitlements.to_vec(),
            encrypted: EncryptedClaims {
                enc: URL_SAFE_NO_PAD.encode(&ciphertext),
                key: URL_SAFE_NO_PAD.encode(&data_key.encrypted),
                nonce: URL_SAFE_NO_PAD.encode(nonce_bytes),
            },
        };

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&claims).context("while serializing claims")?);
        let signing_input = format!("{header}.{body}");
        let signature = self
            .provider
            .sign_es256(signing_input.as_bytes())
            .await
            .context("while signing token")?;

        Ok(CreatedToken {
            token: format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)),
            expires_at,
        })
    }

    /// Validates a token string and decrypts its sensitive claims.
    ///
    /// A token that parses cleanly is guaranteed to have a valid signature,
    /// an expiry in the future, and well-formed sensitive claims.
    #[instrument(level = "debug", skip_all)]
    pub async fn validate_token(&self, token: &str) -> Result<ValidatedSession, TokenError> {
        self.validate_token_at(token, Utc::now()).await
    }

    async fn validate_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidatedSession, TokenError> {
        match self.try_validate(token, now).await {
            Ok(session) => Ok(session),
            Err(err) => {
                // the reason stays server-side on purpose
                tracing::debug!("token validation failed: {err:?}");
                Err(TokenError::Invalid)
            }
        }
    }

    async fn try_validate(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> eyre::Result<ValidatedSession> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(body_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            eyre::bail!("token does not have three segments");
        };

        let header: TokenHeader = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64)?)?;
        // pin the algorithm before touching the signature to rule out
        // downgrade attacks
        if header.alg != "ES256" {
            eyre::bail!("unexpected algorithm {}", header.alg);
        }

        let verifying_key = self
            .cached_verifying_key
            .get_or_try_init(|| self.provider.verifying_key())
            .await?;
        let signature = Signature::from_slice(&URL_SAFE_NO_PAD.decode(signature_b64)?)?;
        let signing_input = format!("{header_b64}.{body_b64}");
        verifying_key.verify(signing_input.as_bytes(), &signature)?;

        let claims: SessionClaims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(body_b64)?)?;
        if claims.exp <= now.timestamp() {
            eyre::bail!("token expired");
        }
        if claims.nbf > now.timestamp() {
            eyre::bail!("token not yet valid");
        }

        let encrypted_key = URL_SAFE_NO_PAD.decode(&claims.encrypted.key)?;
        let data_key = self.provider.decrypt_data_key(&encrypted_key).await?;
        let cipher = Aes256Gcm::new_from_slice(&data_key)
            .map_err(|_| eyre::eyre!("data key has wrong length"))?;
        let nonce = URL_SAFE_NO_PAD.decode(&claims.encrypted.nonce)?;
        if nonce.len() != 12 {
            eyre::bail!("nonce has wrong length");
        }
        let ciphertext = URL_SAFE_NO_PAD.decode(&claims.encrypted.enc)?;
        let sensitive_bytes = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| eyre::eyre!("could not decrypt sensitive claims"))?;
        let sensitive: SensitiveClaims = serde_json::from_slice(&sensitive_bytes)?;

        Ok(ValidatedSession { claims, sensitive })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::services::token::local::LocalKeyProvider;

    fn token_service() -> TokenService {
        let provider = Arc::new(LocalKeyProvider::generate(Environment::Dev));
        TokenService::new(provider, "pitwall-test", Duration::from_secs(24 * 3600))
    }

    async fn mint(service: &TokenService) -> CreatedToken {
        service
            .create_token(
                DriverId::new(4711),
                "Test Driver",
                &["beta".to_owned()],
                "upstream-access",
                "upstream-refresh",
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn round_trips_all_claims() {
        let service = token_service();
        let created = mint(&service).await;
        let session = service.validate_token(&created.token).await.unwrap();
        assert_eq!(session.claims.ir_uid, DriverId::new(4711));
        assert_eq!(session.claims.ir_name, "Test Driver");
        assert_eq!(session.claims.ent, vec!["beta".to_owned()]);
        assert_eq!(session.claims.iss, "pitwall-test");
        assert_eq!(session.sensitive.access_token, "upstream-access");
        assert_eq!(session.sensitive.refresh_token, "upstream-refresh");
    }

    #[tokio::test]
    async fn any_segment_mutation_invalidates() {
        let service = token_service();
        let created = mint(&service).await;
        let segments: Vec<&str> = created.token.split('.').collect();
        for i in 0..3 {
            let mut mutated = segments.clone();
            let mut bytes = URL_SAFE_NO_PAD.decode(mutated[i]).unwrap();
            bytes[0] ^= 0x01;
            let reencoded = URL_SAFE_NO_PAD.encode(&bytes);
            mutated[i] = &reencoded;
            let token = mutated.join(".");
            let err = service.validate_token(&token).await.unwrap_err();
            assert!(matches!(err, TokenError::Invalid));
        }
    }

    #[tokio::test]
    async fn expired_token_is_invalid() {
        let service = token_service();
        let created = mint(&service).await;
        let at = Utc::now() + chrono::Duration::hours(25);
        let err = service
            .validate_token_at(&created.token, at)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[tokio::test]
    async fn not_yet_valid_token_is_invalid() {
        let service = token_service();
        let created = mint(&service).await;
        let at = Utc::now() - chrono::Duration::hours(1);
        let err = service
            .validate_token_at(&created.token, at)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[tokio::test]
    async fn foreign_algorithm_is_rejected() {
        let service = token_service();
        let created = mint(&service).await;
        let segments: Vec<&str> = created.token.split('.').collect();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let token = format!("{header}.{}.{}", segments[1], segments[2]);
        let err = service.validate_token(&token).await.unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[tokio::test]
    async fn token_from_other_key_is_rejected() {
        let service = token_service();
        let other = token_service();
        let created = mint(&other).await;
        let err = service.validate_token(&created.token).await.unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[tokio::test]
    async fn garbage_is_invalid() {
        let service = token_service();
        for token in ["", "abc", "a.b", "a.b.c.d", "ey.ey.ey"] {
            let err = service.validate_token(token).await.unwrap_err();
            assert!(matches!(err, TokenError::Invalid));
        }
    }
}
