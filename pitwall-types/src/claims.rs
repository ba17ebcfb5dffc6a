//! Claim types carried by the session token.
//!
//! The outer token is an ES256-signed JWT. Its claim set holds the
//! non-sensitive session claims in the clear plus an [`EncryptedClaims`]
//! block whose fields are base64url of raw bytes. Any structure of the
//! sensitive claims exists only inside the encrypted blob, so the token body
//! reveals nothing about them by shape.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DriverId;

/// The registered + custom claims of the outer session token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Issuer.
    pub iss: String,
    /// Subject (stringified driver id).
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    /// Not-before, unix seconds.
    pub nbf: i64,
    /// Session id, fresh per token.
    pub sid: Uuid,
    /// Upstream driver id.
    pub ir_uid: DriverId,
    /// Upstream driver display name.
    pub ir_name: String,
    /// Entitlement strings; omitted from the wire when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ent: Vec<String>,
    /// The envelope-encrypted sensitive claims.
    pub encrypted: EncryptedClaims,
}

/// The opaque encrypted block embedded in the claim set.
///
/// All three fields are base64url (unpadded) of raw bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedClaims {
    /// AES-256-GCM ciphertext of the serialized [`SensitiveClaims`].
    pub enc: String,
    /// The data key, encrypted by the key provider.
    pub key: String,
    /// The 12-byte GCM nonce.
    pub nonce: String,
}

/// The sensitive claims, visible only after decryption.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveClaims {
    /// Upstream OAuth access token.
    pub access_token: String,
    /// Upstream OAuth refresh token.
    pub refresh_token: String,
    /// Expiry of the upstream access token.
    pub expiry: DateTime<Utc>,
}

impl fmt::Debug for SensitiveClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensitiveClaims")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}
