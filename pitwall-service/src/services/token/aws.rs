//! AWS KMS implementation of [`KeyProvider`].
//!
//! Data keys come from `GenerateDataKey`/`Decrypt` against the configured
//! symmetric key; signatures come from `Sign` against an ECC_NIST_P256 key.
//! KMS returns DER-encoded signatures, which are converted to the raw
//! 64-byte form the token format requires.

use async_trait::async_trait;
use aws_sdk_kms::{
    primitives::Blob,
    types::{DataKeySpec, MessageType, SigningAlgorithmSpec},
};
use eyre::Context as _;
use p256::ecdsa::{Signature, VerifyingKey};
use zeroize::Zeroizing;

use crate::services::token::{DataKey, KeyProvider};

/// KMS-backed key provider.
#[derive(Debug, Clone)]
pub struct KmsKeyProvider {
    client: aws_sdk_kms::Client,
    signing_key_id: String,
    data_key_id: String,
}

impl KmsKeyProvider {
    /// Initializes a KMS key provider from a loaded AWS configuration.
    pub fn init(
        aws_config: &aws_config::SdkConfig,
        signing_key_id: impl Into<String>,
        data_key_id: impl Into<String>,
    ) -> Self {
        Self {
            client: aws_sdk_kms::Client::new(aws_config),
            signing_key_id: signing_key_id.into(),
            data_key_id: data_key_id.into(),
        }
    }
}

#[async_trait]
impl KeyProvider for KmsKeyProvider {
    async fn generate_data_key(&self) -> eyre::Result<DataKey> {
        let output = self
            .client
            .generate_data_key()
            .key_id(&self.data_key_id)
            .key_spec(DataKeySpec::Aes256)
            .send()
            .await
            .context("while generating data key via KMS")?;
        let plaintext = output
            .plaintext()
            .ok_or_else(|| eyre::eyre!("KMS returned no plaintext data key"))?
            .as_ref()
            .to_vec();
        let encrypted = output
            .ciphertext_blob()
            .ok_or_else(|| eyre::eyre!("KMS returned no encrypted data key"))?
            .as_ref()
            .to_vec();
        Ok(DataKey {
            plaintext: Zeroizing::new(plaintext),
            encrypted,
        })
    }

    async fn decrypt_data_key(&self, encrypted: &[u8]) -> eyre::Result<Zeroizing<Vec<u8>>> {
        let output = self
            .client
            .decrypt()
            .key_id(&self.data_key_id)
            .ciphertext_blob(Blob::new(encrypted))
            .send()
            .await
            .context("while decrypting data key via KMS")?;
        let plaintext = output
            .plaintext()
            .ok_or_else(|| eyre::eyre!("KMS returned no plaintext"))?
            .as_ref()
            .to_vec();
        Ok(Zeroizing::new(plaintext))
    }

    async fn sign_es256(&self, message: &[u8]) -> eyre::Result<Vec<u8>> {
        let output = self
            .client
            .sign()
            .key_id(&self.signing_key_id)
            .message(Blob::new(message))
            .message_type(MessageType::Raw)
            .signing_algorithm(SigningAlgorithmSpec::EcdsaSha256)
            .send()
            .await
            .context("while signing via KMS")?;
        let der = output
            .signature()
            .ok_or_else(|| eyre::eyre!("KMS returned no signature"))?;
        let signature =
            Signature::from_der(der.as_ref()).context("while parsing KMS DER signature")?;
        // KMS makes no low-s guarantee; normalize so RustCrypto verifiers
        // accept the signature
        let signature = signature.normalize_s().unwrap_or(signature);
        Ok(signature.to_bytes().to_vec())
    }

    async fn verifying_key(&self) -> eyre::Result<VerifyingKey> {
        let output = self
            .client
            .get_public_key()
            .key_id(&self.signing_key_id)
            .send()
            .await
            .context("while fetching public key from KMS")?;
        let spki = output
            .public_key()
            .ok_or_else(|| eyre::eyre!("KMS returned no public key"))?;
        use p256::pkcs8::DecodePublicKey as _;
        VerifyingKey::from_public_key_der(spki.as_ref())
            .context("while parsing KMS public key DER")
    }
}
