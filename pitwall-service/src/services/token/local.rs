//! Process-local [`KeyProvider`] backed by a PEM signing key and a 32-byte
//! master key.
//!
//! Data keys are random 32-byte AES-256 keys wrapped with AES-256-GCM under
//! the master key; the wrapping nonce is prefixed to the ciphertext.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead as _, KeyInit as _},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use eyre::Context as _;
use p256::{
    ecdsa::{Signature, SigningKey, VerifyingKey, signature::Signer as _},
    pkcs8::DecodePrivateKey as _,
};
use rand::RngCore as _;
use secrecy::{ExposeSecret as _, SecretString};
use zeroize::Zeroizing;

use crate::{
    config::Environment,
    services::token::{DataKey, KeyProvider},
};

/// Length of the GCM nonce prefixed to wrapped data keys.
const WRAP_NONCE_LEN: usize = 12;

/// Key provider holding both keys in process memory.
pub struct LocalKeyProvider {
    signing_key: SigningKey,
    master_cipher: Aes256Gcm,
}

impl LocalKeyProvider {
    /// Loads the ECDSA P-256 signing key from a PKCS#8 PEM string and the
    /// master key from base64.
    pub fn from_pem(pem: &str, master_key_b64: &SecretString) -> eyre::Result<Self> {
        let signing_key =
            SigningKey::from_pkcs8_pem(pem).context("while parsing signing key PEM")?;
        let master_key = Zeroizing::new(
            STANDARD
                .decode(master_key_b64.expose_secret())
                .context("while decoding master key")?,
        );
        let master_cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|_| eyre::eyre!("master key must be 32 bytes"))?;
        Ok(Self {
            signing_key,
            master_cipher,
        })
    }

    /// Generates a random key pair and master key. Panics outside the dev
    /// environment.
    pub fn generate(environment: Environment) -> Self {
        environment.assert_is_dev();
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let mut master_key = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(master_key.as_mut());
        let master_cipher =
            Aes256Gcm::new_from_slice(master_key.as_ref()).expect("32 bytes is a valid key");
        Self {
            signing_key,
            master_cipher,
        }
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    async fn generate_data_key(&self) -> eyre::Result<DataKey> {
        let mut plaintext = Zeroizing::new(vec![0u8; 32]);
        rand::thread_rng().fill_bytes(&mut plaintext);

        let mut nonce = [0u8; WRAP_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let wrapped = self
            .master_cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| eyre::eyre!("could not wrap data key"))?;

        let mut encrypted = Vec::with_capacity(WRAP_NONCE_LEN + wrapped.len());
        encrypted.extend_from_slice(&nonce);
        encrypted.extend_from_slice(&wrapped);
        Ok(DataKey {
            plaintext,
            encrypted,
        })
    }

    async fn decrypt_data_key(&self, encrypted: &[u8]) -> eyre::Result<Zeroizing<Vec<u8>>> {
        if encrypted.len() <= WRAP_NONCE_LEN {
            eyre::bail!("wrapped data key too short");
        }
        let (nonce, wrapped) = encrypted.split_at(WRAP_NONCE_LEN);
        let plaintext = self
            .master_cipher
            .decrypt(Nonce::from_slice(nonce), wrapped)
            .map_err(|_| eyre::eyre!("could not unwrap data key"))?;
        Ok(Zeroizing::new(plaintext))
    }

    async fn sign_es256(&self, message: &[u8]) -> eyre::Result<Vec<u8>> {
        let signature: Signature = self.signing_key.sign(message);
        Ok(signature.to_bytes().to_vec())
    }

    async fn verifying_key(&self) -> eyre::Result<VerifyingKey> {
        Ok(*self.signing_key.verifying_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn data_key_round_trips() -> eyre::Result<()> {
        let provider = LocalKeyProvider::generate(Environment::Dev);
        let data_key = provider.generate_data_key().await?;
        let decrypted = provider.decrypt_data_key(&data_key.encrypted).await?;
        assert_eq!(*decrypted, *data_key.plaintext);
        Ok(())
    }

    #[tokio::test]
    async fn tampered_wrapped_key_fails() -> eyre::Result<()> {
        let provider = LocalKeyProvider::generate(Environment::Dev);
        let mut data_key = provider.generate_data_key().await?;
        let last = data_key.encrypted.len() - 1;
        data_key.encrypted[last] ^= 0x01;
        assert!(provider.decrypt_data_key(&data_key.encrypted).await.is_err());
        Ok(())
    }
}
