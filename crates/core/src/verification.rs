use crate::models::Purchase;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as Base64Engine;
use base64::Engine;
use ed25519_dalek::{PublicKey, Signature};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationResult {
    Success,
    /// The verifier ran and rejected the purchase.
    Failed,
    /// Verification could not complete; callers may retry later.
    Error,
}

#[async_trait]
pub trait PurchaseVerifier: Send + Sync {
    async fn verify(&self, purchase: &Purchase) -> VerificationResult;
}

/// Accepts every purchase. Used when no verifier is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSuccessVerifier;

#[async_trait]
impl PurchaseVerifier for AlwaysSuccessVerifier {
    async fn verify(&self, _purchase: &Purchase) -> VerificationResult {
        VerificationResult::Success
    }
}

/// Checks a base64 Ed25519 signature over the purchase's raw payload.
#[derive(Debug, Clone)]
pub struct Ed25519PurchaseVerifier {
    key: PublicKey,
}

impl Ed25519PurchaseVerifier {
    pub fn new(key: PublicKey) -> Self {
        Self { key }
    }

    /// Builds a verifier from a base64 encoded 32 byte public key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Base64Engine
            .decode(encoded.trim())
            .context("invalid verification key encoding")?;
        let key = PublicKey::from_bytes(&decoded)
            .map_err(|e| anyhow!("invalid verification key: {e}"))?;
        Ok(Self { key })
    }

    fn parse_signature(encoded: &str) -> Result<Signature> {
        let decoded = Base64Engine
            .decode(encoded)
            .context("invalid purchase signature encoding")?;
        let bytes: [u8; 64] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("invalid signature length"))?;
        let signature =
            Signature::from_bytes(&bytes).context("failed to parse purchase signature")?;
        Ok(signature)
    }
}

#[async_trait]
impl PurchaseVerifier for Ed25519PurchaseVerifier {
    async fn verify(&self, purchase: &Purchase) -> VerificationResult {
        let (Some(data), Some(encoded)) = (purchase.original_json(), purchase.signature()) else {
            tracing::warn!(sku = %purchase.sku(), "purchase has no signed payload");
            return VerificationResult::Failed;
        };
        let signature = match Self::parse_signature(encoded) {
            Ok(signature) => signature,
            Err(e) => {
                tracing::error!(sku = %purchase.sku(), error = %e, "unreadable purchase signature");
                return VerificationResult::Error;
            }
        };
        if self.key.verify_strict(data.as_bytes(), &signature).is_ok() {
            VerificationResult::Success
        } else {
            VerificationResult::Failed
        }
    }
}
