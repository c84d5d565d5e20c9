//! Token Signing and Verification
//!
//! One Ed25519 keypair is generated per process at bootstrap. The private
//! key never leaves [`TokenManager`]; restarting the process invalidates
//! every token issued before.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use log::debug;
use prost::Message;
use rand::rngs::OsRng;
use rand::RngCore;

use super::wire::{ReadWorkflowToken, SignedToken};
use crate::error::{Error, Result};
use crate::workflow::WorkflowId;

/// Literal prefix of every read-workflow token.
pub const TOKEN_PREFIX: &str = "wf_r_";

/// Payload version written into new tokens and required when parsing.
pub const TOKEN_VERSION: &str = "v1";

/// Issues and verifies read-workflow capability tokens.
pub struct TokenManager {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    validity: Duration,
}

impl TokenManager {
    /// Generates a fresh signing keypair from the operating system RNG.
    ///
    /// Tokens created by this manager stay valid for `validity`.
    pub fn bootstrap(validity: Duration) -> Result<Self> {
        let mut secret = [0u8; SECRET_KEY_LENGTH];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| Error::Config(format!("unable to generate signing key: {}", e)))?;

        let signing_key = SigningKey::from_bytes(&secret);
        let verifying_key = signing_key.verifying_key();
        debug!("Generated token signing key {}", hex::encode(verifying_key.as_bytes()));

        Ok(Self {
            signing_key,
            verifying_key,
            validity,
        })
    }

    /// Validity window applied by [`TokenManager::create_workflow_token`].
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Hex encoding of the verifying key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    /// Creates a token granting read access to `workflow_id` for the
    /// configured validity window.
    pub fn create_workflow_token(&self, workflow_id: &WorkflowId) -> Result<String> {
        let validity = i64::try_from(self.validity.as_secs())
            .map_err(|_| Error::Config("token validity is out of range".into()))?;
        let expire_at = Utc::now().timestamp().saturating_add(validity);
        self.create_workflow_token_expiring_at(workflow_id, expire_at)
    }

    /// Creates a token for `workflow_id` that expires at the given unix second.
    pub fn create_workflow_token_expiring_at(
        &self,
        workflow_id: &WorkflowId,
        expire_at: i64,
    ) -> Result<String> {
        let payload = ReadWorkflowToken {
            version: TOKEN_VERSION.to_string(),
            workflow_id: workflow_id.to_string(),
            expire_at,
        }
        .encode_to_vec();

        let signature = self.signing_key.sign(&payload);
        let envelope = SignedToken {
            token: payload,
            signature: signature.to_bytes().to_vec(),
        }
        .encode_to_vec();

        Ok(format!("{}{}", TOKEN_PREFIX, bs58::encode(envelope).into_string()))
    }

    /// Verifies a token and returns the workflow it grants access to.
    ///
    /// The signature is checked before the payload is trusted; expiry is
    /// checked last, so a correctly signed but stale token is `TokenExpired`.
    pub fn parse_workflow_token(&self, token: &str) -> Result<WorkflowId> {
        let encoded = token
            .strip_prefix(TOKEN_PREFIX)
            .ok_or_else(|| Error::TokenMalformed(format!("missing '{}' prefix", TOKEN_PREFIX)))?;
        if encoded.is_empty() {
            return Err(Error::TokenMalformed("empty token".into()));
        }

        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| Error::TokenMalformed(e.to_string()))?;
        let envelope = SignedToken::decode(bytes.as_slice())
            .map_err(|e| Error::TokenMalformed(e.to_string()))?;

        let signature =
            Signature::from_slice(&envelope.signature).map_err(|_| Error::TokenInvalidSignature)?;
        self.verifying_key
            .verify_strict(&envelope.token, &signature)
            .map_err(|_| Error::TokenInvalidSignature)?;

        let payload = ReadWorkflowToken::decode(envelope.token.as_slice())
            .map_err(|e| Error::TokenMalformed(e.to_string()))?;
        if payload.version != TOKEN_VERSION {
            return Err(Error::TokenMalformed(format!(
                "unsupported version '{}'",
                payload.version
            )));
        }
        if Utc::now().timestamp() > payload.expire_at {
            return Err(Error::TokenExpired {
                expired_at: payload.expire_at,
            });
        }

        Ok(WorkflowId::from(payload.workflow_id))
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("public_key", &self.public_key_hex())
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}
