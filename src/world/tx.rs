//! # Transactions
//!
//! A [`SignedTransaction`] is the wire envelope external callers submit:
//!
//! ```text
//! { hash, namespace, personaTag, signature, nonce, address, body }
//! ```
//!
//! `hash` is the hex SHA-256 of the canonical JSON payload
//! `{namespace, personaTag, nonce, body}` and `signature` is the hex ed25519
//! signature of the same bytes, made by the key whose public half is `address`.
//! The body is kept as raw JSON until the message registry decodes it.
//!
//! Accepted transactions wait in the [`TxPool`] until the next tick swaps the
//! pool out for a proposal.

use std::any::Any;
use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::world::error::SignatureError;

/// Signed transaction envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    /// Hex SHA-256 of the signing payload.
    pub hash: String,
    /// World namespace the transaction targets.
    pub namespace: String,
    /// Persona the transaction acts for.
    #[serde(default)]
    pub persona_tag: String,
    /// Hex ed25519 signature.
    pub signature: String,
    /// Caller-chosen uniqueness value.
    pub nonce: u64,
    /// Hex ed25519 public key of the signer.
    pub address: String,
    /// Message body.
    pub body: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningPayload<'a> {
    namespace: &'a str,
    persona_tag: &'a str,
    nonce: u64,
    body: &'a Value,
}

fn signing_bytes(namespace: &str, persona_tag: &str, nonce: u64, body: &Value) -> Result<Vec<u8>, SignatureError> {
    Ok(serde_json::to_vec(&SigningPayload { namespace, persona_tag, nonce, body })?)
}

fn decode_hex(field: &'static str, text: &str) -> Result<Vec<u8>, SignatureError> {
    hex::decode(text).map_err(|source| SignatureError::Hex { field, source })
}

/// Hex-encoded public key of `key`, the address it signs as.
pub fn address_of(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

impl SignedTransaction {
    /// Builds and signs a transaction.
    pub fn sign(
        key: &SigningKey,
        namespace: impl Into<String>,
        persona_tag: impl Into<String>,
        nonce: u64,
        body: Value,
    ) -> Result<Self, SignatureError> {
        let namespace = namespace.into();
        let persona_tag = persona_tag.into();
        let payload = signing_bytes(&namespace, &persona_tag, nonce, &body)?;
        let signature: Signature = key.sign(&payload);

        Ok(Self {
            hash: hex::encode(Sha256::digest(&payload)),
            namespace,
            persona_tag,
            signature: hex::encode(signature.to_bytes()),
            nonce,
            address: address_of(key),
            body,
        })
    }

    fn payload(&self) -> Result<Vec<u8>, SignatureError> {
        signing_bytes(&self.namespace, &self.persona_tag, self.nonce, &self.body)
    }

    /// Address of the key that signed this transaction.
    pub fn signer(&self) -> &str {
        &self.address
    }

    /// Checks the hash and that `address` produced the signature.
    pub fn verify(&self, address: &str) -> Result<(), SignatureError> {
        let payload = self.payload()?;

        let expected = hex::encode(Sha256::digest(&payload));
        if expected != self.hash {
            return Err(SignatureError::HashMismatch { expected, actual: self.hash.clone() });
        }

        let key_bytes: [u8; 32] = decode_hex("address", address)?
            .try_into()
            .map_err(|_| SignatureError::InvalidAddress(address.to_string()))?;
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| SignatureError::InvalidAddress(address.to_string()))?;

        let signature_bytes = decode_hex("signature", &self.signature)?;
        let signature = Signature::from_slice(&signature_bytes).map_err(|_| SignatureError::BadSignature)?;
        key.verify(&payload, &signature).map_err(|_| SignatureError::BadSignature)
    }
}

/// A transaction together with its decoded message.
#[derive(Clone)]
pub struct TxData {
    /// Transaction hash.
    pub hash: String,
    /// Decoded message, downcast by the message registry.
    pub(crate) msg: Arc<dyn Any + Send + Sync>,
    /// Wire envelope.
    pub tx: Arc<SignedTransaction>,
}

impl std::fmt::Debug for TxData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxData").field("hash", &self.hash).field("tx", &self.tx).finish()
    }
}

/// Transactions grouped by message name, in submission order per message.
pub type TxMap = BTreeMap<String, Vec<TxData>>;

/// Pending transactions of the next tick.
#[derive(Debug, Default)]
pub struct TxPool {
    txs: TxMap,
    len: usize,
}

impl TxPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `data` under `message`.
    pub fn push(&mut self, message: &str, data: TxData) {
        self.txs.entry(message.to_string()).or_default().push(data);
        self.len += 1;
    }

    /// Number of queued transactions.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Queued transactions of `message`.
    pub fn for_message(&self, message: &str) -> &[TxData] {
        self.txs.get(message).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Empties the pool, returning its contents.
    pub fn take(&mut self) -> TxMap {
        self.len = 0;
        mem::take(&mut self.txs)
    }
}
