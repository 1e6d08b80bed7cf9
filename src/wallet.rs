//! Wallet provider seam.
//!
//! A [`WalletProvider`] owns the user's accounts and hands out
//! [`TransactionSigner`]s bound to one of them. [`KeystoreWallet`] is the
//! provider used by the binary: ed25519 keys loaded from configuration.

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use futures::stream::{self, BoxStream, StreamExt};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

use crate::error::WalletError;
use crate::models::{IDENTITY_BYTES, Identity};
use crate::rpc::{SignedTransaction, TxEnvelope};

const ACCOUNT_CHANGE_CAPACITY: usize = 16;

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Accounts the user already authorized. Never prompts.
    async fn authorized_accounts(&self) -> Result<Vec<Identity>, WalletError>;

    /// Asks the user to authorize accounts. The active account comes first.
    async fn request_accounts(&self) -> Result<Vec<Identity>, WalletError>;

    /// Emits the new account list whenever the user switches or revokes accounts.
    fn account_changes(&self) -> BoxStream<'static, Vec<Identity>>;

    async fn signer(&self, identity: &Identity) -> Result<Arc<dyn TransactionSigner>, WalletError>;
}

/// Capability to authorize ledger writes on behalf of one identity.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn identity(&self) -> &Identity;

    async fn sign(&self, envelope: &TxEnvelope) -> Result<SignedTransaction, WalletError>;
}

/// Ledger address of an ed25519 key: the last 20 bytes of its SHA-256 digest.
pub fn identity_from_public_key(public_key: &[u8; 32]) -> Identity {
    let digest = Sha256::digest(public_key);
    let mut bytes = [0u8; IDENTITY_BYTES];
    bytes.copy_from_slice(&digest[digest.len() - IDENTITY_BYTES..]);
    Identity::from_bytes(bytes)
}

pub struct KeySigner {
    identity: Identity,
    signing_key: SigningKey,
}

impl KeySigner {
    pub fn new(signing_key: SigningKey) -> Self {
        let identity = identity_from_public_key(&signing_key.verifying_key().to_bytes());
        Self {
            identity,
            signing_key,
        }
    }

    pub fn from_hex(secret_key: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(secret_key.trim().trim_start_matches("0x"))
            .map_err(|e| WalletError::Provider(format!("signing key must be hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::Provider("signing key must be 32 bytes".to_string()))?;

        Ok(Self::new(SigningKey::from_bytes(&bytes)))
    }
}

#[async_trait]
impl TransactionSigner for KeySigner {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn sign(&self, envelope: &TxEnvelope) -> Result<SignedTransaction, WalletError> {
        let digest = hex::decode(envelope.hash.trim_start_matches("0x"))
            .map_err(|e| WalletError::Provider(format!("transaction hash must be hex: {}", e)))?;

        let signature = self.signing_key.sign(&digest);
        let public_key = self.signing_key.verifying_key().to_bytes();

        Ok(SignedTransaction {
            payload: envelope.payload.clone(),
            signature: hex::encode(signature.to_bytes()),
            public_key: hex::encode(public_key),
        })
    }
}

struct KeystoreState {
    authorized: bool,
    active: usize,
}

/// Wallet over locally held keys. Accounts stay hidden until the first
/// `request_accounts`, like a browser wallet that has not yet been connected.
pub struct KeystoreWallet {
    signers: Vec<Arc<KeySigner>>,
    state: Mutex<KeystoreState>,
    changes: broadcast::Sender<Vec<Identity>>,
}

impl KeystoreWallet {
    pub fn new(signers: Vec<KeySigner>) -> Result<Self, WalletError> {
        if signers.is_empty() {
            return Err(WalletError::Provider("keystore holds no keys".to_string()));
        }

        let (changes, _) = broadcast::channel(ACCOUNT_CHANGE_CAPACITY);
        Ok(Self {
            signers: signers.into_iter().map(Arc::new).collect(),
            state: Mutex::new(KeystoreState {
                authorized: false,
                active: 0,
            }),
            changes,
        })
    }

    pub fn from_hex_keys(secret_keys: &[String]) -> Result<Self, WalletError> {
        let signers = secret_keys
            .iter()
            .map(|key| KeySigner::from_hex(key))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(signers)
    }

    /// Switches the active account and notifies subscribers.
    pub async fn select_account(&self, identity: &Identity) -> Result<(), WalletError> {
        let position = self
            .signers
            .iter()
            .position(|signer| signer.identity() == identity)
            .ok_or_else(|| WalletError::Unauthorized(identity.to_string()))?;

        let mut state = self.state.lock().await;
        state.active = position;
        if state.authorized {
            let _ = self.changes.send(self.ordered_accounts(position));
        }
        Ok(())
    }

    /// Revokes the authorization granted by `request_accounts`.
    pub async fn revoke(&self) {
        let mut state = self.state.lock().await;
        if state.authorized {
            state.authorized = false;
            let _ = self.changes.send(Vec::new());
        }
    }

    fn ordered_accounts(&self, active: usize) -> Vec<Identity> {
        let mut accounts: Vec<Identity> = self.signers.iter().map(|s| s.identity().clone()).collect();
        accounts.rotate_left(active);
        accounts
    }
}

#[async_trait]
impl WalletProvider for KeystoreWallet {
    async fn authorized_accounts(&self) -> Result<Vec<Identity>, WalletError> {
        let state = self.state.lock().await;
        if !state.authorized {
            return Ok(Vec::new());
        }
        Ok(self.ordered_accounts(state.active))
    }

    async fn request_accounts(&self) -> Result<Vec<Identity>, WalletError> {
        let mut state = self.state.lock().await;
        let accounts = self.ordered_accounts(state.active);
        if !state.authorized {
            state.authorized = true;
            let _ = self.changes.send(accounts.clone());
        }
        Ok(accounts)
    }

    fn account_changes(&self) -> BoxStream<'static, Vec<Identity>> {
        stream::unfold(self.changes.subscribe(), |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(accounts) => return Some((accounts, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    async fn signer(&self, identity: &Identity) -> Result<Arc<dyn TransactionSigner>, WalletError> {
        if !self.state.lock().await.authorized {
            return Err(WalletError::Unauthorized(identity.to_string()));
        }

        self.signers
            .iter()
            .find(|signer| signer.identity() == identity)
            .map(|signer| signer.clone() as Arc<dyn TransactionSigner>)
            .ok_or_else(|| WalletError::Unauthorized(identity.to_string()))
    }
}
