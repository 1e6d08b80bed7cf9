use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, WalletError};
use crate::models::Identity;
use crate::session::{ConnectionState, SessionStore};
use crate::wallet::{TransactionSigner, WalletProvider};

/// Owns the wallet session and is the only writer of the session identity.
pub struct ConnectionManager {
    provider: Option<Arc<dyn WalletProvider>>,
    session: SessionStore,
}

impl ConnectionManager {
    /// `provider` is `None` when no wallet is installed.
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, session: SessionStore) -> Self {
        if provider.is_none() {
            session.set_connection(ConnectionState::NoProvider);
        }
        Self { provider, session }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn state(&self) -> ConnectionState {
        self.session.connection()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    /// Reads accounts the wallet already authorized, without prompting.
    pub async fn probe_existing_session(&self) -> Result<ConnectionState, ConnectionError> {
        let Some(provider) = &self.provider else {
            self.session.set_connection(ConnectionState::NoProvider);
            return Ok(ConnectionState::NoProvider);
        };

        let accounts = provider.authorized_accounts().await.map_err(|e| {
            warn!(error = %e, "failed to read authorized accounts");
            ConnectionError::from(e)
        })?;

        let state = state_for_accounts(accounts);
        self.session.set_connection(state.clone());
        debug!(state = ?state, "probed existing wallet session");
        Ok(state)
    }

    /// Prompts the user to authorize an account.
    pub async fn request_connection(&self) -> Result<Identity, ConnectionError> {
        let provider = self.provider()?;

        let accounts = provider.request_accounts().await.map_err(|e| {
            warn!(error = %e, "wallet connection request failed");
            ConnectionError::from(e)
        })?;

        // An empty grant is a dismissed prompt.
        let identity = accounts
            .into_iter()
            .next()
            .ok_or(ConnectionError::UserRejected)?;

        self.session
            .set_connection(ConnectionState::Connected(identity.clone()));
        info!(identity = %identity, "wallet connected");
        Ok(identity)
    }

    /// Signing capability for the connected identity.
    pub async fn require_signer(&self) -> Result<Arc<dyn TransactionSigner>, ConnectionError> {
        let provider = self.provider()?;
        let identity = self
            .session
            .identity()
            .ok_or(ConnectionError::NotConnected)?;

        provider.signer(&identity).await.map_err(|e| match e {
            WalletError::Unauthorized(_) => ConnectionError::NotConnected,
            other => ConnectionError::from(other),
        })
    }

    /// Same as [`require_signer`](Self::require_signer), prompting for a
    /// connection first when no session is active.
    pub async fn ensure_signer(&self) -> Result<Arc<dyn TransactionSigner>, ConnectionError> {
        match self.require_signer().await {
            Err(ConnectionError::NotConnected) => {
                self.request_connection().await?;
                self.require_signer().await
            }
            other => other,
        }
    }

    pub fn disconnect(&self) {
        if self.provider.is_some() {
            self.session.set_connection(ConnectionState::Disconnected);
            info!("wallet session closed");
        }
    }

    /// Mirrors account switches reported by the wallet into the session store.
    pub fn follow_account_changes(&self) -> Option<JoinHandle<()>> {
        let provider = self.provider.as_ref()?;
        let mut changes = provider.account_changes();
        let session = self.session.clone();

        Some(tokio::spawn(async move {
            while let Some(accounts) = changes.next().await {
                let state = state_for_accounts(accounts);
                info!(state = ?state, "wallet accounts changed");
                session.set_connection(state);
            }
        }))
    }

    fn provider(&self) -> Result<&Arc<dyn WalletProvider>, ConnectionError> {
        self.provider.as_ref().ok_or_else(|| {
            self.session.set_connection(ConnectionState::NoProvider);
            ConnectionError::ProviderUnavailable
        })
    }
}

fn state_for_accounts(accounts: Vec<Identity>) -> ConnectionState {
    accounts
        .into_iter()
        .next()
        .map_or(ConnectionState::Disconnected, ConnectionState::Connected)
}
