use std::time::Duration;
use thiserror::Error;

use crate::abi::AbiError;
use crate::models::{IdentityError, PendingWrite};
use crate::units::UnitError;

/// Failures reported by a wallet provider or signer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("request rejected by the user")]
    Rejected,

    #[error("account {0} is not authorized by the wallet")]
    Unauthorized(String),

    #[error("wallet provider error: {0}")]
    Provider(String),
}

/// Failures of the wallet session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("no wallet provider detected")]
    ProviderUnavailable,

    #[error("the user declined the wallet request")]
    UserRejected,

    #[error("no wallet account is connected")]
    NotConnected,

    #[error(transparent)]
    Wallet(WalletError),
}

impl From<WalletError> for ConnectionError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Rejected => ConnectionError::UserRejected,
            other => ConnectionError::Wallet(other),
        }
    }
}

/// Failures of the remote ledger, before any domain interpretation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("ledger endpoint unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("contract reverted: {reason}")]
    ContractReverted { reason: String },

    #[error("transaction {tx_hash} not confirmed within {waited:?}")]
    Timeout { tx_hash: String, waited: Duration },

    #[error("ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unexpected ledger response: {0}")]
    Decode(String),

    #[error("contract interface mismatch: {0}")]
    Interface(#[from] AbiError),

    #[error("signing failed: {0}")]
    Signing(#[from] WalletError),
}

/// Failures surfaced by the shipment orchestrator.
#[derive(Debug, Error)]
pub enum ShipmentError {
    #[error(transparent)]
    InvalidInput(#[from] UnitError),

    #[error(transparent)]
    InvalidIdentity(#[from] IdentityError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("ledger endpoint unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("shipment creation rejected by the ledger: {reason}")]
    ShipmentCreationRejected { reason: String },

    #[error("operation rejected by the ledger: {reason}")]
    ContractReverted { reason: String },

    #[error("transaction {} was not confirmed in time; re-check the ledger before retrying", .0.tx_hash)]
    ConfirmationTimedOut(PendingWrite),

    #[error("ledger returned an inconsistent shipment: {0}")]
    InconsistentRecord(String),

    #[error(transparent)]
    Gateway(GatewayError),
}

/// What the user can do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    FixInput,
    InstallWallet,
    ConnectWallet,
    TryAgainLater,
    RejectedByLedger,
    RecheckLedger,
}

impl Remedy {
    pub fn message(self) -> &'static str {
        match self {
            Remedy::FixInput => "Check the values you entered and try again.",
            Remedy::InstallWallet => "Install a wallet to continue.",
            Remedy::ConnectWallet => "Connect your wallet to continue.",
            Remedy::TryAgainLater => "The ledger could not be reached. Try again later.",
            Remedy::RejectedByLedger => "The ledger rejected this operation.",
            Remedy::RecheckLedger => {
                "The transaction may still land. Refresh the shipment before retrying."
            }
        }
    }
}

impl ShipmentError {
    pub fn remedy(&self) -> Remedy {
        match self {
            ShipmentError::InvalidInput(_) | ShipmentError::InvalidIdentity(_) => Remedy::FixInput,
            ShipmentError::Connection(ConnectionError::ProviderUnavailable) => Remedy::InstallWallet,
            ShipmentError::Connection(_) => Remedy::ConnectWallet,
            ShipmentError::NetworkUnreachable(_) => Remedy::TryAgainLater,
            ShipmentError::ShipmentCreationRejected { .. } | ShipmentError::ContractReverted { .. } => {
                Remedy::RejectedByLedger
            }
            ShipmentError::ConfirmationTimedOut(_) => Remedy::RecheckLedger,
            ShipmentError::InconsistentRecord(_) | ShipmentError::Gateway(_) => Remedy::TryAgainLater,
        }
    }

    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ShipmentError::NetworkUnreachable(_) => true,
            ShipmentError::Connection(ConnectionError::UserRejected | ConnectionError::NotConnected) => {
                true
            }
            _ => false,
        }
    }

    /// Write that may still land, for callers that want to re-query.
    pub fn pending_write(&self) -> Option<&PendingWrite> {
        match self {
            ShipmentError::ConfirmationTimedOut(pending) => Some(pending),
            _ => None,
        }
    }
}
