use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::error::{ConnectionError, GatewayError, ShipmentError, WalletError};
use crate::gateway::{LedgerGateway, PendingTransaction};
use crate::models::{
    Identity, LifecycleAction, PendingWrite, RawShipment, ShipmentReceipt, ShipmentRecord,
    ShipmentStatus, ShipmentTerms, TransactionReceipt, WriteCheck,
};
use crate::session::SessionStore;
use crate::units::{self, DEFAULT_PRECISION};

/// Gas ceiling attached to lifecycle transitions.
pub const DEFAULT_GAS_LIMIT: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub precision: u32,
    pub gas_limit: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }
}

/// A new shipment as entered by the user, before conversion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewShipment {
    pub receiver: String,
    pub pickup_time: String,
    pub distance: u64,
    pub price: String,
}

/// Translates lifecycle intents into ledger calls and normalizes what the
/// ledger returns. Local state is only ever refreshed from ledger reads.
pub struct ShipmentOrchestrator {
    connection: Arc<ConnectionManager>,
    gateway: LedgerGateway,
    settings: OrchestratorSettings,
    write_lanes: Mutex<HashMap<Identity, Arc<Mutex<()>>>>,
}

impl ShipmentOrchestrator {
    pub fn new(connection: Arc<ConnectionManager>, gateway: LedgerGateway, settings: OrchestratorSettings) -> Self {
        Self {
            connection,
            gateway,
            settings,
            write_lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn app_name(&self) -> String {
        self.connection.session().app_name()
    }

    pub fn session(&self) -> &SessionStore {
        self.connection.session()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.connection.current_identity()
    }

    /// Creates a shipment paid with its price. The per-sender index is
    /// located on the ledger after confirmation.
    pub async fn create_shipment(&self, shipment: &NewShipment) -> Result<ShipmentReceipt, ShipmentError> {
        let receiver = Identity::parse(&shipment.receiver)?;
        let pickup_time = units::to_ledger_timestamp(&shipment.pickup_time)?;
        let price = units::to_ledger_amount(&shipment.price, self.settings.precision)?;

        let signer = self.connection.ensure_signer().await?;
        let sender = signer.identity().clone();
        let writer = self.gateway.with_signer(signer);
        let terms = ShipmentTerms {
            receiver: receiver.clone(),
            pickup_time,
            distance: shipment.distance,
            price: units::from_ledger_amount(price, self.settings.precision),
        };

        // Held until the create is mined, so the next create from this
        // identity reads a count that already includes it.
        let lane = self.write_lane(&sender).await;
        let _turn = lane.lock().await;

        let first_free = self
            .gateway
            .query_only()
            .get_shipments_count(&sender)
            .await
            .map_err(|e| ledger_failure("createShipment", e))?;

        let pending = writer
            .create_shipment(&receiver, pickup_time, shipment.distance, price)
            .await
            .map_err(|e| creation_failure(ledger_failure("createShipment", e)))?;

        let write = PendingWrite {
            tx_hash: pending.tx_hash().to_string(),
            sender: sender.clone(),
            index: first_free,
            expected_status: ShipmentStatus::Pending,
            terms: Some(terms.clone()),
        };
        let transaction = self
            .confirm_write("createShipment", pending, write)
            .await
            .map_err(creation_failure)?;

        let index = match self.locate_created(&sender, first_free, &terms).await {
            Ok(Some((index, _))) => index,
            Ok(None) => {
                warn!(tx_hash = %transaction.tx_hash, "confirmed shipment not found by its terms");
                first_free
            }
            Err(e) => {
                warn!(tx_hash = %transaction.tx_hash, error = %e, "failed to locate confirmed shipment");
                first_free
            }
        };

        Ok(ShipmentReceipt {
            transaction,
            sender,
            index,
        })
    }

    /// Moves the connected sender's shipment `index` to in-transit.
    pub async fn start_shipment(&self, receiver: &str, index: u64) -> Result<TransactionReceipt, ShipmentError> {
        self.transition(LifecycleAction::Start, receiver, index).await
    }

    /// Marks the shipment delivered. The ledger releases payment in the same
    /// transaction; re-read the shipment to observe it.
    pub async fn complete_shipment(&self, receiver: &str, index: u64) -> Result<TransactionReceipt, ShipmentError> {
        self.transition(LifecycleAction::Complete, receiver, index).await
    }

    /// Shipment `index` of the connected identity.
    pub async fn get_shipment(&self, index: u64) -> Result<ShipmentRecord, ShipmentError> {
        let sender = self
            .current_identity()
            .ok_or(ConnectionError::NotConnected)?;

        let raw = self
            .gateway
            .query_only()
            .get_shipment(&sender, index)
            .await
            .map_err(|e| ledger_failure("getShipment", e))?;

        normalize_shipment(raw, self.settings.precision)
    }

    /// Every shipment on the ledger, freshly read on each call.
    pub async fn get_all_shipment(&self) -> Result<Vec<ShipmentRecord>, ShipmentError> {
        let shipments = self
            .gateway
            .query_only()
            .get_all_transactions()
            .await
            .map_err(|e| ledger_failure("getAllTransactions", e))?;

        shipments
            .into_iter()
            .map(|raw| normalize_shipment(raw, self.settings.precision))
            .collect()
    }

    /// Count for `identity`, or for the connected identity when `None`.
    pub async fn get_shipments_count(&self, identity: Option<&Identity>) -> Result<u64, ShipmentError> {
        let identity = match identity {
            Some(identity) => identity.clone(),
            None => self
                .current_identity()
                .ok_or(ConnectionError::NotConnected)?,
        };

        let count = self
            .gateway
            .query_only()
            .get_shipments_count(&identity)
            .await
            .map_err(|e| ledger_failure("getShipmentsCount", e))?;

        self.session().set_shipment_count(&identity, count);
        Ok(count)
    }

    /// Re-reads the connected identity's count into the session store.
    pub async fn refresh_session(&self) -> Result<Option<u64>, ShipmentError> {
        if self.current_identity().is_none() {
            return Ok(None);
        }
        self.get_shipments_count(None).await.map(Some)
    }

    /// Resolves a write that timed out by reading the shipment it targeted.
    ///
    /// A create is recognized by its submitted terms at or after its earliest
    /// possible index; another create with identical terms is indistinguishable.
    pub async fn recheck(&self, write: &PendingWrite) -> Result<WriteCheck, ShipmentError> {
        if let Some(terms) = &write.terms {
            return match self.locate_created(&write.sender, write.index, terms).await? {
                Some((index, record)) => {
                    info!(tx_hash = %write.tx_hash, index, "unconfirmed create observed on ledger");
                    Ok(WriteCheck::LikelySucceeded { index, record })
                }
                None => Ok(WriteCheck::StillUnknown),
            };
        }

        let raw = match self
            .gateway
            .query_only()
            .get_shipment(&write.sender, write.index)
            .await
        {
            Ok(raw) => raw,
            // The contract reverts on an index it has not assigned yet.
            Err(GatewayError::ContractReverted { .. }) => return Ok(WriteCheck::StillUnknown),
            Err(e) => return Err(ledger_failure("recheck", e)),
        };

        let record = normalize_shipment(raw, self.settings.precision)?;
        if record.status >= write.expected_status {
            info!(tx_hash = %write.tx_hash, status = %record.status, "unconfirmed write observed on ledger");
            Ok(WriteCheck::LikelySucceeded {
                index: write.index,
                record,
            })
        } else {
            Ok(WriteCheck::StillUnknown)
        }
    }

    async fn transition(
        &self,
        action: LifecycleAction,
        receiver: &str,
        index: u64,
    ) -> Result<TransactionReceipt, ShipmentError> {
        let (operation, expected_status) = match action {
            LifecycleAction::Start => ("startShipment", ShipmentStatus::InTransit),
            LifecycleAction::Complete => ("completeShipment", ShipmentStatus::Delivered),
        };

        let receiver = Identity::parse(receiver)?;
        let signer = self.connection.ensure_signer().await?;
        let sender = signer.identity().clone();
        let writer = self.gateway.with_signer(signer);
        let gas_limit = self.settings.gas_limit;

        let pending = {
            let lane = self.write_lane(&sender).await;
            let _turn = lane.lock().await;

            let submitted = match action {
                LifecycleAction::Start => writer.start_shipment(&sender, &receiver, index, gas_limit).await,
                LifecycleAction::Complete => {
                    writer
                        .complete_shipment(&sender, &receiver, index, gas_limit)
                        .await
                }
            };
            submitted.map_err(|e| ledger_failure(operation, e))?
        };

        let write = PendingWrite {
            tx_hash: pending.tx_hash().to_string(),
            sender,
            index,
            expected_status,
            terms: None,
        };
        self.confirm_write(operation, pending, write).await
    }

    async fn confirm_write(
        &self,
        operation: &'static str,
        pending: PendingTransaction,
        write: PendingWrite,
    ) -> Result<TransactionReceipt, ShipmentError> {
        match pending.confirm().await {
            Ok(receipt) => {
                info!(
                    operation,
                    tx_hash = %receipt.tx_hash,
                    block = ?receipt.block_number,
                    "transaction confirmed"
                );
                Ok(receipt)
            }
            Err(GatewayError::Timeout { waited, .. }) => {
                warn!(operation, tx_hash = %write.tx_hash, ?waited, "confirmation timed out");
                Err(ShipmentError::ConfirmationTimedOut(write))
            }
            Err(e) => Err(ledger_failure(operation, e)),
        }
    }

    /// Writes from one identity are serialized so nonces are never handed
    /// out twice. Lanes nobody holds are dropped.
    async fn write_lane(&self, identity: &Identity) -> Arc<Mutex<()>> {
        let mut lanes = self.write_lanes.lock().await;
        prune_idle_lanes(&mut lanes);
        lanes.entry(identity.clone()).or_default().clone()
    }

    /// First shipment of `sender` at or after `from` matching `terms`.
    /// Refreshes the session count on the way.
    async fn locate_created(
        &self,
        sender: &Identity,
        from: u64,
        terms: &ShipmentTerms,
    ) -> Result<Option<(u64, ShipmentRecord)>, ShipmentError> {
        let reader = self.gateway.query_only();
        let count = reader
            .get_shipments_count(sender)
            .await
            .map_err(|e| ledger_failure("getShipmentsCount", e))?;
        self.session().set_shipment_count(sender, count);

        for index in from..count {
            let raw = reader
                .get_shipment(sender, index)
                .await
                .map_err(|e| ledger_failure("getShipment", e))?;
            let record = normalize_shipment(raw, self.settings.precision)?;
            if terms.matches(&record) {
                return Ok(Some((index, record)));
            }
        }
        Ok(None)
    }
}

fn prune_idle_lanes(lanes: &mut HashMap<Identity, Arc<Mutex<()>>>) {
    lanes.retain(|_, lane| Arc::strong_count(lane) > 1);
}

/// Converts a ledger-native shipment into its presentation form.
pub fn normalize_shipment(raw: RawShipment, precision: u32) -> Result<ShipmentRecord, ShipmentError> {
    let status = u8::try_from(raw.status)
        .ok()
        .and_then(ShipmentStatus::from_ledger)
        .ok_or_else(|| ShipmentError::InconsistentRecord(format!("unknown status {}", raw.status)))?;

    if raw.is_paid && status == ShipmentStatus::Pending {
        return Err(ShipmentError::InconsistentRecord(
            "shipment marked paid while still pending".to_string(),
        ));
    }

    let sender = Identity::parse(&raw.sender)
        .map_err(|e| ShipmentError::InconsistentRecord(e.to_string()))?;
    let receiver = Identity::parse(&raw.receiver)
        .map_err(|e| ShipmentError::InconsistentRecord(e.to_string()))?;
    let delivery_time = narrow(raw.delivery_time, "deliveryTime")?;

    Ok(ShipmentRecord {
        sender,
        receiver,
        pickup_time: narrow(raw.pickup_time, "pickupTime")?,
        delivery_time: (status == ShipmentStatus::Delivered).then_some(delivery_time),
        distance: narrow(raw.distance, "distance")?,
        price: units::from_ledger_amount(raw.price, precision),
        status,
        is_paid: raw.is_paid,
    })
}

fn narrow(value: u128, field: &str) -> Result<u64, ShipmentError> {
    u64::try_from(value)
        .map_err(|_| ShipmentError::InconsistentRecord(format!("{} {} out of range", field, value)))
}

/// Logs a ledger failure at the orchestrator boundary and types it.
fn ledger_failure(operation: &'static str, err: GatewayError) -> ShipmentError {
    warn!(operation, error = %err, "ledger operation failed");

    match err {
        GatewayError::NetworkUnreachable(message) => ShipmentError::NetworkUnreachable(message),
        GatewayError::ContractReverted { reason } => ShipmentError::ContractReverted { reason },
        GatewayError::Signing(WalletError::Rejected) => ConnectionError::UserRejected.into(),
        GatewayError::Signing(WalletError::Unauthorized(_)) => ConnectionError::NotConnected.into(),
        GatewayError::Signing(other) => ConnectionError::Wallet(other).into(),
        other => ShipmentError::Gateway(other),
    }
}

fn creation_failure(err: ShipmentError) -> ShipmentError {
    match err {
        ShipmentError::ContractReverted { reason } => ShipmentError::ShipmentCreationRejected { reason },
        other => other,
    }
}
