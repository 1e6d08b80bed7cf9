//! Single point of contact with the tracking contract.
//!
//! Reads go through [`LedgerReader`] and need no identity. Writes go through
//! [`LedgerWriter`], which signs with the supplied signer and hands back a
//! [`PendingTransaction`] as soon as the node accepts it. Values are returned
//! in ledger-native form; converting them is the caller's job.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::abi::{self, CallKind, ContractAbi};
use crate::config::Config;
use crate::error::GatewayError;
use crate::models::{Identity, RawShipment, ReceiptStatus, TransactionReceipt};
use crate::rpc::{CallRequest, HttpLedgerRpc, LedgerRpc, TransactionRequest};
use crate::wallet::TransactionSigner;

/// Field order of the contract's shipment struct when returned positionally.
const SHIPMENT_FIELDS: [&str; 8] = [
    "sender",
    "receiver",
    "pickupTime",
    "deliveryTime",
    "distance",
    "price",
    "status",
    "isPaid",
];

/// Bounds on waiting for a submitted transaction to be mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(1500),
        }
    }
}

pub struct LedgerGateway {
    rpc: Arc<dyn LedgerRpc>,
    contract_address: Identity,
    abi: ContractAbi,
    confirmation: ConfirmationPolicy,
}

impl LedgerGateway {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        contract_address: Identity,
        abi: ContractAbi,
        confirmation: ConfirmationPolicy,
    ) -> Self {
        Self {
            rpc,
            contract_address,
            abi,
            confirmation,
        }
    }

    /// Builds an HTTP gateway for the configured deployment and checks the
    /// interface schema exposes every function the tracker calls.
    pub fn from_config(config: &Config) -> Result<Self> {
        let abi = match &config.abi_path {
            Some(path) => ContractAbi::load(path)?,
            None => ContractAbi::tracking()?,
        };
        abi.validate_tracking_interface()
            .context("contract interface schema does not match the tracking contract")?;

        let rpc = HttpLedgerRpc::new(
            config.ledger_endpoint.clone(),
            config.ledger_api_key.clone(),
            config.request_timeout,
        )?;

        Ok(Self::new(
            Arc::new(rpc),
            config.contract_address.clone(),
            abi,
            config.confirmation,
        ))
    }

    pub fn query_only(&self) -> LedgerReader<'_> {
        LedgerReader { gateway: self }
    }

    pub fn with_signer(&self, signer: Arc<dyn TransactionSigner>) -> LedgerWriter<'_> {
        LedgerWriter {
            gateway: self,
            signer,
        }
    }
}

pub struct LedgerReader<'a> {
    gateway: &'a LedgerGateway,
}

impl LedgerReader<'_> {
    pub async fn get_all_transactions(&self) -> Result<Vec<RawShipment>, GatewayError> {
        match self.call(abi::GET_ALL_TRANSACTIONS, Vec::new()).await? {
            Value::Array(items) => items.into_iter().map(decode_shipment).collect(),
            other => Err(GatewayError::Decode(format!(
                "expected a shipment list, got {}",
                other
            ))),
        }
    }

    pub async fn get_shipment(&self, sender: &Identity, index: u64) -> Result<RawShipment, GatewayError> {
        let value = self
            .call(abi::GET_SHIPMENT, vec![identity_arg(sender), uint_arg(index)])
            .await?;
        decode_shipment(value)
    }

    pub async fn get_shipments_count(&self, sender: &Identity) -> Result<u64, GatewayError> {
        let value = self
            .call(abi::GET_SHIPMENTS_COUNT, vec![identity_arg(sender)])
            .await?;
        let count = decode_uint(&value)?;
        u64::try_from(count).map_err(|_| GatewayError::Decode(format!("shipment count {} out of range", count)))
    }

    async fn call(&self, function: &str, args: Vec<Value>) -> Result<Value, GatewayError> {
        self.gateway.abi.check_call(function, args.len(), CallKind::Read)?;

        let request = CallRequest {
            to: self.gateway.contract_address.to_string(),
            function: function.to_string(),
            args,
        };
        self.gateway.rpc.call(&request).await
    }
}

pub struct LedgerWriter<'a> {
    gateway: &'a LedgerGateway,
    signer: Arc<dyn TransactionSigner>,
}

impl LedgerWriter<'_> {
    pub fn identity(&self) -> &Identity {
        self.signer.identity()
    }

    /// Attaches `price` as the payment value.
    pub async fn create_shipment(
        &self,
        receiver: &Identity,
        pickup_time: u64,
        distance: u64,
        price: u128,
    ) -> Result<PendingTransaction, GatewayError> {
        let args = vec![
            identity_arg(receiver),
            uint_arg(pickup_time),
            uint_arg(distance),
            uint_arg(price),
        ];
        self.submit(abi::CREATE_SHIPMENT, args, CallKind::Payable, price, None)
            .await
    }

    pub async fn start_shipment(
        &self,
        sender: &Identity,
        receiver: &Identity,
        index: u64,
        gas_limit: u64,
    ) -> Result<PendingTransaction, GatewayError> {
        let args = vec![identity_arg(sender), identity_arg(receiver), uint_arg(index)];
        self.submit(abi::START_SHIPMENT, args, CallKind::Write, 0, Some(gas_limit))
            .await
    }

    pub async fn complete_shipment(
        &self,
        sender: &Identity,
        receiver: &Identity,
        index: u64,
        gas_limit: u64,
    ) -> Result<PendingTransaction, GatewayError> {
        let args = vec![identity_arg(sender), identity_arg(receiver), uint_arg(index)];
        self.submit(abi::COMPLETE_SHIPMENT, args, CallKind::Write, 0, Some(gas_limit))
            .await
    }

    async fn submit(
        &self,
        function: &str,
        args: Vec<Value>,
        kind: CallKind,
        value: u128,
        gas_limit: Option<u64>,
    ) -> Result<PendingTransaction, GatewayError> {
        self.gateway.abi.check_call(function, args.len(), kind)?;

        let request = TransactionRequest {
            from: self.signer.identity().to_string(),
            to: self.gateway.contract_address.to_string(),
            function: function.to_string(),
            args,
            value,
            gas_limit,
        };

        let envelope = self.gateway.rpc.prepare_transaction(&request).await?;
        let signed = self.signer.sign(&envelope).await?;
        let tx_hash = self.gateway.rpc.send_transaction(&signed).await?;

        debug!(tx_hash = %tx_hash, function, "transaction accepted into pending pool");

        Ok(PendingTransaction {
            tx_hash,
            rpc: self.gateway.rpc.clone(),
            confirmation: self.gateway.confirmation,
        })
    }
}

/// Submitted write. It cannot be withdrawn, only waited on.
pub struct PendingTransaction {
    tx_hash: String,
    rpc: Arc<dyn LedgerRpc>,
    confirmation: ConfirmationPolicy,
}

impl PendingTransaction {
    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }

    /// Waits for the transaction to be mined, up to the policy timeout.
    pub async fn confirm(self) -> Result<TransactionReceipt, GatewayError> {
        let waited = self.confirmation.timeout;
        match tokio::time::timeout(waited, self.wait_for_receipt()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                tx_hash: self.tx_hash.clone(),
                waited,
            }),
        }
    }

    async fn wait_for_receipt(&self) -> Result<TransactionReceipt, GatewayError> {
        loop {
            match self.rpc.transaction_receipt(&self.tx_hash).await {
                Ok(Some(receipt)) if receipt.is_success() => {
                    return Ok(TransactionReceipt {
                        tx_hash: receipt.transaction_hash,
                        block_number: receipt.block_number,
                        status: ReceiptStatus::Success,
                    });
                }
                Ok(Some(receipt)) => {
                    return Err(GatewayError::ContractReverted {
                        reason: receipt
                            .revert_reason
                            .unwrap_or_else(|| "transaction reverted".to_string()),
                    });
                }
                Ok(None) => debug!(tx_hash = %self.tx_hash, "transaction still pending"),
                Err(GatewayError::NetworkUnreachable(e)) => {
                    warn!(tx_hash = %self.tx_hash, error = %e, "receipt poll failed, retrying");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.confirmation.poll_interval).await;
        }
    }
}

fn identity_arg(identity: &Identity) -> Value {
    Value::String(identity.to_string())
}

fn uint_arg(value: impl Into<u128>) -> Value {
    Value::String(value.into().to_string())
}

fn decode_uint(value: &Value) -> Result<u128, GatewayError> {
    let decoded = match value {
        Value::Number(number) => number.as_u64().map(u128::from),
        Value::String(text) => text.trim().parse::<u128>().ok(),
        _ => None,
    };
    decoded.ok_or_else(|| GatewayError::Decode(format!("expected an unsigned integer, got {}", value)))
}

/// Accepts the struct either keyed by field name or as a positional tuple.
fn decode_shipment(value: Value) -> Result<RawShipment, GatewayError> {
    let value = match value {
        Value::Array(items) if items.len() == SHIPMENT_FIELDS.len() => Value::Object(
            SHIPMENT_FIELDS
                .iter()
                .map(|field| field.to_string())
                .zip(items)
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    };

    serde_json::from_value(value).map_err(|e| GatewayError::Decode(format!("malformed shipment: {}", e)))
}
