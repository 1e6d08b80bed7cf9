use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Byte length of a ledger account address.
pub const IDENTITY_BYTES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identity {input:?}: expected 0x followed by 40 hex digits")]
pub struct IdentityError {
    pub input: String,
}

/// A ledger account address, normalized to lowercase `0x`-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let invalid = || IdentityError {
            input: input.to_string(),
        };

        let trimmed = input.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(invalid)?;

        if hex_part.len() != IDENTITY_BYTES * 2 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    pub fn from_bytes(bytes: [u8; IDENTITY_BYTES]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// Lifecycle state of a shipment as stored by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ShipmentStatus {
    Pending,
    InTransit,
    Delivered,
}

impl ShipmentStatus {
    /// Maps the contract's enum discriminant.
    pub fn from_ledger(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::InTransit),
            2 => Some(Self::Delivered),
            _ => None,
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::InTransit => "IN_TRANSIT",
            Self::Delivered => "DELIVERED",
        };
        f.write_str(label)
    }
}

/// Write call a presentation layer may offer for a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Complete,
}

/// Shipment struct exactly as the contract returns it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawShipment {
    pub sender: String,
    pub receiver: String,
    #[serde(deserialize_with = "ledger_uint")]
    pub pickup_time: u128,
    #[serde(deserialize_with = "ledger_uint")]
    pub delivery_time: u128,
    #[serde(deserialize_with = "ledger_uint")]
    pub distance: u128,
    #[serde(deserialize_with = "ledger_uint")]
    pub price: u128,
    #[serde(deserialize_with = "ledger_uint")]
    pub status: u128,
    pub is_paid: bool,
}

/// Normalized shipment handed to presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentRecord {
    pub sender: Identity,
    pub receiver: Identity,
    pub pickup_time: u64,
    /// Present only once the shipment is delivered.
    pub delivery_time: Option<u64>,
    pub distance: u64,
    pub price: String,
    pub status: ShipmentStatus,
    pub is_paid: bool,
}

impl ShipmentRecord {
    /// Action compatible with the locally known status. The ledger stays
    /// authoritative when this view is stale.
    pub fn next_action(&self) -> Option<LifecycleAction> {
        match self.status {
            ShipmentStatus::Pending => Some(LifecycleAction::Start),
            ShipmentStatus::InTransit => Some(LifecycleAction::Complete),
            ShipmentStatus::Delivered => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Ledger-confirmed outcome of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub status: ReceiptStatus,
}

/// Confirmed shipment creation with the per-sender index the ledger assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShipmentReceipt {
    pub transaction: TransactionReceipt,
    pub sender: Identity,
    pub index: u64,
}

/// Values a create submitted. Used to recognize its shipment on the ledger,
/// since the per-sender index is only known once the write is mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentTerms {
    pub receiver: Identity,
    pub pickup_time: u64,
    pub distance: u64,
    /// Normalized decimal, as rendered in [`ShipmentRecord::price`].
    pub price: String,
}

impl ShipmentTerms {
    pub fn matches(&self, record: &ShipmentRecord) -> bool {
        record.receiver == self.receiver
            && record.pickup_time == self.pickup_time
            && record.distance == self.distance
            && record.price == self.price
    }
}

/// Write whose outcome is not yet known, kept so the caller can re-query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    pub tx_hash: String,
    pub sender: Identity,
    /// For a create, the earliest index the shipment can occupy.
    pub index: u64,
    /// Status the shipment holds once the write lands.
    pub expected_status: ShipmentStatus,
    /// Set for creates only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms: Option<ShipmentTerms>,
}

/// Result of re-querying the ledger after an unconfirmed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCheck {
    LikelySucceeded { index: u64, record: ShipmentRecord },
    StillUnknown,
}

/// Per-sender index of each row of the global shipment list, which the
/// contract appends to in creation order.
pub fn sender_indices(records: &[ShipmentRecord]) -> Vec<u64> {
    let mut seen: HashMap<&Identity, u64> = HashMap::new();
    records
        .iter()
        .map(|record| {
            let next = seen.entry(&record.sender).or_insert(0);
            let index = *next;
            *next += 1;
            index
        })
        .collect()
}

/// Accepts fixed-point integers encoded either as JSON numbers or as
/// decimal strings (values above 2^53 do not survive as numbers).
pub fn ledger_uint<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Number(u64),
        Text(String),
    }

    match Encoded::deserialize(deserializer)? {
        Encoded::Number(value) => Ok(u128::from(value)),
        Encoded::Text(text) => text
            .trim()
            .parse::<u128>()
            .map_err(|_| serde::de::Error::custom(format!("invalid ledger integer {:?}", text))),
    }
}
