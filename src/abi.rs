//! Contract interface schema.
//!
//! Accepts either a bare JSON ABI array or a build artifact carrying it under
//! `abi`. Only function entries are retained; events and errors are ignored.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const BUNDLED_TRACKING_ABI: &str = include_str!("../abi/Tracking.json");

pub const CREATE_SHIPMENT: &str = "createShipment";
pub const START_SHIPMENT: &str = "startShipment";
pub const COMPLETE_SHIPMENT: &str = "completeShipment";
pub const GET_SHIPMENT: &str = "getShipment";
pub const GET_SHIPMENTS_COUNT: &str = "getShipmentsCount";
pub const GET_ALL_TRANSACTIONS: &str = "getAllTransactions";

/// Functions the tracking contract must expose: name, argument count, kind.
const TRACKING_INTERFACE: &[(&str, usize, CallKind)] = &[
    (CREATE_SHIPMENT, 4, CallKind::Payable),
    (START_SHIPMENT, 3, CallKind::Write),
    (COMPLETE_SHIPMENT, 3, CallKind::Write),
    (GET_SHIPMENT, 2, CallKind::Read),
    (GET_SHIPMENTS_COUNT, 1, CallKind::Read),
    (GET_ALL_TRANSACTIONS, 0, CallKind::Read),
];

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("failed to read interface schema {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed interface schema: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("interface schema has no function {0}")]
    MissingFunction(String),

    #[error("function {name} takes {declared} arguments, expected {expected}")]
    ArityMismatch {
        name: String,
        expected: usize,
        declared: usize,
    },

    #[error("function {name} must be {expected}")]
    WrongMutability { name: String, expected: CallKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMutability {
    Pure,
    View,
    Nonpayable,
    Payable,
}

/// How a function may be invoked through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Write,
    Payable,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Read => "read-only",
            Self::Write => "state-mutating",
            Self::Payable => "payable",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone)]
pub struct AbiFunction {
    pub name: String,
    pub inputs: Vec<AbiParam>,
    pub outputs: Vec<AbiParam>,
    pub state_mutability: StateMutability,
}

impl AbiFunction {
    pub fn kind(&self) -> CallKind {
        match self.state_mutability {
            StateMutability::Pure | StateMutability::View => CallKind::Read,
            StateMutability::Nonpayable => CallKind::Write,
            StateMutability::Payable => CallKind::Payable,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AbiEntry {
    #[serde(rename = "type", default = "default_entry_type")]
    entry_type: String,
    name: Option<String>,
    #[serde(default)]
    inputs: Vec<AbiParam>,
    #[serde(default)]
    outputs: Vec<AbiParam>,
    #[serde(rename = "stateMutability")]
    state_mutability: Option<StateMutability>,
    // Pre-0.4.16 compilers emit these instead of stateMutability.
    #[serde(default)]
    payable: bool,
    #[serde(default)]
    constant: bool,
}

fn default_entry_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AbiDocument {
    Artifact { abi: Vec<AbiEntry> },
    Entries(Vec<AbiEntry>),
}

#[derive(Debug, Clone)]
pub struct ContractAbi {
    functions: HashMap<String, AbiFunction>,
}

impl ContractAbi {
    pub fn from_json(json: &str) -> Result<Self, AbiError> {
        let entries = match serde_json::from_str::<AbiDocument>(json)? {
            AbiDocument::Artifact { abi } => abi,
            AbiDocument::Entries(entries) => entries,
        };

        let functions = entries
            .into_iter()
            .filter(|entry| entry.entry_type == "function")
            .filter_map(|entry| {
                let name = entry.name?;
                let state_mutability = entry.state_mutability.unwrap_or(if entry.payable {
                    StateMutability::Payable
                } else if entry.constant {
                    StateMutability::View
                } else {
                    StateMutability::Nonpayable
                });

                Some((
                    name.clone(),
                    AbiFunction {
                        name,
                        inputs: entry.inputs,
                        outputs: entry.outputs,
                        state_mutability,
                    },
                ))
            })
            .collect();

        Ok(Self { functions })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AbiError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| AbiError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Schema of the tracking contract shipped with this crate.
    pub fn tracking() -> Result<Self, AbiError> {
        Self::from_json(BUNDLED_TRACKING_ABI)
    }

    pub fn function(&self, name: &str) -> Option<&AbiFunction> {
        self.functions.get(name)
    }

    /// Checks that `name` exists, takes `arg_count` arguments and can be
    /// invoked as `kind`.
    pub fn check_call(&self, name: &str, arg_count: usize, kind: CallKind) -> Result<(), AbiError> {
        let function = self
            .function(name)
            .ok_or_else(|| AbiError::MissingFunction(name.to_string()))?;

        if function.inputs.len() != arg_count {
            return Err(AbiError::ArityMismatch {
                name: name.to_string(),
                expected: arg_count,
                declared: function.inputs.len(),
            });
        }

        let compatible = match kind {
            CallKind::Read => function.kind() == CallKind::Read,
            CallKind::Write => function.kind() != CallKind::Read,
            CallKind::Payable => function.kind() == CallKind::Payable,
        };
        if !compatible {
            return Err(AbiError::WrongMutability {
                name: name.to_string(),
                expected: kind,
            });
        }

        Ok(())
    }

    /// Verifies every function the tracking workflow relies on.
    pub fn validate_tracking_interface(&self) -> Result<(), AbiError> {
        for (name, arg_count, kind) in TRACKING_INTERFACE {
            self.check_call(name, *arg_count, *kind)?;
        }
        Ok(())
    }
}
