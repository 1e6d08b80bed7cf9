//! Client-side shipment lifecycle layer for the tracking contract.
//!
//! [`orchestrator::ShipmentOrchestrator`] turns create/start/complete/query
//! intents into ledger calls through [`gateway::LedgerGateway`], using the
//! wallet session held by [`connection::ConnectionManager`], and publishes
//! ledger-confirmed state into [`session::SessionStore`].

pub mod abi;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod rpc;
pub mod scheduler;
pub mod session;
pub mod units;
pub mod wallet;
