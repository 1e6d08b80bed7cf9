use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::GatewayError;

const API_KEY_HEADER: &str = "x-api-key";

/// JSON-RPC error code the ledger uses for execution reverts.
const REVERT_ERROR_CODE: i64 = 3;

/// Read-only contract invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRequest {
    pub to: String,
    pub function: String,
    pub args: Vec<Value>,
}

/// State-mutating contract invocation, before signing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: String,
    pub to: String,
    pub function: String,
    pub args: Vec<Value>,
    /// Payment attached to the call, in fixed-point units.
    #[serde(serialize_with = "decimal_string")]
    pub value: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
}

/// Unsigned transaction as resolved by the ledger node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEnvelope {
    /// Hex digest the signer must sign.
    pub hash: String,
    /// Opaque hex-encoded transaction body.
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub payload: String,
    pub signature: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<u64>,
    pub status: String,
    #[serde(default)]
    pub revert_reason: Option<String>,
}

impl RawReceipt {
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success") || self.status == "0x1"
    }
}

/// Transport to the ledger node.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn call(&self, request: &CallRequest) -> Result<Value, GatewayError>;

    async fn prepare_transaction(&self, request: &TransactionRequest) -> Result<TxEnvelope, GatewayError>;

    /// Returns the transaction hash once the node accepts it into its pending pool.
    async fn send_transaction(&self, signed: &SignedTransaction) -> Result<String, GatewayError>;

    /// `None` while the transaction is still pending.
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<RawReceipt>, GatewayError>;
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl From<JsonRpcError> for GatewayError {
    fn from(error: JsonRpcError) -> Self {
        if error.code == REVERT_ERROR_CODE || error.message.to_ascii_lowercase().contains("revert") {
            let reason = match error.data {
                Some(Value::String(data)) if !data.is_empty() => data,
                _ => error.message,
            };
            GatewayError::ContractReverted { reason }
        } else {
            GatewayError::Rpc {
                code: error.code,
                message: error.message,
            }
        }
    }
}

pub struct HttpLedgerRpc {
    endpoint: String,
    api_key: Option<String>,
    http_client: HttpClient,
    next_id: AtomicU64,
}

impl HttpLedgerRpc {
    pub fn new(endpoint: String, api_key: Option<String>, request_timeout: Duration) -> Result<Self, GatewayError> {
        let http_client = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::NetworkUnreachable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            api_key,
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, GatewayError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut request = self.http_client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::NetworkUnreachable(format!("{} request failed: {}", method, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(GatewayError::NetworkUnreachable(format!(
                    "ledger node returned status {}: {}",
                    status, body
                )));
            }
            return Err(GatewayError::Rpc {
                code: i64::from(status.as_u16()),
                message: body,
            });
        }

        let envelope: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("failed to parse {} response: {}", method, e)))?;

        if let Some(error) = envelope.error {
            return Err(error.into());
        }

        serde_json::from_value(envelope.result)
            .map_err(|e| GatewayError::Decode(format!("unexpected {} result: {}", method, e)))
    }
}

#[async_trait]
impl LedgerRpc for HttpLedgerRpc {
    async fn call(&self, request: &CallRequest) -> Result<Value, GatewayError> {
        self.request("ledger_call", json!([request])).await
    }

    async fn prepare_transaction(&self, request: &TransactionRequest) -> Result<TxEnvelope, GatewayError> {
        self.request("ledger_prepareTransaction", json!([request])).await
    }

    async fn send_transaction(&self, signed: &SignedTransaction) -> Result<String, GatewayError> {
        self.request("ledger_sendTransaction", json!([signed])).await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<RawReceipt>, GatewayError> {
        self.request("ledger_getTransactionReceipt", json!([tx_hash])).await
    }
}

fn decimal_string<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}
