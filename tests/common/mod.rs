#![allow(dead_code)]

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use futures::stream::BoxStream;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use shipment_tracker::abi::ContractAbi;
use shipment_tracker::connection::ConnectionManager;
use shipment_tracker::error::{GatewayError, WalletError};
use shipment_tracker::gateway::{ConfirmationPolicy, LedgerGateway};
use shipment_tracker::models::Identity;
use shipment_tracker::orchestrator::{OrchestratorSettings, ShipmentOrchestrator};
use shipment_tracker::rpc::{CallRequest, LedgerRpc, RawReceipt, SignedTransaction, TransactionRequest, TxEnvelope};
use shipment_tracker::session::SessionStore;
use shipment_tracker::wallet::{KeySigner, KeystoreWallet, TransactionSigner, WalletProvider, identity_from_public_key};

pub const CONTRACT_ADDRESS: &str = "0x84f7dae20121d2d06f74c3e506a6f9d403a5e14d";
pub const RECEIVER: &str = "0x2222222222222222222222222222222222222222";
pub const OTHER_RECEIVER: &str = "0x3333333333333333333333333333333333333333";
pub const APP_NAME: &str = "Product Tracking Dapp";

pub const KEY_A: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
pub const KEY_B: &str = "4ccd089b28ff96da9db6c346ec114e0f5b8a319f35aba624da8cf6ed4fb8a6fb";

/// Block time stamped on delivered shipments.
pub const LEDGER_CLOCK: u128 = 1_710_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Immediate,
    /// Receipts never appear; `applied` decides whether the write still lands.
    Withheld { applied: bool },
    /// Accepted into the pool and mined on the `polls`-th receipt poll, or by
    /// [`MockLedger::mine_pending`].
    Delayed { polls: u32 },
}

struct Queued {
    tx_hash: String,
    request: TransactionRequest,
    polls_left: u32,
}

#[derive(Debug, Clone)]
struct StoredShipment {
    sender: String,
    receiver: String,
    pickup_time: u128,
    delivery_time: u128,
    distance: u128,
    price: u128,
    status: u8,
    is_paid: bool,
}

impl StoredShipment {
    fn to_object(&self) -> Value {
        json!({
            "sender": self.sender,
            "receiver": self.receiver,
            "pickupTime": self.pickup_time.to_string(),
            "deliveryTime": self.delivery_time.to_string(),
            "distance": self.distance.to_string(),
            "price": self.price.to_string(),
            "status": self.status,
            "isPaid": self.is_paid,
        })
    }

    fn to_tuple(&self) -> Value {
        json!([
            self.sender,
            self.receiver,
            self.pickup_time.to_string(),
            self.delivery_time.to_string(),
            self.distance.to_string(),
            self.price.to_string(),
            self.status,
            self.is_paid,
        ])
    }
}

/// Contract storage: per-sender shipment lists plus global creation order.
#[derive(Debug, Clone, Default)]
struct Book {
    shipments: HashMap<String, Vec<StoredShipment>>,
    order: Vec<(String, usize)>,
}

impl Book {
    fn apply(&mut self, request: &TransactionRequest) -> Result<(), String> {
        match request.function.as_str() {
            "createShipment" => {
                let price = uint_arg(&request.args, 3)?;
                if request.value != price {
                    return Err("Payment amount must match the price.".to_string());
                }
                let shipments = self.shipments.entry(request.from.clone()).or_default();
                shipments.push(StoredShipment {
                    sender: request.from.clone(),
                    receiver: str_arg(&request.args, 0)?,
                    pickup_time: uint_arg(&request.args, 1)?,
                    delivery_time: 0,
                    distance: uint_arg(&request.args, 2)?,
                    price,
                    status: 0,
                    is_paid: false,
                });
                self.order.push((request.from.clone(), shipments.len() - 1));
                Ok(())
            }
            "startShipment" => {
                let shipment = self.target(request)?;
                if shipment.status != 0 {
                    return Err("Shipment already in transit.".to_string());
                }
                shipment.status = 1;
                Ok(())
            }
            "completeShipment" => {
                let shipment = self.target(request)?;
                if shipment.status != 1 {
                    return Err("Shipment not in transit.".to_string());
                }
                shipment.status = 2;
                shipment.delivery_time = LEDGER_CLOCK;
                shipment.is_paid = true;
                Ok(())
            }
            other => Err(format!("unknown function {}", other)),
        }
    }

    fn target(&mut self, request: &TransactionRequest) -> Result<&mut StoredShipment, String> {
        let sender = str_arg(&request.args, 0)?;
        let receiver = str_arg(&request.args, 1)?;
        let index = uint_arg(&request.args, 2)? as usize;

        let shipment = self
            .shipments
            .get_mut(&sender)
            .and_then(|shipments| shipments.get_mut(index))
            .ok_or_else(|| "Invalid shipment index.".to_string())?;
        if shipment.receiver != receiver {
            return Err("Invalid receiver.".to_string());
        }
        Ok(shipment)
    }

    fn count(&self, sender: &str) -> usize {
        self.shipments.get(sender).map_or(0, Vec::len)
    }
}

struct LedgerState {
    book: Book,
    prepared: HashMap<String, (String, TransactionRequest)>,
    receipts: HashMap<String, RawReceipt>,
    pool: Vec<Queued>,
    next_tx: u64,
    block: u64,
    offline: bool,
    simulate_on_prepare: bool,
    confirmation: Confirmation,
    forced_revert: Option<String>,
    methods: Vec<String>,
    transactions: Vec<TransactionRequest>,
}

/// In-memory tracking contract behind the ledger JSON-RPC surface.
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                book: Book::default(),
                prepared: HashMap::new(),
                receipts: HashMap::new(),
                pool: Vec::new(),
                next_tx: 0,
                block: 100,
                offline: false,
                simulate_on_prepare: true,
                confirmation: Confirmation::Immediate,
                forced_revert: None,
                methods: Vec::new(),
                transactions: Vec::new(),
            }),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// When off, reverts only surface in the receipt.
    pub fn set_simulate_on_prepare(&self, simulate: bool) {
        self.lock().simulate_on_prepare = simulate;
    }

    pub fn set_confirmation(&self, confirmation: Confirmation) {
        self.lock().confirmation = confirmation;
    }

    pub fn force_next_revert(&self, reason: &str) {
        self.lock().forced_revert = Some(reason.to_string());
    }

    /// Mines every transaction still waiting in the pool, oldest first.
    pub fn mine_pending(&self) {
        let mut state = self.lock();
        let queued = std::mem::take(&mut state.pool);
        for entry in queued {
            state.mine(&entry.tx_hash, &entry.request);
        }
    }

    /// Every RPC method received, in order.
    pub fn methods(&self) -> Vec<String> {
        self.lock().methods.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().methods.len()
    }

    /// Transactions that were prepared, in order.
    pub fn transactions(&self) -> Vec<TransactionRequest> {
        self.lock().transactions.clone()
    }

    pub fn shipment_count(&self, sender: &Identity) -> usize {
        self.lock().book.count(sender.as_str())
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap()
    }

    fn enter(&self, method: &str) -> Result<MutexGuard<'_, LedgerState>, GatewayError> {
        let mut state = self.lock();
        state.methods.push(method.to_string());
        if state.offline {
            return Err(GatewayError::NetworkUnreachable("connection refused".to_string()));
        }
        Ok(state)
    }
}

impl LedgerState {
    fn mine(&mut self, tx_hash: &str, request: &TransactionRequest) {
        let outcome = self.execute(request, false);
        self.block += 1;
        let (status, revert_reason) = match outcome {
            Ok(()) => ("success", None),
            Err(reason) => ("reverted", Some(reason)),
        };
        self.receipts.insert(
            tx_hash.to_string(),
            RawReceipt {
                transaction_hash: tx_hash.to_string(),
                block_number: Some(self.block),
                status: status.to_string(),
                revert_reason,
            },
        );
    }

    fn execute(&mut self, request: &TransactionRequest, dry_run: bool) -> Result<(), String> {
        if let Some(reason) = self.forced_revert.take() {
            return Err(reason);
        }
        if dry_run {
            self.book.clone().apply(request)
        } else {
            self.book.apply(request)
        }
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn call(&self, request: &CallRequest) -> Result<Value, GatewayError> {
        let state = self.enter("ledger_call")?;
        assert_eq!(request.to, CONTRACT_ADDRESS);

        match request.function.as_str() {
            "getShipmentsCount" => {
                let sender = str_arg(&request.args, 0).map_err(revert)?;
                Ok(json!(state.book.count(&sender).to_string()))
            }
            "getShipment" => {
                let sender = str_arg(&request.args, 0).map_err(revert)?;
                let index = uint_arg(&request.args, 1).map_err(revert)? as usize;
                state
                    .book
                    .shipments
                    .get(&sender)
                    .and_then(|shipments| shipments.get(index))
                    .map(StoredShipment::to_tuple)
                    .ok_or_else(|| revert("array index out of bounds".to_string()))
            }
            "getAllTransactions" => Ok(Value::Array(
                state
                    .book
                    .order
                    .iter()
                    .map(|(sender, index)| state.book.shipments[sender][*index].to_object())
                    .collect(),
            )),
            other => Err(GatewayError::Rpc {
                code: -32601,
                message: format!("unknown function {}", other),
            }),
        }
    }

    async fn prepare_transaction(&self, request: &TransactionRequest) -> Result<TxEnvelope, GatewayError> {
        let mut state = self.enter("ledger_prepareTransaction")?;
        assert_eq!(request.to, CONTRACT_ADDRESS);
        state.transactions.push(request.clone());

        if state.simulate_on_prepare {
            state.execute(request, true).map_err(revert)?;
        }

        state.next_tx += 1;
        let payload = hex::encode(format!("tx-{}", state.next_tx));
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        hasher.update(serde_json::to_vec(request).unwrap());
        let hash = hex::encode(hasher.finalize());

        state.prepared.insert(payload.clone(), (hash.clone(), request.clone()));
        Ok(TxEnvelope { hash, payload })
    }

    async fn send_transaction(&self, signed: &SignedTransaction) -> Result<String, GatewayError> {
        let mut state = self.enter("ledger_sendTransaction")?;
        let (hash, request) = state
            .prepared
            .remove(&signed.payload)
            .ok_or_else(|| GatewayError::Rpc {
                code: -32000,
                message: "unknown transaction".to_string(),
            })?;

        let public_key: [u8; 32] = hex::decode(&signed.public_key).unwrap().try_into().unwrap();
        let verifying_key = VerifyingKey::from_bytes(&public_key).unwrap();
        let signature = Signature::from_slice(&hex::decode(&signed.signature).unwrap()).unwrap();
        if verifying_key.verify(&hex::decode(&hash).unwrap(), &signature).is_err()
            || identity_from_public_key(&public_key).as_str() != request.from
        {
            return Err(GatewayError::Rpc {
                code: -32000,
                message: "invalid signature".to_string(),
            });
        }

        let tx_hash = format!("0x{}", hash);
        let confirmation = state.confirmation;
        match confirmation {
            Confirmation::Immediate => state.mine(&tx_hash, &request),
            Confirmation::Withheld { applied } => {
                if applied {
                    let _ = state.execute(&request, false);
                }
            }
            Confirmation::Delayed { polls } => state.pool.push(Queued {
                tx_hash: tx_hash.clone(),
                request,
                polls_left: polls,
            }),
        }

        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<RawReceipt>, GatewayError> {
        let mut state = self.enter("ledger_getTransactionReceipt")?;
        if let Some(position) = state.pool.iter().position(|entry| entry.tx_hash == tx_hash) {
            let entry = &mut state.pool[position];
            entry.polls_left = entry.polls_left.saturating_sub(1);
            if entry.polls_left == 0 {
                let entry = state.pool.remove(position);
                state.mine(&entry.tx_hash, &entry.request);
            }
        }
        Ok(state.receipts.get(tx_hash).cloned())
    }
}

fn revert(reason: String) -> GatewayError {
    GatewayError::ContractReverted { reason }
}

fn str_arg(args: &[Value], position: usize) -> Result<String, String> {
    args.get(position)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("argument {} must be a string", position))
}

fn uint_arg(args: &[Value], position: usize) -> Result<u128, String> {
    args.get(position)
        .and_then(Value::as_str)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| format!("argument {} must be a decimal string", position))
}

struct RejectingSigner {
    identity: Identity,
}

#[async_trait]
impl TransactionSigner for RejectingSigner {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn sign(&self, _envelope: &TxEnvelope) -> Result<SignedTransaction, WalletError> {
        Err(WalletError::Rejected)
    }
}

/// Keystore wallet whose user can be told to decline prompts.
pub struct MockWallet {
    inner: KeystoreWallet,
    reject_connection: AtomicBool,
    reject_signing: AtomicBool,
}

impl MockWallet {
    pub fn new() -> Self {
        let signers = [KEY_A, KEY_B]
            .iter()
            .map(|key| KeySigner::from_hex(key).unwrap())
            .collect();
        Self {
            inner: KeystoreWallet::new(signers).unwrap(),
            reject_connection: AtomicBool::new(false),
            reject_signing: AtomicBool::new(false),
        }
    }

    pub fn reject_connection(&self, reject: bool) {
        self.reject_connection.store(reject, Ordering::SeqCst);
    }

    pub fn reject_signing(&self, reject: bool) {
        self.reject_signing.store(reject, Ordering::SeqCst);
    }

    pub async fn select_account(&self, identity: &Identity) {
        self.inner.select_account(identity).await.unwrap();
    }

    pub fn identities() -> (Identity, Identity) {
        (
            KeySigner::from_hex(KEY_A).unwrap().identity().clone(),
            KeySigner::from_hex(KEY_B).unwrap().identity().clone(),
        )
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn authorized_accounts(&self) -> Result<Vec<Identity>, WalletError> {
        self.inner.authorized_accounts().await
    }

    async fn request_accounts(&self) -> Result<Vec<Identity>, WalletError> {
        if self.reject_connection.load(Ordering::SeqCst) {
            return Err(WalletError::Rejected);
        }
        self.inner.request_accounts().await
    }

    fn account_changes(&self) -> BoxStream<'static, Vec<Identity>> {
        self.inner.account_changes()
    }

    async fn signer(&self, identity: &Identity) -> Result<Arc<dyn TransactionSigner>, WalletError> {
        let signer = self.inner.signer(identity).await?;
        if self.reject_signing.load(Ordering::SeqCst) {
            return Ok(Arc::new(RejectingSigner {
                identity: identity.clone(),
            }));
        }
        Ok(signer)
    }
}

pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub wallet: Option<Arc<MockWallet>>,
    pub connection: Arc<ConnectionManager>,
    pub orchestrator: ShipmentOrchestrator,
}

pub fn fast_policy() -> ConfirmationPolicy {
    ConfirmationPolicy {
        timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(5),
    }
}

pub fn harness() -> Harness {
    build(Some(Arc::new(MockWallet::new())))
}

pub fn harness_without_wallet() -> Harness {
    build(None)
}

fn build(wallet: Option<Arc<MockWallet>>) -> Harness {
    let ledger = Arc::new(MockLedger::new());
    let provider = wallet.clone().map(|wallet| wallet as Arc<dyn WalletProvider>);
    let connection = Arc::new(ConnectionManager::new(provider, SessionStore::new(APP_NAME)));

    let rpc: Arc<dyn LedgerRpc> = ledger.clone();
    let gateway = LedgerGateway::new(
        rpc,
        Identity::parse(CONTRACT_ADDRESS).unwrap(),
        ContractAbi::tracking().unwrap(),
        fast_policy(),
    );

    let orchestrator = ShipmentOrchestrator::new(connection.clone(), gateway, OrchestratorSettings::default());

    Harness {
        ledger,
        wallet,
        connection,
        orchestrator,
    }
}
