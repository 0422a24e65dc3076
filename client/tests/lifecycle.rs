use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use xescrow_client::signer::{
    CancelOutcome, SignedResponse, SigningOptions, SigningRequestStatus,
};
use xescrow_client::{
    ClientError, Clock, EscrowClient, LedgerClient, Orchestrator, SigningRequestRef,
    SigningService,
};
use xescrow_core::{
    Address, Condition, ConditionEngine, ConditionStrategy, ContractStore, Environment,
    EscrowConfig, EscrowError, EscrowReference, EscrowRequest, EscrowStatus, Fulfillment,
    PendingStage, Sha256Hashlock,
};

#[derive(Default)]
struct SignerState {
    next: u32,
    requests: HashMap<String, SigningRequestStatus>,
    transactions: Vec<Value>,
    cancelled: Vec<String>,
}

/// In-memory signing provider; tests play the holder by editing request states.
#[derive(Default)]
struct FakeSigner {
    state: Mutex<SignerState>,
    down: AtomicBool,
    stall: AtomicBool,
    /// Keep requests open when asked to withdraw them.
    refuse_cancel: AtomicBool,
}

impl FakeSigner {
    fn set(&self, request_id: &str, status: SigningRequestStatus) {
        self.state
            .lock()
            .unwrap()
            .requests
            .insert(request_id.to_string(), status);
    }

    fn sign(&self, request_id: &str, account: &str, result: Option<&str>) {
        self.set(
            request_id,
            SigningRequestStatus {
                signed: true,
                response: Some(SignedResponse {
                    tx_hash: format!("HASH-{request_id}"),
                    account: account.to_string(),
                    dispatched_result: result.map(str::to_string),
                }),
                ..Default::default()
            },
        );
    }

    fn transactions(&self) -> Vec<Value> {
        self.state.lock().unwrap().transactions.clone()
    }

    fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

#[async_trait::async_trait]
impl SigningService for FakeSigner {
    async fn create_signing_request(
        &self,
        transaction: &Value,
        _options: &SigningOptions,
    ) -> xescrow_client::Result<SigningRequestRef> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ClientError::Api {
                service: "fake signer",
                status: 503,
                body: "maintenance".into(),
            });
        }
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }

        let mut state = self.state.lock().unwrap();
        state.next += 1;
        let request_id = format!("req-{}", state.next);
        state
            .requests
            .insert(request_id.clone(), SigningRequestStatus::default());
        state.transactions.push(transaction.clone());
        Ok(SigningRequestRef {
            next_action: format!("https://sign.example/{request_id}"),
            request_id,
        })
    }

    async fn get_signing_request_status(
        &self,
        request_id: &str,
    ) -> xescrow_client::Result<SigningRequestStatus> {
        self.state
            .lock()
            .unwrap()
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| ClientError::Api {
                service: "fake signer",
                status: 404,
                body: request_id.to_string(),
            })
    }

    async fn cancel_signing_request(
        &self,
        request_id: &str,
    ) -> xescrow_client::Result<CancelOutcome> {
        self.state
            .lock()
            .unwrap()
            .cancelled
            .push(request_id.to_string());
        if self.refuse_cancel.load(Ordering::SeqCst) {
            return Ok(CancelOutcome {
                cancelled: false,
                reason: "already opened by the holder".into(),
            });
        }
        Ok(CancelOutcome {
            cancelled: true,
            reason: "OK".into(),
        })
    }
}

struct FakeLedger {
    sequence: AtomicU32,
    down: AtomicBool,
}

#[async_trait::async_trait]
impl LedgerClient for FakeLedger {
    async fn account_sequence(&self, _account: &Address) -> xescrow_client::Result<u32> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ClientError::Ledger("noCurrent: no current ledger".into()));
        }
        Ok(self.sequence.load(Ordering::SeqCst))
    }
}

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn advance(&self, by: chrono::Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

struct Harness {
    client: EscrowClient,
    signer: Arc<FakeSigner>,
    ledger: Arc<FakeLedger>,
    clock: Arc<ManualClock>,
    store: Arc<ContractStore>,
}

impl Harness {
    fn new() -> Self {
        let config: EscrowConfig = serde_json::from_value(json!({
            "environment": "test",
            "max_amount": "1000",
            "signing_timeout_secs": 1,
            "signing_window_mins": 10,
            "expiry_grace_secs": 3600,
            "signer": { "api_url": "https://signer.example", "api_key": "k", "api_secret": "s" },
            "ledger": { "rpc_url": "https://ledger.example" }
        }))
        .unwrap();
        let engine = ConditionEngine::new(
            ConditionStrategy::Hashlock(Arc::new(Sha256Hashlock)),
            Environment::Test,
        )
        .unwrap();

        let signer = Arc::new(FakeSigner::default());
        let ledger = Arc::new(FakeLedger {
            sequence: AtomicU32::new(41),
            down: AtomicBool::new(false),
        });
        let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
        let store = Arc::new(ContractStore::new());

        let orchestrator = Orchestrator::new(
            &config,
            engine,
            signer.clone(),
            ledger.clone(),
            store.clone(),
        )
        .with_clock(clock.clone());

        Self {
            client: EscrowClient::with_orchestrator(orchestrator),
            signer,
            ledger,
            clock,
            store,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Creates an escrow and plays it through to live on the ledger.
    async fn escrowed(&self, request: EscrowRequest) -> Uuid {
        let outcome = self.client.create_escrow(&request).await;
        assert!(outcome.success, "create failed: {:?}", outcome.error);
        let contract = outcome.escrow_contract.unwrap();
        let request_id = outcome.signing_request_ref.unwrap().request_id;

        self.signer
            .sign(&request_id, contract.from.as_str(), Some("tesSUCCESS"));
        let snapshot = self.client.poll_escrow(&contract.id).await.unwrap();
        assert_eq!(snapshot.status.stage(), Some(&PendingStage::Escrowed));
        contract.id
    }

    async fn status(&self, id: &Uuid) -> EscrowStatus {
        self.client.get_escrow_status(id).await.unwrap().status
    }
}

fn payer() -> Address {
    Address::from_account_id(&[0x11; 20])
}

fn provider() -> Address {
    Address::from_account_id(&[0x22; 20])
}

fn booking(amount: &str) -> EscrowRequest {
    EscrowRequest {
        from: payer().to_string(),
        to: provider().to_string(),
        amount: amount.into(),
        booking_id: "booking-7".into(),
        purpose: Some("consultation".into()),
        finish_after: None,
        cancel_after: None,
        destination_tag: Some(7),
    }
}

#[tokio::test]
async fn create_pins_sequence() {
    let h = Harness::new();
    let outcome = h.client.create_escrow(&booking("25")).await;
    assert!(outcome.success);
    assert!(outcome.error.is_none());

    let contract = outcome.escrow_contract.unwrap();
    assert_eq!(contract.sequence, Some(41));
    assert_eq!(
        contract.status.stage(),
        Some(&PendingStage::AwaitingCreate {
            request_id: "req-1".into()
        })
    );

    let txs = h.signer.transactions();
    assert_eq!(txs.len(), 1);
    let tx = &txs[0];
    assert_eq!(tx["TransactionType"], "EscrowCreate");
    assert_eq!(tx["Sequence"], 41);
    assert_eq!(tx["Amount"], "25000000");
    assert_eq!(tx["DestinationTag"], 7);
    assert_eq!(tx["Condition"], contract.condition.to_string());
    assert!(tx.get("Fulfillment").is_none());
}

#[tokio::test]
async fn finish_releases_with_stored_fulfillment() {
    let h = Harness::new();
    let id = h.escrowed(booking("25")).await;
    let snapshot = h.client.get_escrow_status(&id).await.unwrap();
    assert_eq!(snapshot.create_tx_hash.as_deref(), Some("HASH-req-1"));

    let expected = EscrowReference {
        owner: payer(),
        sequence: 41,
    };
    let outcome = h.client.finish_escrow(&id, Some(&expected)).await;
    assert!(outcome.success, "{:?}", outcome.error);
    let request_id = outcome.signing_request_ref.unwrap().request_id;

    let tx = h.signer.transactions().pop().unwrap();
    assert_eq!(tx["TransactionType"], "EscrowFinish");
    assert_eq!(tx["Owner"], payer().to_string());
    assert_eq!(tx["OfferSequence"], 41);
    let condition: Condition = tx["Condition"].as_str().unwrap().parse().unwrap();
    let fulfillment: Fulfillment = tx["Fulfillment"].as_str().unwrap().parse().unwrap();
    assert_eq!(condition, snapshot.condition);
    assert!(condition.verify(&fulfillment).is_ok());

    h.signer
        .sign(&request_id, payer().as_str(), Some("tesSUCCESS"));
    let snapshot = h.client.poll_escrow(&id).await.unwrap();
    assert_eq!(
        snapshot.status,
        EscrowStatus::Finished {
            tx_hash: format!("HASH-{request_id}"),
            at: h.now()
        }
    );
}

#[tokio::test]
async fn polling_is_idempotent() {
    let h = Harness::new();
    let outcome = h.client.create_escrow(&booking("3.5")).await;
    let id = outcome.escrow_contract.unwrap().id;

    let first = h.client.poll_escrow(&id).await.unwrap();
    let second = h.client.poll_escrow(&id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.status.label(), "pending");

    // signed but not yet validated: still nothing to apply
    h.signer.sign("req-1", payer().as_str(), None);
    assert_eq!(h.client.poll_escrow(&id).await.unwrap(), first);

    h.signer.sign("req-1", payer().as_str(), Some("tesSUCCESS"));
    let live = h.client.poll_escrow(&id).await.unwrap();
    assert_eq!(live.status.stage(), Some(&PendingStage::Escrowed));
    h.clock.advance(chrono::Duration::minutes(1));
    assert_eq!(h.client.poll_escrow(&id).await.unwrap(), live);
}

#[tokio::test]
async fn crypto_condition_failure_stays_pending() {
    let h = Harness::new();
    let id = h.escrowed(booking("25")).await;

    let outcome = h.client.finish_escrow(&id, None).await;
    let request_id = outcome.signing_request_ref.unwrap().request_id;
    h.signer.sign(
        &request_id,
        payer().as_str(),
        Some("tecCRYPTOCONDITION_ERROR"),
    );

    let snapshot = h.client.poll_escrow(&id).await.unwrap();
    assert_eq!(snapshot.status.label(), "pending");
    assert_eq!(snapshot.status.stage(), Some(&PendingStage::Escrowed));
    assert_eq!(snapshot.status.reason(), Some("tecCRYPTOCONDITION_ERROR"));

    // the escrow is still live, so a new finish may be attempted
    assert!(h.client.finish_escrow(&id, None).await.success);
}

#[tokio::test]
async fn signer_outage_leaves_contract_created() {
    let h = Harness::new();
    h.signer.down.store(true, Ordering::SeqCst);

    let outcome = h.client.create_escrow(&booking("25")).await;
    assert!(!outcome.success);
    let error = outcome.error.unwrap();
    assert_eq!(error.kind, "SigningServiceUnavailable");
    assert!(error.retriable);
    let contract = outcome.escrow_contract.unwrap();
    assert_eq!(contract.status.label(), "created");

    h.signer.down.store(false, Ordering::SeqCst);
    let retried = h.client.resubmit_escrow(&contract.id).await;
    assert!(retried.success);
    assert_eq!(retried.escrow_contract.unwrap().status.label(), "pending");
}

#[tokio::test]
async fn ledger_outage_is_retriable() {
    let h = Harness::new();
    h.ledger.down.store(true, Ordering::SeqCst);

    let outcome = h.client.create_escrow(&booking("25")).await;
    let error = outcome.error.unwrap();
    assert_eq!(error.kind, "SigningServiceUnavailable");
    assert!(error.retriable);
    assert!(h.signer.transactions().is_empty());

    let contract = outcome.escrow_contract.unwrap();
    assert_eq!(contract.sequence, None);
    let aborted = h
        .client
        .abort_escrow(&contract.id, "payer left")
        .await
        .unwrap();
    assert_eq!(aborted.status.reason(), Some("payer left"));
}

#[tokio::test(start_paused = true)]
async fn stalled_signer_times_out() {
    let h = Harness::new();
    h.signer.stall.store(true, Ordering::SeqCst);

    let outcome = h.client.create_escrow(&booking("25")).await;
    let error = outcome.error.unwrap();
    assert_eq!(error.kind, "SigningTimeout");
    assert!(error.retriable);
    assert_eq!(outcome.escrow_contract.unwrap().status.label(), "created");
}

#[tokio::test]
async fn unanswered_request_expires() {
    let h = Harness::new();
    let outcome = h.client.create_escrow(&booking("25")).await;
    let id = outcome.escrow_contract.unwrap().id;

    h.clock.advance(chrono::Duration::minutes(9));
    assert_eq!(h.client.poll_escrow(&id).await.unwrap().status.label(), "pending");

    h.clock.advance(chrono::Duration::minutes(2));
    assert!(matches!(
        h.client.poll_escrow(&id).await,
        Err(EscrowError::SigningTimeout(_))
    ));
    assert_eq!(h.status(&id).await.label(), "expired");
    assert_eq!(h.signer.cancelled(), vec!["req-1".to_string()]);
}

#[tokio::test]
async fn late_signature_after_refused_withdrawal_goes_live() {
    let h = Harness::new();
    h.signer.refuse_cancel.store(true, Ordering::SeqCst);
    let outcome = h.client.create_escrow(&booking("25")).await;
    let id = outcome.escrow_contract.unwrap().id;
    let awaiting = PendingStage::AwaitingCreate {
        request_id: "req-1".into(),
    };

    h.clock.advance(chrono::Duration::minutes(11));
    assert!(matches!(
        h.client.poll_escrow(&id).await,
        Err(EscrowError::SigningTimeout(_))
    ));
    assert_eq!(h.signer.cancelled(), vec!["req-1".to_string()]);
    assert_eq!(h.status(&id).await.stage(), Some(&awaiting));

    // the holder signs the request the provider kept open
    h.signer.sign("req-1", payer().as_str(), Some("tesSUCCESS"));
    let snapshot = h.client.poll_escrow(&id).await.unwrap();
    assert_eq!(snapshot.status.stage(), Some(&PendingStage::Escrowed));
    assert_eq!(snapshot.create_tx_hash.as_deref(), Some("HASH-req-1"));
}

#[tokio::test]
async fn finish_timeout_without_withdrawal_keeps_request() {
    let h = Harness::new();
    let id = h.escrowed(booking("25")).await;
    let request_id = h
        .client
        .finish_escrow(&id, None)
        .await
        .signing_request_ref
        .unwrap()
        .request_id;
    h.signer.refuse_cancel.store(true, Ordering::SeqCst);

    h.clock.advance(chrono::Duration::minutes(11));
    assert!(matches!(
        h.client.poll_escrow(&id).await,
        Err(EscrowError::SigningTimeout(_))
    ));
    assert_eq!(
        h.status(&id).await.stage(),
        Some(&PendingStage::AwaitingFinish {
            request_id: request_id.clone()
        })
    );

    h.signer
        .sign(&request_id, payer().as_str(), Some("tesSUCCESS"));
    assert_eq!(h.client.poll_escrow(&id).await.unwrap().status.label(), "finished");
}

#[tokio::test]
async fn declined_create_cancels() {
    let h = Harness::new();
    let outcome = h.client.create_escrow(&booking("25")).await;
    let id = outcome.escrow_contract.unwrap().id;

    h.signer.set(
        "req-1",
        SigningRequestStatus {
            rejected: true,
            ..Default::default()
        },
    );
    let snapshot = h.client.poll_escrow(&id).await.unwrap();
    assert_eq!(snapshot.status.label(), "cancelled");
    assert!(snapshot.status.is_terminal());
}

#[tokio::test]
async fn create_signed_by_stranger_is_refused() {
    let h = Harness::new();
    let outcome = h.client.create_escrow(&booking("25")).await;
    let id = outcome.escrow_contract.unwrap().id;

    h.signer
        .sign("req-1", provider().as_str(), Some("tesSUCCESS"));
    assert!(matches!(
        h.client.poll_escrow(&id).await,
        Err(EscrowError::InvalidEscrowReference(_))
    ));
    assert_eq!(h.status(&id).await.label(), "pending");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_finishes_submit_once() {
    let h = Arc::new(Harness::new());
    let id = h.escrowed(booking("25")).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.client.finish_escrow(&id, None).await })
        })
        .collect();

    let mut won = 0;
    for task in tasks {
        let outcome = task.await.unwrap();
        if outcome.success {
            won += 1;
        } else {
            assert_eq!(outcome.error.unwrap().kind, "InvalidStateTransition");
        }
    }
    assert_eq!(won, 1);

    let finishes = h
        .signer
        .transactions()
        .into_iter()
        .filter(|tx| tx["TransactionType"] == "EscrowFinish")
        .count();
    assert_eq!(finishes, 1);
}

#[tokio::test]
async fn cancel_waits_for_window() {
    let h = Harness::new();
    let mut request = booking("25");
    request.cancel_after = Some(h.now() + chrono::Duration::hours(1));
    let id = h.escrowed(request).await;

    let early = h.client.cancel_escrow(&id, "provider no-show", None).await;
    assert_eq!(early.error.unwrap().kind, "InvalidStateTransition");
    assert_eq!(h.signer.transactions().len(), 1);

    h.clock.advance(chrono::Duration::hours(2));
    let outcome = h.client.cancel_escrow(&id, "provider no-show", None).await;
    let request_id = outcome.signing_request_ref.unwrap().request_id;
    let tx = h.signer.transactions().pop().unwrap();
    assert_eq!(tx["TransactionType"], "EscrowCancel");
    assert_eq!(tx["OfferSequence"], 41);

    h.signer
        .sign(&request_id, payer().as_str(), Some("tesSUCCESS"));
    let snapshot = h.client.poll_escrow(&id).await.unwrap();
    assert_eq!(
        snapshot.status,
        EscrowStatus::Cancelled {
            reason: "provider no-show".into(),
            tx_hash: Some(format!("HASH-{request_id}")),
            at: h.now()
        }
    );
}

#[tokio::test]
async fn wrong_reference_fails_fast() {
    let h = Harness::new();
    let id = h.escrowed(booking("25")).await;

    let stale = EscrowReference {
        owner: payer(),
        sequence: 40,
    };
    let outcome = h.client.finish_escrow(&id, Some(&stale)).await;
    assert_eq!(outcome.error.unwrap().kind, "InvalidEscrowReference");
    assert_eq!(h.signer.transactions().len(), 1);
}

#[tokio::test]
async fn invalid_request_allocates_nothing() {
    let h = Harness::new();
    let mut request = booking("0");
    request.to = request.from.clone();

    let outcome = h.client.create_escrow(&request).await;
    assert!(outcome.escrow_contract.is_none());
    let error = outcome.error.unwrap();
    assert_eq!(error.kind, "InvalidEscrowParams");
    assert_eq!(error.fields, vec!["to", "amount"]);
    assert!(!error.retriable);
    assert!(h.store.is_empty().await);

    let mut request = booking("1");
    request.to = "not-an-address".into();
    let outcome = h.client.create_escrow(&request).await;
    assert_eq!(outcome.error.unwrap().kind, "InvalidAddress");
}

#[tokio::test]
async fn stale_escrows_expire() {
    let h = Harness::new();
    let mut request = booking("25");
    request.finish_after = Some(h.now() + chrono::Duration::hours(1));
    let id = h.escrowed(request).await;
    let fresh = h.escrowed(booking("5")).await;

    h.clock.advance(chrono::Duration::minutes(90));
    assert!(h.client.expire_stale().await.is_empty());

    h.clock.advance(chrono::Duration::minutes(31));
    assert_eq!(h.client.expire_stale().await, vec![id]);
    assert_eq!(h.status(&id).await.label(), "expired");
    assert_eq!(h.status(&fresh).await.label(), "pending");
}
