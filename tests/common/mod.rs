//! Shared fakes for the integration tests: rails that never leave the
//! process, a distributor that records notices, and provider-style signing.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;

use ossy_payments::payments::rails::{
    Confirmation, ConfirmationOutcome, IntentRequest, PaymentRail, ProviderEvent, Settlement,
};
use ossy_payments::payments::{
    AccessNotice, ContentDistributor, InMemoryLedgerStore, PaymongoConfig, PaymongoRail,
    XenditConfig, XenditRail,
};
use ossy_payments::webhooks::HmacSha256Verifier;
use ossy_payments::{App, AppContext, PaymentError, PaymentMethod, PaymentsModule, TransactionId};

pub const XENDIT_SECRET: &str = "xnd_callback_token";
pub const PAYMONGO_SECRET: &str = "whsk_paymongo_test";

/// How a fake rail answers `create_intent`.
#[derive(Clone)]
pub enum IntentReply {
    Accept(Value),
    Reject { status: u16, body: Value },
}

/// Rail that answers from memory; field checks and webhook decoding use the
/// real rail.
pub struct FakeRail {
    method: PaymentMethod,
    reply: IntentReply,
    settlement: Option<ConfirmationOutcome>,
    parser: Option<Arc<dyn PaymentRail>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<IntentRequest>>,
}

impl FakeRail {
    pub fn xendit() -> Self {
        let parser = XenditRail::new(XenditConfig::new("xnd_unused").unwrap()).unwrap();
        Self::new(PaymentMethod::Xendit, Some(Arc::new(parser)))
    }

    pub fn paymongo() -> Self {
        let parser = PaymongoRail::new(PaymongoConfig::new("sk_unused").unwrap()).unwrap();
        Self::new(PaymentMethod::Paymongo, Some(Arc::new(parser)))
    }

    /// Crypto rail whose transfer settles with `outcome`, or times out when `None`.
    pub fn crypto(outcome: Option<ConfirmationOutcome>) -> Self {
        let mut rail = Self::new(PaymentMethod::Crypto, None);
        rail.reply = IntentReply::Accept(json!({ "txHash": "0xabc123" }));
        rail.settlement = outcome;
        rail
    }

    fn new(method: PaymentMethod, parser: Option<Arc<dyn PaymentRail>>) -> Self {
        Self {
            method,
            reply: IntentReply::Accept(json!({ "id": "prov_1", "status": "PENDING" })),
            settlement: None,
            parser,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn rejecting(mut self, status: u16, body: Value) -> Self {
        self.reply = IntentReply::Reject { status, body };
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<IntentRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentRail for FakeRail {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    fn validate_intent(&self, request: &IntentRequest) -> Result<(), PaymentError> {
        match &self.parser {
            Some(parser) => parser.validate_intent(request),
            None => Ok(()),
        }
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<Value, PaymentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        match &self.reply {
            IntentReply::Accept(body) => {
                let mut body = body.clone();
                body["external_id"] = json!(request.transaction_id.as_str());
                Ok(body)
            }
            IntentReply::Reject { status, body } => {
                let mut marked = body.clone();
                marked["error"] = json!(true);
                Err(PaymentError::Provider {
                    method: self.method,
                    message: body["message"].as_str().unwrap_or("rejected").to_string(),
                    http_status: Some(*status),
                    response: Some(marked),
                })
            }
        }
    }

    fn parse_event(&self, payload: &Value) -> Result<ProviderEvent, PaymentError> {
        match &self.parser {
            Some(parser) => parser.parse_event(payload),
            None => Err(PaymentError::malformed(self.method, "rail has no webhook channel")),
        }
    }

    async fn await_settlement(
        &self,
        transaction_id: &TransactionId,
        provider_response: &Value,
    ) -> Result<Settlement, PaymentError> {
        if self.method != PaymentMethod::Crypto {
            return Ok(Settlement::Deferred);
        }
        Ok(match &self.settlement {
            Some(outcome) => Settlement::Settled(Confirmation {
                method: self.method,
                transaction_id: transaction_id.clone(),
                outcome: outcome.clone(),
                payload: json!({ "txHash": provider_response["txHash"], "status": "0x1" }),
            }),
            None => Settlement::TimedOut,
        })
    }
}

/// Distributor that records every notice it receives.
#[derive(Default)]
pub struct RecordingDistributor {
    notices: Mutex<Vec<AccessNotice>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingDistributor {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn notices(&self) -> Vec<AccessNotice> {
        self.notices.lock().unwrap().clone()
    }

    /// Wait until at least `count` notices arrived, or give up after a second.
    pub async fn wait_for(&self, count: usize) -> Vec<AccessNotice> {
        for _ in 0..100 {
            let notices = self.notices();
            if notices.len() >= count {
                return notices;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.notices()
    }
}

#[async_trait]
impl ContentDistributor for RecordingDistributor {
    async fn grant_access(&self, notice: &AccessNotice) -> Result<(), PaymentError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.notices.lock().unwrap().push(notice.clone());
        if self.fail {
            return Err(PaymentError::FulfillmentNotice {
                message: "distributor unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn revoke_access(&self, _notice: &AccessNotice) -> Result<(), PaymentError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// A fully wired app with fake rails and verifiers for both fiat providers.
pub struct Harness {
    pub router: Router,
    pub store: Arc<InMemoryLedgerStore>,
    pub distributor: Arc<RecordingDistributor>,
    pub xendit: Arc<FakeRail>,
    pub paymongo: Arc<FakeRail>,
    pub crypto: Arc<FakeRail>,
}

pub struct HarnessBuilder {
    xendit: FakeRail,
    paymongo: FakeRail,
    crypto: FakeRail,
    distributor: RecordingDistributor,
    notice_timeout: Duration,
}

impl HarnessBuilder {
    pub fn xendit(mut self, rail: FakeRail) -> Self {
        self.xendit = rail;
        self
    }

    pub fn crypto(mut self, rail: FakeRail) -> Self {
        self.crypto = rail;
        self
    }

    pub fn distributor(mut self, distributor: RecordingDistributor) -> Self {
        self.distributor = distributor;
        self
    }

    pub fn notice_timeout(mut self, timeout: Duration) -> Self {
        self.notice_timeout = timeout;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(InMemoryLedgerStore::new());
        let distributor = Arc::new(self.distributor);
        let xendit = Arc::new(self.xendit);
        let paymongo = Arc::new(self.paymongo);
        let crypto = Arc::new(self.crypto);

        let context = AppContext::builder()
            .with_store(store.clone())
            .with_rail(xendit.clone())
            .with_rail(paymongo.clone())
            .with_rail(crypto.clone())
            .with_verifier(PaymentMethod::Xendit, Arc::new(HmacSha256Verifier::xendit(XENDIT_SECRET)))
            .with_verifier(
                PaymentMethod::Paymongo,
                Arc::new(HmacSha256Verifier::paymongo(PAYMONGO_SECRET)),
            )
            .with_distributor(distributor.clone())
            .with_notice_timeout(self.notice_timeout)
            .build();

        let router = App::builder()
            .with_context(context)
            .register_module(PaymentsModule)
            .build()
            .into_test_router();

        Harness {
            router,
            store,
            distributor,
            xendit,
            paymongo,
            crypto,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            xendit: FakeRail::xendit(),
            paymongo: FakeRail::paymongo(),
            crypto: FakeRail::crypto(Some(ConfirmationOutcome::Paid)),
            distributor: RecordingDistributor::default(),
            notice_timeout: Duration::from_secs(5),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

fn hmac_sha256(secret: &str, body: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Hex signature as sent in `x-callback-signature`.
pub fn xendit_signature(body: &[u8]) -> String {
    hex::encode(hmac_sha256(XENDIT_SECRET, body))
}

/// Base64 signature as sent in `paymongo-signature`.
pub fn paymongo_signature(body: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(hmac_sha256(PAYMONGO_SECRET, body))
}

pub fn intent_body(method: &str, user_id: &str, video_id: &str) -> Value {
    json!({
        "method": method,
        "amount": 500,
        "currency": "php",
        "payerEmail": "buyer@example.com",
        "sourceType": "gcash",
        "details": { "to": "0x2222222222222222222222222222222222222222", "amountWei": "1000" },
        "videoId": video_id,
        "userId": user_id,
    })
}

pub fn xendit_paid(transaction_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "inv_123",
        "external_id": transaction_id,
        "status": "PAID",
        "paid_amount": 500,
    }))
    .unwrap()
}

pub fn paymongo_event(event_type: &str, transaction_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "data": {
            "id": "evt_1",
            "attributes": {
                "type": event_type,
                "client_ref_id": transaction_id,
                "data": {
                    "id": "pay_1",
                    "attributes": { "failed_message": "card declined" }
                }
            }
        }
    }))
    .unwrap()
}
