use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, parse_http_url};
use crate::payments::{
    ContentDistributor, CryptoConfig, CryptoRail, FulfillmentOrchestrator, InMemoryLedgerStore,
    IntentService, LedgerStore, NoopDistributor, OceanDropClient, OceanDropConfig, PaymentMethod,
    PaymentRail, PaymongoConfig, PaymongoRail, RailRegistry, TransactionLedger, XenditConfig,
    XenditRail,
};
use crate::webhooks::{HmacSha256Verifier, WebhookVerifier};

/// Application context shared by every handler.
///
/// Holds explicitly constructed collaborators so tests can swap any of them
/// for a fake.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn LedgerStore>,
    pub orchestrator: FulfillmentOrchestrator,
    pub intents: IntentService,
    verifiers: Arc<HashMap<PaymentMethod, Arc<dyn WebhookVerifier>>>,
    distributor_name: &'static str,
}

impl AppContext {
    /// Context with an in-memory store, no rails and no distributor.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    /// Wire rails, verifiers and the distributor from configuration.
    ///
    /// Rails without credentials are left out, so intents for them fail with
    /// `UnsupportedMethod`. The ledger is held in memory.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let providers = &config.providers;
        let mut builder = Self::builder().with_notice_timeout(config.fulfillment.notice_timeout());

        let xendit = &providers.xendit;
        if let Some(secret_key) = &xendit.secret_key {
            let mut rail_config = XenditConfig::new(secret_key.as_str())?
                .redirect_urls(xendit.success_url.clone(), xendit.failure_url.clone())
                .timeout(providers.timeout());
            if let Some(base) = &xendit.api_base {
                rail_config = rail_config.api_base(parse_http_url("XENDIT_API_BASE", base)?);
            }
            builder = builder.with_rail(Arc::new(XenditRail::new(rail_config)?));
        }
        if let Some(secret) = &xendit.webhook_secret {
            builder = builder.with_verifier(
                PaymentMethod::Xendit,
                Arc::new(HmacSha256Verifier::xendit(secret.as_str())),
            );
        }

        let paymongo = &providers.paymongo;
        if let Some(secret_key) = &paymongo.secret_key {
            let mut rail_config = PaymongoConfig::new(secret_key.as_str())?.timeout(providers.timeout());
            if let Some(base) = &paymongo.api_base {
                rail_config = rail_config.api_base(parse_http_url("PAYMONGO_API_BASE", base)?);
            }
            builder = builder.with_rail(Arc::new(PaymongoRail::new(rail_config)?));
        }
        if let Some(secret) = &paymongo.webhook_secret {
            builder = builder.with_verifier(
                PaymentMethod::Paymongo,
                Arc::new(HmacSha256Verifier::paymongo(secret.as_str())),
            );
        }

        let crypto = &providers.crypto;
        if let (Some(rpc_url), Some(from)) = (&crypto.rpc_url, &crypto.from_address) {
            let rail_config = CryptoConfig::new(parse_http_url("ETH_RPC_URL", rpc_url)?, from.as_str())
                .settlement_timeout(crypto.settlement_timeout())
                .poll_interval(crypto.poll_interval())
                .request_timeout(providers.timeout());
            builder = builder.with_rail(Arc::new(CryptoRail::new(rail_config)?));
        }

        let fulfillment = &config.fulfillment;
        if let (Some(api_key), Some(base_url)) =
            (&fulfillment.oceandrop_api_key, &fulfillment.oceandrop_base_url)
        {
            let client = OceanDropClient::new(OceanDropConfig::new(
                api_key.as_str(),
                parse_http_url("OCEANDROP_BASE_URL", base_url)?,
            ))?;
            builder = builder.with_distributor(Arc::new(client));
        }

        Ok(builder.build())
    }

    /// Webhook verifier for `method`, if its secret is configured.
    pub fn verifier(&self, method: PaymentMethod) -> Option<Arc<dyn WebhookVerifier>> {
        self.verifiers.get(&method).cloned()
    }

    /// Rails that accept intents.
    pub fn configured_methods(&self) -> Vec<PaymentMethod> {
        self.orchestrator.rails().methods()
    }

    pub fn distributor_name(&self) -> &'static str {
        self.distributor_name
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for AppContext with fluent API
#[must_use = "builder does nothing until you call build()"]
pub struct AppContextBuilder {
    store: Option<Arc<dyn LedgerStore>>,
    rails: RailRegistry,
    verifiers: HashMap<PaymentMethod, Arc<dyn WebhookVerifier>>,
    distributor: Option<Arc<dyn ContentDistributor>>,
    notice_timeout: Duration,
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            rails: RailRegistry::new(),
            verifiers: HashMap::new(),
            distributor: None,
            notice_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_rail(mut self, rail: Arc<dyn PaymentRail>) -> Self {
        self.rails.register(rail);
        self
    }

    pub fn with_verifier(mut self, method: PaymentMethod, verifier: Arc<dyn WebhookVerifier>) -> Self {
        self.verifiers.insert(method, verifier);
        self
    }

    pub fn with_distributor(mut self, distributor: Arc<dyn ContentDistributor>) -> Self {
        self.distributor = Some(distributor);
        self
    }

    pub fn with_notice_timeout(mut self, timeout: Duration) -> Self {
        self.notice_timeout = timeout;
        self
    }

    pub fn build(self) -> AppContext {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryLedgerStore::new()));
        let distributor = self
            .distributor
            .unwrap_or_else(|| Arc::new(NoopDistributor));
        let distributor_name = distributor.name();

        let orchestrator = FulfillmentOrchestrator::new(
            TransactionLedger::new(store.clone()),
            self.rails,
            distributor,
            self.notice_timeout,
        );

        AppContext {
            store,
            intents: IntentService::new(orchestrator.clone()),
            orchestrator,
            verifiers: Arc::new(self.verifiers),
            distributor_name,
        }
    }
}

impl Default for AppContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
