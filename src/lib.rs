//! ossy-payments - payment intents and webhook fulfillment for a creator
//! video marketplace
//!
//! Buyers pay for videos through one of several rails (two fiat gateways and
//! an on-chain transfer). Every intent is written to a transaction ledger
//! before the provider is called; provider confirmations are authenticated,
//! applied to the ledger exactly once, and turned into an access grant that
//! the download path checks.
//!
//! # Features
//!
//! - **Rails**: Xendit invoices, PayMongo payments and EVM JSON-RPC transfers
//! - **Webhooks**: HMAC-SHA256 verification over the raw request body
//! - **Ledger**: compare-and-save state machine, `pending -> paid | failed`
//! - **Fulfillment**: idempotent access grants plus a best-effort notice to
//!   the content distributor
//! - **Testing**: in-process HTTP scenarios
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ossy_payments::{App, AppContext, ConfigBuilder, PaymentsModule};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     ossy_payments::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build()?;
//!     let context = AppContext::from_config(&config)?;
//!
//!     App::builder()
//!         .with_config(config)
//!         .with_context(context)
//!         .register_module(PaymentsModule)
//!         .build()
//!         .serve()
//!         .await?;
//!     Ok(())
//! }
//! ```

mod app;
mod config;
mod core;
mod error;
pub mod health;
mod http;
pub mod payments;
pub mod testing;
pub mod utils;
pub mod webhooks;

// Re-exports for public API
pub use app::{AppContext, AppContextBuilder};
pub use config::{
    Config, ConfigBuilder, CryptoSettings, FulfillmentConfig, LoggingConfig, PaymongoSettings,
    ProvidersConfig, ServerConfig, XenditSettings,
};
pub use core::{App, AppBuilder, MakeRequestUuid};
pub use error::{ApiError, ErrorResponse, Result};
pub use health::{ComponentHealth, HealthCheck, HealthChecker, HealthStatus};
pub use http::{ApiResponse, JsonResponse, RouteModule};
pub use payments::{
    AccessGrant, FulfillmentOrchestrator, FulfillmentOutcome, IntentService, PaymentError,
    PaymentMethod, PaymentsModule, Transaction, TransactionId, TransactionLedger, TransactionStatus,
};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in main(), before building the App.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "ossy::payments=debug")
/// - `OSSY_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = utils::get_env_with_prefix("LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing from a loaded configuration
///
/// `RUST_LOG` still takes precedence over `logging.level` when set.
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
