//! Payment intents, the transaction ledger and webhook fulfillment.
//!
//! Flow: a client creates an intent through a [`PaymentRail`], which is
//! recorded as `pending` by the [`TransactionLedger`] before the provider is
//! called. Provider webhooks are authenticated by
//! [`crate::webhooks`], decoded by the same rail, and handed to the
//! [`FulfillmentOrchestrator`], which settles the ledger row and writes the
//! [`AccessGrant`] exactly once.

pub mod distribution;
pub mod error;
pub mod fulfillment;
pub mod ledger;
pub mod rails;
pub mod routes;
pub mod service;
pub mod store;
pub mod types;

pub use distribution::{AccessNotice, ContentDistributor, NoopDistributor, OceanDropClient, OceanDropConfig};
pub use error::PaymentError;
pub use fulfillment::{FulfillmentOrchestrator, FulfillmentOutcome};
pub use ledger::{Settled, TransactionLedger, TransitionOutcome};
pub use rails::{
    Confirmation, ConfirmationOutcome, CryptoConfig, CryptoRail, IntentRequest, PaymentRail,
    PaymongoConfig, PaymongoRail, ProviderEvent, RailRegistry, Settlement, XenditConfig, XenditRail,
};
pub use routes::PaymentsModule;
pub use service::{CreateIntentRequest, CreatedIntent, IntentService};
pub use store::{InMemoryLedgerStore, LedgerStore};
pub use types::{AccessGrant, NewTransaction, PaymentMethod, Transaction, TransactionId, TransactionStatus};
