//! Inbound webhook authentication.
//!
//! Every provider callback is checked here, over the raw request bytes,
//! before it is allowed anywhere near the ledger.

pub mod verification;

pub use verification::{
    DigestEncoding, HmacSha256Verifier, VerifierConfig, WebhookVerifier, sign, verify,
};
