//! In-process HTTP testing for the payments router.
//!
//! Requests are driven through the router with `tower::ServiceExt::oneshot`,
//! so no socket is opened. Webhook bodies are sent as raw bytes to keep the
//! signed payload byte-for-byte intact.
//!
//! # Example
//!
//! ```rust,ignore
//! use ossy_payments::{App, AppContext, PaymentsModule, testing};
//!
//! #[tokio::test]
//! async fn test_health() {
//!     let app = App::builder()
//!         .with_context(AppContext::new())
//!         .register_module(PaymentsModule)
//!         .build()
//!         .into_test_router();
//!
//!     testing::get(app, "/health")
//!         .execute()
//!         .await
//!         .assert_ok()
//!         .assert_json_path("status", serde_json::json!("degraded"))
//!         .await;
//! }
//! ```

mod scenario;

pub use scenario::{Scenario, ScenarioAssert, get, post};
