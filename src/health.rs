use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::app::AppContext;
use crate::payments::LedgerStore;

/// Health check status
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check result for a single component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Overall health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: Vec<ComponentHealth>,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status_code = match self.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status_code, Json(self)).into_response()
    }
}

/// Trait for implementing health checks
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ComponentHealth> + Send + '_>>;
}

/// Ledger store reachability.
pub struct LedgerStoreHealthCheck {
    store: Arc<dyn LedgerStore>,
}

impl LedgerStoreHealthCheck {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

impl HealthCheck for LedgerStoreHealthCheck {
    fn name(&self) -> &str {
        "ledger"
    }

    fn check(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ComponentHealth> + Send + '_>> {
        Box::pin(async move {
            match self.store.ping().await {
                Ok(()) => ComponentHealth {
                    name: self.name().to_string(),
                    status: HealthStatus::Healthy,
                    message: None,
                },
                Err(e) => ComponentHealth {
                    name: self.name().to_string(),
                    status: HealthStatus::Unhealthy,
                    message: Some(e.to_string()),
                },
            }
        })
    }
}

/// Reports which rails accept intents. No rails at all is degraded.
pub struct RailsHealthCheck {
    methods: Vec<String>,
}

impl RailsHealthCheck {
    pub fn new(methods: Vec<String>) -> Self {
        Self { methods }
    }
}

impl HealthCheck for RailsHealthCheck {
    fn name(&self) -> &str {
        "rails"
    }

    fn check(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ComponentHealth> + Send + '_>> {
        Box::pin(async move {
            let status = if self.methods.is_empty() {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };
            ComponentHealth {
                name: self.name().to_string(),
                status,
                message: Some(if self.methods.is_empty() {
                    "no payment rails configured".to_string()
                } else {
                    self.methods.join(",")
                }),
            }
        })
    }
}

/// Health check manager that runs all registered checks
pub struct HealthChecker {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    pub fn for_context(ctx: &AppContext) -> Self {
        let methods = ctx
            .configured_methods()
            .iter()
            .map(|m| m.to_string())
            .collect();
        Self::new()
            .with_check(Arc::new(LedgerStoreHealthCheck::new(ctx.store.clone())))
            .with_check(Arc::new(RailsHealthCheck::new(methods)))
    }

    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub async fn check_health(&self) -> HealthResponse {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        for check in &self.checks {
            let result = check.check().await;

            match result.status {
                HealthStatus::Unhealthy => overall_status = HealthStatus::Unhealthy,
                HealthStatus::Degraded if overall_status == HealthStatus::Healthy => {
                    overall_status = HealthStatus::Degraded
                }
                _ => {}
            }

            checks.push(result);
        }

        HealthResponse {
            status: overall_status,
            checks,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler for the health endpoint
pub async fn health_handler(State(ctx): State<AppContext>) -> HealthResponse {
    HealthChecker::for_context(&ctx).check_health().await
}
