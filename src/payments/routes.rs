//! HTTP surface of the payments core, mounted under `/payments`.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use super::error::PaymentError;
use super::service::CreateIntentRequest;
use super::types::{AccessGrant, PaymentMethod, Transaction, TransactionId, TransactionStatus};
use crate::app::AppContext;
use crate::error::{ApiError, Result};
use crate::http::{ApiResponse, JsonResponse, RouteModule};

pub struct PaymentsModule;

impl RouteModule for PaymentsModule {
    fn routes(&self) -> Router<AppContext> {
        Router::new()
            .route("/create-intent", post(create_intent))
            .route("/webhook/{provider}", post(webhook))
            .route("/transactions/{id}", get(get_transaction))
            .route("/transactions/{id}/reconcile", post(reconcile))
            .route("/access/{user_id}", get(list_access))
            .route("/access/{user_id}/{video_id}", get(check_access))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/payments")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub success: bool,
    pub data: Value,
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheck {
    pub granted: bool,
    pub granted_at: DateTime<Utc>,
    pub transaction_id: TransactionId,
}

impl From<AccessGrant> for AccessCheck {
    fn from(grant: AccessGrant) -> Self {
        Self {
            granted: true,
            granted_at: grant.granted_at,
            transaction_id: grant.transaction_id,
        }
    }
}

async fn create_intent(State(ctx): State<AppContext>, body: Bytes) -> Response {
    let request: CreateIntentRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return ApiResponse::<()>::error(format!("Invalid request body: {}", e)).into_response(),
    };

    match ctx.intents.create_intent(request).await {
        Ok(created) => Json(IntentResponse {
            success: true,
            data: created.provider_response,
            transaction_id: created.transaction.id,
            status: created.transaction.status,
        })
        .into_response(),
        Err(err @ (PaymentError::Store { .. } | PaymentError::ConcurrentModification { .. })) => {
            ApiError::from(err).into_response()
        }
        Err(err) => ApiResponse::<()>::error(err.to_string()).into_response(),
    }
}

async fn webhook(
    State(ctx): State<AppContext>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let method = match provider.parse::<PaymentMethod>() {
        Ok(method) if method != PaymentMethod::Crypto => method,
        _ => return Err(ApiError::not_found(format!("No webhook endpoint for '{}'", provider))),
    };

    let verifier = ctx.verifier(method).ok_or_else(|| PaymentError::Authentication {
        provider: method.to_string(),
        reason: "webhook secret not configured".to_string(),
    })?;
    verifier.verify_request(method.as_str(), &headers, &body)?;

    let outcome = ctx.orchestrator.handle_webhook(method, &body).await?;
    tracing::debug!(
        target: "ossy::payments::webhooks",
        provider = %method,
        transaction_id = %outcome.transaction_id(),
        "Webhook processed"
    );

    Ok(Json(json!({ "received": true })))
}

async fn get_transaction(State(ctx): State<AppContext>, Path(id): Path<String>) -> JsonResponse<Transaction> {
    Ok(Json(ctx.intents.get_transaction(&id).await?))
}

async fn reconcile(State(ctx): State<AppContext>, Path(id): Path<String>) -> JsonResponse<Transaction> {
    Ok(Json(ctx.intents.reconcile(&id).await?))
}

async fn check_access(
    State(ctx): State<AppContext>,
    Path((user_id, video_id)): Path<(String, String)>,
) -> JsonResponse<AccessCheck> {
    ctx.intents
        .access_grant(&user_id, &video_id)
        .await?
        .map(|grant| Json(grant.into()))
        .ok_or_else(|| ApiError::forbidden("Video not purchased"))
}

async fn list_access(
    State(ctx): State<AppContext>,
    Path(user_id): Path<String>,
) -> Result<ApiResponse<Vec<AccessGrant>>> {
    let grants = ctx.intents.access_grants(&user_id).await?;
    Ok(ApiResponse::success(grants))
}
