//! Payment endpoints
//!
//! `/v1/payment/new/{open|approval|close}`, `/v1/payment/cancel/{open|approval|close}`
//! and `/v1/payment/info/:id`.

use ethereum_types::{Address, H256, U256};
use serde::Deserialize;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

use super::generic::{json_body, reply, with_service};
use crate::crypto;
use crate::error::RelayError;
use crate::payment::{NewPaymentRequest, PaymentOrchestrator};

type Orchestrator = Arc<PaymentOrchestrator>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenNewBody {
    pub purchase_id: String,
    #[serde(with = "crypto::serde_u256_dec")]
    pub amount: U256,
    pub currency: String,
    pub shop_id: H256,
    pub account: Address,
}

/// Approval or denial of a phase by its principal.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalBody {
    pub payment_id: H256,
    pub approval: bool,
    #[serde(with = "crypto::serde_hex")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseBody {
    pub payment_id: H256,
    pub confirm: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIdBody {
    pub payment_id: H256,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn open_new_handler(body: OpenNewBody, orchestrator: Orchestrator) -> Result<warp::reply::Json, Rejection> {
    reply(
        orchestrator
            .open_new(NewPaymentRequest {
                purchase_id: body.purchase_id,
                amount: body.amount,
                currency: body.currency,
                shop_id: body.shop_id,
                account: body.account,
            })
            .await,
    )
}

pub async fn approve_new_handler(body: ApprovalBody, orchestrator: Orchestrator) -> Result<warp::reply::Json, Rejection> {
    reply(
        orchestrator
            .approve_new(&body.payment_id, body.approval, body.signature)
            .await,
    )
}

pub async fn close_new_handler(body: CloseBody, orchestrator: Orchestrator) -> Result<warp::reply::Json, Rejection> {
    reply(orchestrator.close_new(&body.payment_id, body.confirm).await)
}

pub async fn open_cancel_handler(body: PaymentIdBody, orchestrator: Orchestrator) -> Result<warp::reply::Json, Rejection> {
    reply(orchestrator.open_cancel(&body.payment_id).await)
}

pub async fn approve_cancel_handler(body: ApprovalBody, orchestrator: Orchestrator) -> Result<warp::reply::Json, Rejection> {
    reply(
        orchestrator
            .approve_cancel(&body.payment_id, body.approval, body.signature)
            .await,
    )
}

pub async fn close_cancel_handler(body: CloseBody, orchestrator: Orchestrator) -> Result<warp::reply::Json, Rejection> {
    reply(orchestrator.close_cancel(&body.payment_id, body.confirm).await)
}

pub async fn info_handler(payment_id: String, orchestrator: Orchestrator) -> Result<warp::reply::Json, Rejection> {
    let result = match crypto::parse_h256(&payment_id) {
        Ok(id) => orchestrator.payment_info(&id).await,
        Err(e) => Err(RelayError::validation(format!("invalid payment id: {}", e))),
    };
    reply(result)
}

// ============================================================================
// ROUTES
// ============================================================================

pub fn routes(orchestrator: Orchestrator) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let open_new = warp::path!("v1" / "payment" / "new" / "open")
        .and(warp::post())
        .and(json_body::<OpenNewBody>())
        .and(with_service(orchestrator.clone()))
        .and_then(open_new_handler);

    let approve_new = warp::path!("v1" / "payment" / "new" / "approval")
        .and(warp::post())
        .and(json_body::<ApprovalBody>())
        .and(with_service(orchestrator.clone()))
        .and_then(approve_new_handler);

    let close_new = warp::path!("v1" / "payment" / "new" / "close")
        .and(warp::post())
        .and(json_body::<CloseBody>())
        .and(with_service(orchestrator.clone()))
        .and_then(close_new_handler);

    let open_cancel = warp::path!("v1" / "payment" / "cancel" / "open")
        .and(warp::post())
        .and(json_body::<PaymentIdBody>())
        .and(with_service(orchestrator.clone()))
        .and_then(open_cancel_handler);

    let approve_cancel = warp::path!("v1" / "payment" / "cancel" / "approval")
        .and(warp::post())
        .and(json_body::<ApprovalBody>())
        .and(with_service(orchestrator.clone()))
        .and_then(approve_cancel_handler);

    let close_cancel = warp::path!("v1" / "payment" / "cancel" / "close")
        .and(warp::post())
        .and(json_body::<CloseBody>())
        .and(with_service(orchestrator.clone()))
        .and_then(close_cancel_handler);

    let info = warp::path!("v1" / "payment" / "info" / String)
        .and(warp::get())
        .and(with_service(orchestrator))
        .and_then(info_handler);

    open_new
        .or(approve_new)
        .or(close_new)
        .or(open_cancel)
        .or(approve_cancel)
        .or(close_cancel)
        .or(info)
}
