//! Batch commit endpoints
//!
//! The proposer posts a batch together with the validator signatures it
//! collected; the relay endorses and submits it.

use serde::Deserialize;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

use super::generic::{json_body, reply, with_service};
use crate::batch::{BatchCommitter, CurrencyRateSet, PurchaseBatch};
use crate::crypto;
use crate::error::{RelayError, RelayResult};

#[derive(Debug, Deserialize)]
pub struct PurchaseCommitBody {
    pub batch: PurchaseBatch,
    /// Hex validator signatures over the batch digest
    pub signatures: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RateCommitBody {
    pub rates: CurrencyRateSet,
    pub signatures: Vec<String>,
}

fn decode_signatures(signatures: &[String]) -> RelayResult<Vec<Vec<u8>>> {
    signatures
        .iter()
        .map(|s| {
            crypto::hex_to_bytes(s).map_err(|e| RelayError::validation(format!("invalid signature: {}", e)))
        })
        .collect()
}

pub async fn commit_purchase_handler(
    body: PurchaseCommitBody,
    committer: Arc<BatchCommitter>,
) -> Result<warp::reply::Json, Rejection> {
    let result = match decode_signatures(&body.signatures) {
        Ok(signatures) => committer.commit_purchases(body.batch, signatures).await,
        Err(e) => Err(e),
    };
    reply(result)
}

pub async fn commit_rate_handler(
    body: RateCommitBody,
    committer: Arc<BatchCommitter>,
) -> Result<warp::reply::Json, Rejection> {
    let result = match decode_signatures(&body.signatures) {
        Ok(signatures) => committer.commit_rates(body.rates, signatures).await,
        Err(e) => Err(e),
    };
    reply(result)
}

pub fn routes(committer: Arc<BatchCommitter>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let purchase = warp::path!("v1" / "batch" / "purchase")
        .and(warp::post())
        .and(json_body::<PurchaseCommitBody>())
        .and(with_service(committer.clone()))
        .and_then(commit_purchase_handler);

    let rate = warp::path!("v1" / "batch" / "rate")
        .and(warp::post())
        .and(json_body::<RateCommitBody>())
        .and(with_service(committer))
        .and_then(commit_rate_handler);

    purchase.or(rate)
}
