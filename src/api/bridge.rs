//! Bridge endpoints: `/v1/bridge/withdraw` (side to main) and `/v1/bridge/deposit` (main to side).

use ethereum_types::{Address, U256};
use serde::Deserialize;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

use super::generic::{json_body, reply, with_service};
use crate::bridge::{BridgeRelay, TransferRequest};
use crate::crypto;

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    pub account: Address,
    #[serde(with = "crypto::serde_u256_dec")]
    pub amount: U256,
    pub expiry: u64,
    #[serde(with = "crypto::serde_hex")]
    pub signature: Vec<u8>,
}

impl From<TransferBody> for TransferRequest {
    fn from(body: TransferBody) -> Self {
        TransferRequest {
            account: body.account,
            amount: body.amount,
            expiry: body.expiry,
            signature: body.signature,
        }
    }
}

pub async fn withdraw_handler(body: TransferBody, bridge: Arc<BridgeRelay>) -> Result<warp::reply::Json, Rejection> {
    reply(bridge.withdraw(body.into()).await)
}

pub async fn deposit_handler(body: TransferBody, bridge: Arc<BridgeRelay>) -> Result<warp::reply::Json, Rejection> {
    reply(bridge.deposit(body.into()).await)
}

pub fn routes(bridge: Arc<BridgeRelay>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let withdraw = warp::path!("v1" / "bridge" / "withdraw")
        .and(warp::post())
        .and(json_body::<TransferBody>())
        .and(with_service(bridge.clone()))
        .and_then(withdraw_handler);

    let deposit = warp::path!("v1" / "bridge" / "deposit")
        .and(warp::post())
        .and(json_body::<TransferBody>())
        .and(with_service(bridge))
        .and_then(deposit_handler);

    withdraw.or(deposit)
}
