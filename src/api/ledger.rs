//! Agent and ledger endpoints
//!
//! `/v1/agent/:kind`, `/v1/agent/:kind/:account`,
//! `/v1/ledger/changeToLoyaltyToken` and `/v1/ledger/changeToPayablePoint`.

use ethereum_types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

use super::generic::{json_body, reply, with_service};
use crate::crypto;
use crate::error::{RelayError, RelayResult};
use crate::gateway::AgentKind;
use crate::ledger_relay::LedgerRelay;

#[derive(Debug, Deserialize)]
pub struct RegisterAgentBody {
    pub account: Address,
    pub agent: Address,
    #[serde(with = "crypto::serde_hex")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub account: Address,
    pub agent: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
}

#[derive(Debug, Deserialize)]
pub struct LoyaltyTokenBody {
    pub account: Address,
    #[serde(with = "crypto::serde_hex")]
    pub signature: Vec<u8>,
}

/// `phone` is the 32-byte hash of the phone number.
#[derive(Debug, Deserialize)]
pub struct PayablePointBody {
    pub phone: H256,
    pub account: Address,
    #[serde(with = "crypto::serde_hex")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerResponse {
    pub account: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<H256>,
    pub tx_hash: H256,
}

fn parse_kind(kind: &str) -> RelayResult<AgentKind> {
    kind.parse::<AgentKind>().map_err(RelayError::Validation)
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn register_agent(kind: &str, body: RegisterAgentBody, ledger: &LedgerRelay) -> RelayResult<AgentResponse> {
    let kind = parse_kind(kind)?;
    let tx_hash = ledger
        .register_agent(kind, body.account, body.agent, body.signature)
        .await?;
    Ok(AgentResponse {
        account: body.account,
        agent: Some(body.agent),
        tx_hash: Some(tx_hash),
    })
}

async fn agent_of(kind: &str, account: &str, ledger: &LedgerRelay) -> RelayResult<AgentResponse> {
    let kind = parse_kind(kind)?;
    let account = crypto::parse_address(account)
        .map_err(|e| RelayError::validation(format!("invalid account: {}", e)))?;
    let agent = ledger.agent_of(kind, &account).await?;
    Ok(AgentResponse {
        account,
        agent,
        tx_hash: None,
    })
}

pub async fn register_agent_handler(
    kind: String,
    body: RegisterAgentBody,
    ledger: Arc<LedgerRelay>,
) -> Result<warp::reply::Json, Rejection> {
    reply(register_agent(&kind, body, &ledger).await)
}

pub async fn agent_of_handler(
    kind: String,
    account: String,
    ledger: Arc<LedgerRelay>,
) -> Result<warp::reply::Json, Rejection> {
    reply(agent_of(&kind, &account, &ledger).await)
}

pub async fn change_to_loyalty_token_handler(
    body: LoyaltyTokenBody,
    ledger: Arc<LedgerRelay>,
) -> Result<warp::reply::Json, Rejection> {
    let result = ledger
        .change_to_loyalty_token(body.account, body.signature)
        .await
        .map(|tx_hash| LedgerResponse {
            account: body.account,
            phone: None,
            tx_hash,
        });
    reply(result)
}

pub async fn change_to_payable_point_handler(
    body: PayablePointBody,
    ledger: Arc<LedgerRelay>,
) -> Result<warp::reply::Json, Rejection> {
    let result = ledger
        .change_to_payable_point(body.phone, body.account, body.signature)
        .await
        .map(|tx_hash| LedgerResponse {
            account: body.account,
            phone: Some(body.phone),
            tx_hash,
        });
    reply(result)
}

// ============================================================================
// ROUTES
// ============================================================================

pub fn routes(ledger: Arc<LedgerRelay>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let register_agent_route = warp::path!("v1" / "agent" / String)
        .and(warp::post())
        .and(json_body::<RegisterAgentBody>())
        .and(with_service(ledger.clone()))
        .and_then(register_agent_handler);

    let agent_of_route = warp::path!("v1" / "agent" / String / String)
        .and(warp::get())
        .and(with_service(ledger.clone()))
        .and_then(agent_of_handler);

    let loyalty_token = warp::path!("v1" / "ledger" / "changeToLoyaltyToken")
        .and(warp::post())
        .and(json_body::<LoyaltyTokenBody>())
        .and(with_service(ledger.clone()))
        .and_then(change_to_loyalty_token_handler);

    let payable_point = warp::path!("v1" / "ledger" / "changeToPayablePoint")
        .and(warp::post())
        .and(json_body::<PayablePointBody>())
        .and(with_service(ledger))
        .and_then(change_to_payable_point_handler);

    register_agent_route.or(agent_of_route).or(loyalty_token).or(payable_point)
}
