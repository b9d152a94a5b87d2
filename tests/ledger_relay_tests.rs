//! Unit tests for the ledger relay

use ethereum_types::{Address, H256, U256};
use std::sync::Arc;

use loyalty_relay::crypto::{self, purpose};
use loyalty_relay::error::ErrorCode;
use loyalty_relay::gateway::{AgentKind, ContractCall};
use loyalty_relay::ledger_relay::LedgerRelay;

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{address, key, sign, signer_pool, FakeGateway, SIDE_CHAIN_ID};

const ACCOUNT: u8 = 0x0a;

fn relay() -> (Arc<FakeGateway>, LedgerRelay) {
    let gateway = Arc::new(FakeGateway::side());
    let relay = LedgerRelay::new(gateway.clone(), Arc::new(signer_pool()));
    (gateway, relay)
}

/// Test that each agent kind is registered under its own purpose
/// What is tested: a withdrawal signature registers the withdrawal agent only
/// Why: a provision registration must not be replayable as another role
#[tokio::test]
async fn test_register_agent_per_kind() {
    let (gateway, relay) = relay();
    let account = address(ACCOUNT);
    let agent = address(0x0b);

    let digest = crypto::agent_message(
        purpose::REGISTER_WITHDRAWAL_AGENT,
        &account,
        &agent,
        U256::zero(),
        SIDE_CHAIN_ID,
    );
    let signature = sign(&key(ACCOUNT), &digest);

    let err = relay
        .register_agent(AgentKind::Provision, account, agent, signature.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidSignature);

    relay
        .register_agent(AgentKind::Withdrawal, account, agent, signature.clone())
        .await
        .unwrap();
    assert_eq!(relay.agent_of(AgentKind::Withdrawal, &account).await.unwrap(), Some(agent));
    assert_eq!(relay.agent_of(AgentKind::Provision, &account).await.unwrap(), None);

    // The nonce moved, so the same signature is now stale.
    let err = relay
        .register_agent(AgentKind::Withdrawal, account, agent, signature)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidSignature);
    assert_eq!(gateway.sent_count(), 1);
}

/// Test the zero account guard
/// What is tested: register_agent rejects the zero address before any lookup
/// Why: the zero address can never have signed the message
#[tokio::test]
async fn test_register_agent_zero_account() {
    let (gateway, relay) = relay();

    let err = relay
        .register_agent(AgentKind::Refund, Address::zero(), address(0x0b), vec![0u8; 65])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);
    assert_eq!(gateway.sent_count(), 0);
}

/// Test the payable point switch
/// What is tested: the signature binds the phone hash; the relayed call carries it
/// Why: points held under one phone must not move to an account signed for another
#[tokio::test]
async fn test_change_to_payable_point() {
    let (gateway, relay) = relay();
    let account = address(ACCOUNT);
    let phone = crypto::keccak256(b"+82-10-0000-0000");
    let digest = crypto::payable_point_message(&phone, &account, U256::zero(), SIDE_CHAIN_ID);
    let signature = sign(&key(ACCOUNT), &digest);

    let err = relay
        .change_to_payable_point(H256::from_low_u64_be(1), account, signature.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidSignature);

    relay.change_to_payable_point(phone, account, signature).await.unwrap();
    match gateway.sent_calls().as_slice() {
        [ContractCall::ChangeToPayablePoint { phone_hash, account: sent, .. }] => {
            assert_eq!(*phone_hash, phone);
            assert_eq!(*sent, account);
        }
        other => panic!("unexpected calls: {:?}", other),
    }
}

/// Test that a transport failure surfaces as infrastructure and frees the signer
/// What is tested: change_to_loyalty_token when the node fails
/// Why: callers retry infrastructure errors, and the wallet must return to the pool
#[tokio::test]
async fn test_change_to_loyalty_token_transport_failure() {
    let gateway = Arc::new(FakeGateway::side());
    let pool = Arc::new(signer_pool());
    let relay = LedgerRelay::new(gateway.clone(), pool.clone());
    let account = address(ACCOUNT);
    let digest = crypto::account_message(purpose::CHANGE_TO_LOYALTY_TOKEN, &account, U256::zero(), SIDE_CHAIN_ID);
    gateway.state.lock().unwrap().fail_next = Some("connection refused".to_string());

    let err = relay
        .change_to_loyalty_token(account, sign(&key(ACCOUNT), &digest))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Infrastructure);
    assert!(err.is_retriable());
    assert_eq!(pool.available(loyalty_relay::config::Network::Side), 2);
}
