//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    address, build_orchestrator, build_test_config, key, sign, signer_pool, FakeGateway, FakeState,
    RecordingCallback, DUMMY_AMOUNT, DUMMY_CURRENCY, DUMMY_PURCHASE_ID, SIDE_CHAIN_ID, MAIN_CHAIN_ID,
};
