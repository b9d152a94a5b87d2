//! Unit tests for the validator batch-commit protocol

use ethereum_types::{H256, U256};
use std::sync::Arc;

use loyalty_relay::batch::{
    sign_batch, verify_purchase_senders, BatchCommitter, CommitError, CommitProof, CurrencyRate,
    CurrencyRateSet, PurchaseBatch, PurchaseRecord, ValidatorSet,
};
use loyalty_relay::crypto;
use loyalty_relay::error::ErrorCode;
use loyalty_relay::gateway::{BatchKind, ContractCall};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{address, key, signer_pool, FakeGateway, SIDE_CHAIN_ID};

const VALIDATORS: [u8; 3] = [0xa1, 0xa2, 0xa3];
const SENDER: u8 = 0x33;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn validator_set() -> ValidatorSet {
    ValidatorSet::new(VALIDATORS.iter().map(|seed| address(*seed)), 2)
}

fn record(purchase_id: &str) -> PurchaseRecord {
    let mut record = PurchaseRecord {
        purchase_id: purchase_id.to_string(),
        amount: U256::from(10_000u64),
        loyalty: U256::from(100u64),
        currency: "krw".to_string(),
        shop_id: H256::from_low_u64_be(0x5109),
        account: address(0x0a),
        phone_hash: H256::zero(),
        sender: address(SENDER),
        sender_signature: Vec::new(),
    };
    let hash = record.record_hash(SIDE_CHAIN_ID);
    record.sender_signature = crypto::sign_digest(&key(SENDER), &hash).unwrap();
    record
}

fn batch(height: u64) -> PurchaseBatch {
    PurchaseBatch {
        height: U256::from(height),
        chain_id: SIDE_CHAIN_ID,
        records: vec![record("P1"), record("P2")],
    }
}

fn validator_signatures(digest: &H256, seeds: &[u8]) -> Vec<Vec<u8>> {
    seeds.iter().map(|s| sign_batch(&key(*s), digest).unwrap()).collect()
}

fn committer(gateway: Arc<FakeGateway>) -> BatchCommitter {
    BatchCommitter::new(gateway, Arc::new(signer_pool()), validator_set(), key(0xa1))
}

/// Proposer-signed proof over `signatures`.
fn proof_signature(digest: &H256, signatures: &[Vec<u8>]) -> Vec<u8> {
    let propose = loyalty_relay::batch::propose_digest(
        BatchKind::Purchase,
        U256::one(),
        2,
        digest,
        signatures,
        SIDE_CHAIN_ID,
    );
    crypto::sign_digest(&key(0xa1), &propose).unwrap()
}

// ============================================================================
// VERIFICATION TESTS
// ============================================================================

/// Test that a commit meeting the threshold verifies
/// What is tested: two of three validators plus a validator proposer
/// Why: The contract accepts exactly such commits
#[test]
fn test_verify_commit_at_threshold() {
    let batch = batch(1);
    let digest = batch.digest();
    let signatures = validator_signatures(&digest, &[0xa1, 0xa3]);
    let proposer = proof_signature(&digest, &signatures);

    let proof = CommitProof {
        kind: BatchKind::Purchase,
        height: U256::one(),
        length: 2,
        chain_id: SIDE_CHAIN_ID,
        batch_digest: digest,
        validator_signatures: &signatures,
        proposer_signature: &proposer,
    };
    assert_eq!(validator_set().verify_commit(&proof), Ok(()));
}

/// Test that too few, duplicate or foreign validator signatures fail
/// What is tested: one signature, the same signer twice, a non-validator signer
/// Why: The quorum counts distinct recognised validators only
#[test]
fn test_verify_commit_rejects_weak_quorums() {
    let batch = batch(1);
    let digest = batch.digest();
    let set = validator_set();

    let check = |signatures: Vec<Vec<u8>>| {
        let proposer = proof_signature(&digest, &signatures);
        set.verify_commit(&CommitProof {
            kind: BatchKind::Purchase,
            height: U256::one(),
            length: 2,
            chain_id: SIDE_CHAIN_ID,
            batch_digest: digest,
            validator_signatures: &signatures,
            proposer_signature: &proposer,
        })
    };

    assert_eq!(
        check(validator_signatures(&digest, &[0xa2])),
        Err(CommitError::BelowThreshold { got: 1, need: 2 })
    );
    assert_eq!(
        check(validator_signatures(&digest, &[0xa2, 0xa2])),
        Err(CommitError::DuplicateSigner { index: 1 })
    );
    assert_eq!(
        check(validator_signatures(&digest, &[0xa1, 0x44])),
        Err(CommitError::UnknownSigner { index: 1 })
    );
}

/// Test that a signature over a different batch does not count
/// What is tested: one validator signature swapped for a signature over another height
/// Why: Signatures bind the exact batch contents
#[test]
fn test_verify_commit_rejects_swapped_signature() {
    let batch = batch(1);
    let digest = batch.digest();
    let mut signatures = validator_signatures(&digest, &[0xa1, 0xa2]);
    signatures[1] = sign_batch(&key(0xa2), &self::batch(2).digest()).unwrap();
    let proposer = proof_signature(&digest, &signatures);

    let result = validator_set().verify_commit(&CommitProof {
        kind: BatchKind::Purchase,
        height: U256::one(),
        length: 2,
        chain_id: SIDE_CHAIN_ID,
        batch_digest: digest,
        validator_signatures: &signatures,
        proposer_signature: &proposer,
    });
    assert_eq!(result, Err(CommitError::UnknownSigner { index: 1 }));
}

/// Test that the proposer signature covers the validator signatures
/// What is tested: proposer signature made over a different signature list
/// Why: A proposer cannot endorse signatures it did not see
#[test]
fn test_verify_commit_rejects_stale_proposer_signature() {
    let batch = batch(1);
    let digest = batch.digest();
    let signatures = validator_signatures(&digest, &[0xa1, 0xa2]);
    let proposer = proof_signature(&digest, &validator_signatures(&digest, &[0xa1, 0xa3]));

    let result = validator_set().verify_commit(&CommitProof {
        kind: BatchKind::Purchase,
        height: U256::one(),
        length: 2,
        chain_id: SIDE_CHAIN_ID,
        batch_digest: digest,
        validator_signatures: &signatures,
        proposer_signature: &proposer,
    });
    assert_eq!(result, Err(CommitError::InvalidProposer));
}

/// Test that a tampered purchase record fails its sender check
/// What is tested: amount changed after the sender signed
/// Why: Records are immutable once signed
#[test]
fn test_verify_purchase_senders() {
    let mut batch = batch(1);
    assert_eq!(verify_purchase_senders(&batch), Ok(()));

    batch.records[1].amount = U256::from(1u64);
    assert_eq!(
        verify_purchase_senders(&batch),
        Err(CommitError::InvalidSender { index: 1 })
    );
}

// ============================================================================
// COMMITTER TESTS
// ============================================================================

/// Test that the committer submits a valid purchase batch
/// What is tested: commit_purchases at the next height
/// Why: This is the proposer's submission path
#[tokio::test]
async fn test_commit_purchases() {
    let gateway = Arc::new(FakeGateway::side());
    let committer = committer(gateway.clone());
    let batch = batch(1);
    let signatures = validator_signatures(&batch.digest(), &[0xa2, 0xa3]);

    let receipt = committer.commit_purchases(batch.clone(), signatures).await.unwrap();
    assert_eq!(receipt.height, U256::one());
    assert_eq!(receipt.batch_digest, batch.digest());
    match &gateway.sent_calls()[0] {
        ContractCall::SavePurchase { batch: sent, validator_signatures, .. } => {
            assert_eq!(sent, &batch);
            assert_eq!(validator_signatures.len(), 2);
        }
        other => panic!("unexpected call {:?}", other),
    }

    // Height 1 is now taken
    let again = self::batch(1);
    let signatures = validator_signatures(&again.digest(), &[0xa2, 0xa3]);
    let err = committer.commit_purchases(again, signatures).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);
}

/// Test that height gaps and foreign chain ids are rejected before submission
/// What is tested: height 3 after 0, and a batch tagged with another chain id
/// Why: Heights are strictly monotonic per chain
#[tokio::test]
async fn test_commit_rejects_bad_height_and_chain() {
    let gateway = Arc::new(FakeGateway::side());
    let committer = committer(gateway.clone());

    let gap = batch(3);
    let signatures = validator_signatures(&gap.digest(), &[0xa2, 0xa3]);
    let err = committer.commit_purchases(gap, signatures).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);

    let mut foreign = batch(1);
    foreign.chain_id = 1;
    let signatures = validator_signatures(&foreign.digest(), &[0xa2, 0xa3]);
    let err = committer.commit_purchases(foreign, signatures).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);

    assert_eq!(gateway.sent_count(), 0);
}

/// Test that a below-threshold rate commit is never submitted
/// What is tested: commit_rates with a single validator signature
/// Why: Under-signed data must not reach the chain
#[tokio::test]
async fn test_commit_rates_threshold() {
    let gateway = Arc::new(FakeGateway::side());
    let committer = committer(gateway.clone());
    let rates = CurrencyRateSet {
        height: U256::one(),
        chain_id: SIDE_CHAIN_ID,
        rates: vec![
            CurrencyRate {
                symbol: "krw".to_string(),
                rate: U256::from(1_000_000_000u64),
            },
            CurrencyRate {
                symbol: "usd".to_string(),
                rate: U256::from(1_300_000_000_000u64),
            },
        ],
    };

    let one = validator_signatures(&rates.digest(), &[0xa1]);
    let err = committer.commit_rates(rates.clone(), one).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);
    assert_eq!(gateway.sent_count(), 0);

    let two = validator_signatures(&rates.digest(), &[0xa1, 0xa2]);
    let receipt = committer.commit_rates(rates, two).await.unwrap();
    assert_eq!(receipt.height, U256::one());
    assert_eq!(gateway.sent_count(), 1);
}
