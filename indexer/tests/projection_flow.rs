//! End-to-end projection scenarios: block rewards maturing over consecutive
//! heights, spends fanning out to fresh addresses, and the failure paths
//! that must leave the store untouched.

use std::sync::Arc;

use tempfile::{tempdir, TempDir};
use wallet_indexer::db::Ledger;
use wallet_indexer::event::{DecodedScript, TxEvent, TxId, TxInput, TxOutput, BLOCK_VERSION};
use wallet_indexer::projector::{ProjectError, TxProjector};

const BLOCK_REWARD: u64 = 6400;
const TX_VERSION: u8 = 1;

fn tx_id(tag: u8) -> TxId {
    TxId([tag; 32])
}

fn output(value: u64, address: &str) -> TxOutput {
    TxOutput {
        value,
        token: "00".to_string(),
        decoded: DecodedScript { address: address.to_string(), timelock: None },
    }
}

fn block(tag: u8, height: u32, address: &str) -> TxEvent {
    TxEvent {
        version: BLOCK_VERSION,
        tx_id: tx_id(tag),
        timestamp: 1_000 + u32::from(tag),
        height: Some(height),
        inputs: Vec::new(),
        outputs: vec![output(BLOCK_REWARD, address)],
    }
}

fn spend(tag: u8, from: (TxId, u32, u64, &str), outputs: Vec<TxOutput>) -> TxEvent {
    let (source, index, value, address) = from;
    TxEvent {
        version: TX_VERSION,
        tx_id: tx_id(tag),
        timestamp: 1_000 + u32::from(tag),
        height: None,
        inputs: vec![TxInput {
            tx_id: source,
            index,
            value,
            token: "00".to_string(),
            decoded: DecodedScript { address: address.to_string(), timelock: None },
        }],
        outputs,
    }
}

fn fixture() -> (TempDir, TxProjector, Arc<Ledger>) {
    let dir = tempdir().unwrap();
    let ledger = Arc::new(Ledger::open(&dir.path().join("indexer.redb")).unwrap());
    let projector = TxProjector::new(Arc::clone(&ledger), 1);
    (dir, projector, ledger)
}

fn balance(ledger: &Ledger, address: &str) -> (u64, u64, u32) {
    let snapshot = ledger.begin_read().unwrap();
    let row = snapshot
        .address_balance(address, "00")
        .unwrap()
        .unwrap_or_default();
    (row.unlocked, row.locked, row.transactions)
}

#[test]
fn first_block_reward_lands_locked() {
    let (_dir, projector, ledger) = fixture();
    projector.project(&block(1, 1, "address1")).unwrap();

    let snapshot = ledger.begin_read().unwrap();
    let utxo = snapshot.utxo(&tx_id(1), 0).unwrap().unwrap();
    assert_eq!(utxo.value, BLOCK_REWARD);
    assert_eq!(utxo.address, "address1");
    assert_eq!(utxo.timelock, None);
    assert_eq!(utxo.heightlock, Some(2));
    assert_eq!(snapshot.utxo_count().unwrap(), 1);
    drop(snapshot);

    assert_eq!(balance(&ledger, "address1"), (0, BLOCK_REWARD, 1));
}

#[test]
fn next_block_releases_the_previous_reward() {
    let (_dir, projector, ledger) = fixture();
    projector.project(&block(1, 1, "address1")).unwrap();
    projector.project(&block(2, 2, "address1")).unwrap();

    // The height-2 block releases the height-1 reward and adds its own
    // freshly locked output in the same step.
    assert_eq!(balance(&ledger, "address1"), (BLOCK_REWARD, BLOCK_REWARD, 2));
}

#[test]
fn releases_only_touch_the_maturing_address() {
    let (_dir, projector, ledger) = fixture();
    projector.project(&block(1, 1, "address1")).unwrap();
    projector.project(&block(2, 2, "address1")).unwrap();
    projector.project(&block(3, 3, "address2")).unwrap();

    assert_eq!(balance(&ledger, "address1"), (2 * BLOCK_REWARD, 0, 2));
    assert_eq!(balance(&ledger, "address2"), (0, BLOCK_REWARD, 1));
}

#[test]
fn spend_fans_out_and_appends_signed_history() {
    let (_dir, projector, ledger) = fixture();
    projector.project(&block(1, 1, "address1")).unwrap();
    projector.project(&block(2, 2, "address1")).unwrap();
    projector.project(&block(3, 3, "address2")).unwrap();
    projector
        .project(&spend(
            4,
            (tx_id(1), 0, BLOCK_REWARD, "address1"),
            vec![output(5, "address3"), output(6395, "address4")],
        ))
        .unwrap();

    let snapshot = ledger.begin_read().unwrap();
    assert_eq!(snapshot.utxo_count().unwrap(), 4);
    assert!(snapshot.utxo(&tx_id(1), 0).unwrap().is_none());
    drop(snapshot);

    assert_eq!(balance(&ledger, "address1"), (BLOCK_REWARD, 0, 3));
    assert_eq!(balance(&ledger, "address3"), (5, 0, 1));
    assert_eq!(balance(&ledger, "address4"), (6395, 0, 1));

    let snapshot = ledger.begin_read().unwrap();
    let history = snapshot.address_history("address1").unwrap();
    let spend_row = history
        .iter()
        .find(|(tx, _, _)| *tx == tx_id(4))
        .map(|(_, _, row)| row)
        .unwrap();
    assert_eq!(spend_row.balance, -(BLOCK_REWARD as i64));
    let credit = snapshot.address_history("address3").unwrap();
    assert_eq!(credit.len(), 1);
    assert_eq!(credit[0].2.balance, 5);
}

#[test]
fn history_always_sums_to_balance() {
    let (_dir, projector, ledger) = fixture();
    projector.project(&block(1, 1, "address1")).unwrap();
    projector.project(&block(2, 2, "address1")).unwrap();
    projector
        .project(&spend(
            4,
            (tx_id(1), 0, BLOCK_REWARD, "address1"),
            vec![output(100, "address3"), output(6300, "address1")],
        ))
        .unwrap();

    let snapshot = ledger.begin_read().unwrap();
    for address in ["address1", "address3"] {
        let row = snapshot.address_balance(address, "00").unwrap().unwrap();
        let sum: i64 = snapshot
            .address_history(address)
            .unwrap()
            .iter()
            .map(|(_, _, history)| history.balance)
            .sum();
        assert_eq!(sum, (row.unlocked + row.locked) as i64, "address {address}");
        assert!(row.unlocked as i64 >= 0 && row.locked as i64 >= 0);
    }
}

#[test]
fn double_spend_fails_and_changes_nothing() {
    let (_dir, projector, ledger) = fixture();
    projector.project(&block(1, 1, "address1")).unwrap();
    projector.project(&block(2, 2, "address1")).unwrap();
    projector
        .project(&spend(
            4,
            (tx_id(1), 0, BLOCK_REWARD, "address1"),
            vec![output(BLOCK_REWARD, "address3")],
        ))
        .unwrap();

    let before = balance(&ledger, "address3");
    let result = projector.project(&spend(
        5,
        (tx_id(1), 0, BLOCK_REWARD, "address1"),
        vec![output(BLOCK_REWARD, "address5")],
    ));
    assert!(matches!(result, Err(ProjectError::InconsistentChain(_))));

    assert_eq!(balance(&ledger, "address3"), before);
    assert_eq!(balance(&ledger, "address5"), (0, 0, 0));
    let snapshot = ledger.begin_read().unwrap();
    assert!(snapshot.address_row("address5").unwrap().is_none());
    assert_eq!(snapshot.utxo_count().unwrap(), 2);
}

#[test]
fn timelocked_output_stays_locked_until_its_instant() {
    let (_dir, projector, ledger) = fixture();
    projector.project(&block(1, 1, "address1")).unwrap();
    projector.project(&block(2, 2, "address1")).unwrap();

    // Spend the released reward into a timelocked output.
    let mut event = spend(
        4,
        (tx_id(1), 0, BLOCK_REWARD, "address1"),
        vec![TxOutput {
            value: BLOCK_REWARD,
            token: "00".to_string(),
            decoded: DecodedScript {
                address: "address6".to_string(),
                timelock: Some(2_000),
            },
        }],
    );
    event.timestamp = 1_500;
    projector.project(&event).unwrap();
    assert_eq!(balance(&ledger, "address6"), (0, BLOCK_REWARD, 1));

    // Mature the height-2 reward so it is spendable.
    projector.project(&block(3, 3, "address2")).unwrap();

    // An equal-timestamp output releases immediately.
    let mut equal = spend(
        5,
        (tx_id(2), 0, BLOCK_REWARD, "address1"),
        vec![TxOutput {
            value: BLOCK_REWARD,
            token: "00".to_string(),
            decoded: DecodedScript {
                address: "address7".to_string(),
                timelock: Some(1_600),
            },
        }],
    );
    equal.timestamp = 1_600;
    projector.project(&equal).unwrap();
    assert_eq!(balance(&ledger, "address7"), (BLOCK_REWARD, 0, 1));
}

#[test]
fn heightlock_matures_exactly_once() {
    let (_dir, projector, ledger) = fixture();
    projector.project(&block(1, 1, "address1")).unwrap();
    assert_eq!(balance(&ledger, "address1"), (0, BLOCK_REWARD, 1));

    projector.project(&block(2, 2, "address2")).unwrap();
    assert_eq!(balance(&ledger, "address1"), (BLOCK_REWARD, 0, 1));

    // A later block must not release it a second time.
    projector.project(&block(3, 3, "address2")).unwrap();
    assert_eq!(balance(&ledger, "address1"), (BLOCK_REWARD, 0, 1));
}

#[test]
fn multi_token_deltas_stay_per_token() {
    let (_dir, projector, ledger) = fixture();
    projector.project(&block(1, 1, "address1")).unwrap();
    projector.project(&block(2, 2, "address1")).unwrap();

    let mut event = spend(
        4,
        (tx_id(1), 0, BLOCK_REWARD, "address1"),
        vec![output(BLOCK_REWARD, "address8")],
    );
    event.outputs.push(TxOutput {
        value: 77,
        token: "custom".to_string(),
        decoded: DecodedScript { address: "address8".to_string(), timelock: None },
    });
    projector.project(&event).unwrap();

    let snapshot = ledger.begin_read().unwrap();
    let native = snapshot.address_balance("address8", "00").unwrap().unwrap();
    let custom = snapshot.address_balance("address8", "custom").unwrap().unwrap();
    assert_eq!(native.unlocked, BLOCK_REWARD);
    assert_eq!(custom.unlocked, 77);
    assert_eq!(native.transactions, 1);
    assert_eq!(custom.transactions, 1);
    // The address-level counter counts transactions, not cells.
    let address = snapshot.address_row("address8").unwrap().unwrap();
    assert_eq!(address.transactions, 1);
}
