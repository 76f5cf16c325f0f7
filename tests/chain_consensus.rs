//! Chain/mempool consensus tests driven directly against the store and
//! library primitives (ChainManager, UtxoEngine, Mempool), bypassing
//! BlockValidator's schema/PoW/timestamp gates much like one would bypass
//! PoW with an `insert_block_unchecked` test helper — real proof-of-work
//! against the network's fixed, deliberately tiny target cannot be
//! produced without actually mining, so these tests exercise the chain
//! and mempool machinery that runs once a block has already cleared
//! validation.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use kermapy::block::Block;
use kermapy::chain;
use kermapy::config::TARGET;
use kermapy::mempool::Mempool;
use kermapy::store::ObjectStore;
use kermapy::tx::{Outpoint, Transaction, TxInput, TxOutput};
use kermapy::utxo;

fn store() -> (ObjectStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = ObjectStore::open(dir.path()).unwrap();
    (store, dir)
}

fn coinbase(height: u64, pubkey: &str, value: u64) -> Transaction {
    Transaction {
        ty: "transaction".to_string(),
        inputs: None,
        height: Some(height),
        outputs: vec![TxOutput { pubkey: pubkey.to_string(), value }],
    }
}

fn block(previd: Option<String>, created: i64, txids: Vec<String>) -> Block {
    Block {
        ty: "block".to_string(),
        txids,
        nonce: "0".repeat(64),
        previd,
        created,
        target: TARGET.to_string(),
        miner: None,
        note: None,
    }
}

/// Mimics §4.9's "ingestion of block": compute height and new-chaintip
/// status via ChainManager, derive the new UTXO via UtxoEngine, write it
/// through the store, and rebuild the mempool on a chaintip change.
fn ingest_block(store: &ObjectStore, mempool: &mut Mempool, b: &Block) -> String {
    let utxo = utxo::next_utxo(b, store).unwrap();
    let height = chain::height_of(b, store).unwrap();
    let new_tip = chain::is_new_chaintip(height, store).unwrap();
    let id = store.put_block(&b.to_value(), &utxo, height, new_tip).unwrap();
    if new_tip {
        mempool.handle_chaintip_change(&id).unwrap();
    }
    id
}

#[test]
fn strictly_longer_branch_replaces_the_chaintip() {
    let (store, _dir) = store();
    let mut mempool = Mempool::new(store.clone()).unwrap();
    let genesis_id = Block::genesis().id();

    let cb_a1 = coinbase(1, &"a".repeat(64), 1);
    let cb_a1_id = store.put_object(&cb_a1.to_value()).unwrap();
    let a1 = block(Some(genesis_id.clone()), Block::genesis().created + 1, vec![cb_a1_id]);
    let a1_id = ingest_block(&store, &mut mempool, &a1);
    assert_eq!(store.get_chaintip().unwrap().unwrap(), a1_id);
    assert_eq!(store.get_height(&a1_id).unwrap(), 1);

    // A side block at the same height never displaces the tip (ties
    // broken by first-seen, §3/§4.7).
    let cb_b1 = coinbase(1, &"b".repeat(64), 1);
    let cb_b1_id = store.put_object(&cb_b1.to_value()).unwrap();
    let b1 = block(Some(genesis_id), a1.created + 1, vec![cb_b1_id]);
    let b1_id = ingest_block(&store, &mut mempool, &b1);
    assert_eq!(store.get_chaintip().unwrap().unwrap(), a1_id, "side branch at equal height must not win");
    assert_ne!(b1_id, a1_id);
}

#[test]
fn reorg_carries_the_losing_branchs_non_coinbase_tx_into_the_mempool() {
    let (store, _dir) = store();
    let mut mempool = Mempool::new(store.clone()).unwrap();
    let genesis_id = Block::genesis().id();

    let mut csprng = OsRng;
    let signing_key = SigningKey::generate(&mut csprng);
    let pubkey_hex = hex::encode(signing_key.verifying_key().to_bytes());

    // Common ancestor for both branches: a block paying the reward to a
    // key we hold, at height 1.
    let cb_shared = coinbase(1, &pubkey_hex, 1_000);
    let cb_shared_id = store.put_object(&cb_shared.to_value()).unwrap();
    let shared = block(Some(genesis_id), Block::genesis().created + 1, vec![cb_shared_id.clone()]);
    let shared_id = ingest_block(&store, &mut mempool, &shared);

    // Chain A: a second block that spends the shared coinbase output.
    let mut spend = Transaction {
        ty: "transaction".to_string(),
        inputs: Some(vec![TxInput { outpoint: Outpoint { txid: cb_shared_id.clone(), index: 0 }, sig: "0".repeat(128) }]),
        height: None,
        outputs: vec![TxOutput { pubkey: pubkey_hex.clone(), value: 1_000 }],
    };
    let nulled = kermapy::canonical::canonicalize(&spend.with_sigs_nulled());
    let signature = signing_key.sign(&nulled);
    spend.inputs.as_mut().unwrap()[0].sig = hex::encode(signature.to_bytes());
    let spend_id = store.put_object(&spend.to_value()).unwrap();

    let cb_a2 = coinbase(2, &"c".repeat(64), 1);
    let cb_a2_id = store.put_object(&cb_a2.to_value()).unwrap();
    let a2 = block(Some(shared_id.clone()), shared.created + 1, vec![cb_a2_id, spend_id.clone()]);
    let a2_id = ingest_block(&store, &mut mempool, &a2);
    assert_eq!(store.get_chaintip().unwrap().unwrap(), a2_id);
    assert!(!mempool.get_pending().contains(&spend_id), "the spend is in-chain on A, not pending");

    // Chain B: forks from the shared block, never includes the spend,
    // and grows one block longer than A so it wins outright.
    let cb_b2 = coinbase(2, &"d".repeat(64), 1);
    let cb_b2_id = store.put_object(&cb_b2.to_value()).unwrap();
    let b2 = block(Some(shared_id.clone()), shared.created + 1, vec![cb_b2_id]);
    let b2_id = ingest_block(&store, &mut mempool, &b2);
    assert_eq!(store.get_chaintip().unwrap().unwrap(), a2_id, "B is still only tied with A at height 2");

    let cb_b3 = coinbase(3, &"e".repeat(64), 1);
    let cb_b3_id = store.put_object(&cb_b3.to_value()).unwrap();
    let b3 = block(Some(b2_id), b2.created + 1, vec![cb_b3_id]);
    let b3_id = ingest_block(&store, &mut mempool, &b3);

    assert_eq!(store.get_chaintip().unwrap().unwrap(), b3_id, "B is now strictly longer and must win");
    assert!(
        mempool.get_pending().contains(&spend_id),
        "the tx that only existed on the losing branch must be carried over as pending"
    );
}

#[test]
fn appended_block_fast_path_matches_a_full_reinit() {
    let (store, _dir) = store();
    let mut mempool = Mempool::new(store.clone()).unwrap();
    let genesis_id = Block::genesis().id();

    let cb1 = coinbase(1, &"a".repeat(64), 1);
    let cb1_id = store.put_object(&cb1.to_value()).unwrap();
    let b1 = block(Some(genesis_id), Block::genesis().created + 1, vec![cb1_id]);
    let b1_id = ingest_block(&store, &mut mempool, &b1);

    let cb2 = coinbase(2, &"b".repeat(64), 1);
    let cb2_id = store.put_object(&cb2.to_value()).unwrap();
    let b2 = block(Some(b1_id), b1.created + 1, vec![cb2_id]);
    let b2_id = ingest_block(&store, &mut mempool, &b2);

    let fast_path_pending = mempool.get_pending();

    let mut reinit = Mempool::new(store.clone()).unwrap();
    reinit.init().unwrap();
    assert_eq!(store.get_chaintip().unwrap().unwrap(), b2_id);
    assert_eq!(reinit.get_pending(), fast_path_pending);
}
