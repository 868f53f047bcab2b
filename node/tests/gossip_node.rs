//! Two nodes on loopback: peering, gossip and milestone confirmation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tangle_network::Broadcast;
use tangle_node::{GossipNode, NodeConfig};
use tangle_nullables::{NullParser, NullStore};
use tangle_store::{Bundle, StoredTransaction};
use tangle_types::{Address, Hash, MilestoneIndex, HASH_LENGTH};

fn config() -> NodeConfig {
    NodeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        reconnect_interval_secs: 1,
        enable_metrics: false,
        ..NodeConfig::default()
    }
}

fn node(config: NodeConfig, store: Arc<NullStore>) -> GossipNode {
    GossipNode::new(config, store, Arc::new(NullParser::new())).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn known_peer_is_dialed_and_receives_gossip() {
    let receiver = node(
        NodeConfig {
            accept_any_peer: true,
            ..config()
        },
        Arc::new(NullStore::with_genesis()),
    );
    let receiver_addr = receiver.start().await.unwrap();
    let mut processed = receiver.take_processed().unwrap();

    let sender = node(
        NodeConfig {
            known_peers: vec![receiver_addr.to_string()],
            ..config()
        },
        Arc::new(NullStore::with_genesis()),
    );
    sender.start().await.unwrap();

    wait_until(|| {
        sender.peering().connected_peers().len() == 1
            && receiver.peering().connected_peers().len() == 1
    })
    .await;
    let neighbor = &sender.peering().connected_peers()[0];
    assert!(neighbor.supports_sting());

    let payload = vec![0x11u8; 500];
    sender
        .broadcast_queue()
        .enqueue_for_broadcast(Broadcast {
            payload: payload.clone(),
            requested_hash: None,
            exclude: HashSet::new(),
        })
        .await
        .unwrap();

    let tx = tokio::time::timeout(Duration::from_secs(10), processed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.transaction.hash, NullParser::hash_of(&payload));

    sender.stop().await;
    receiver.stop().await;
}

/// Start `holder` accepting anyone and `dialer` connected to it; wait for
/// both sides of the connection.
async fn connect_pair(holder: &GossipNode, dialer_store: Arc<NullStore>) -> GossipNode {
    let holder_addr = holder.start().await.unwrap();
    let dialer = node(
        NodeConfig {
            known_peers: vec![holder_addr.to_string()],
            ..config()
        },
        dialer_store,
    );
    dialer.start().await.unwrap();
    wait_until(|| {
        dialer.peering().connected_peers().len() == 1
            && holder.peering().connected_peers().len() == 1
    })
    .await;
    dialer
}

fn heartbeat_solid_index(node: &GossipNode) -> Option<MilestoneIndex> {
    node.peering()
        .connected_peers()
        .first()
        .and_then(|p| p.latest_heartbeat())
        .map(|hb| hb.solid_milestone_index)
}

#[tokio::test]
async fn sting_neighbors_exchange_heartbeats() {
    let holder_store = Arc::new(NullStore::with_genesis());
    holder_store.set_solid_milestone_index(MilestoneIndex(9));
    let holder = node(
        NodeConfig {
            accept_any_peer: true,
            ..config()
        },
        Arc::clone(&holder_store),
    );
    let dialer = connect_pair(&holder, Arc::new(NullStore::with_genesis())).await;

    // Sent on connect.
    wait_until(|| heartbeat_solid_index(&dialer) == Some(MilestoneIndex(9))).await;
    wait_until(|| heartbeat_solid_index(&holder) == Some(MilestoneIndex(0))).await;

    // Sent again whenever our milestones move.
    holder_store.set_solid_milestone_index(MilestoneIndex(12));
    assert_eq!(holder.announce_status(), 1);
    wait_until(|| heartbeat_solid_index(&dialer) == Some(MilestoneIndex(12))).await;

    dialer.stop().await;
    holder.stop().await;
}

#[tokio::test]
async fn missing_transaction_is_fetched_from_sting_neighbor() {
    let payload = vec![0x33u8; 500];
    let hash = NullParser::hash_of(&payload);

    let holder_store = Arc::new(NullStore::with_genesis());
    holder_store.set_solid_milestone_index(MilestoneIndex(5));
    holder_store.insert_transaction(StoredTransaction {
        hash,
        trunk: Hash::NULL,
        branch: Hash::NULL,
        bundle: hash,
        is_tail: true,
        timestamp: 0,
        raw_bytes: payload.clone(),
        confirmed_by: None,
    });
    let holder = node(
        NodeConfig {
            accept_any_peer: true,
            ..config()
        },
        holder_store,
    );

    let dialer = connect_pair(&holder, Arc::new(NullStore::with_genesis())).await;
    let mut processed = dialer.take_processed().unwrap();
    assert!(dialer.request_transaction(hash, MilestoneIndex(2)));

    let tx = tokio::time::timeout(Duration::from_secs(10), processed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.transaction.hash, hash);
    assert_eq!(tx.request.map(|r| r.hash), Some(hash));
    assert!(dialer.request_queue().is_empty());

    dialer.stop().await;
    holder.stop().await;
}

#[tokio::test]
async fn unknown_peer_is_refused_without_accept_any() {
    let strict = node(config(), Arc::new(NullStore::with_genesis()));
    let strict_addr = strict.start().await.unwrap();

    let stranger = node(
        NodeConfig {
            known_peers: vec![strict_addr.to_string()],
            ..config()
        },
        Arc::new(NullStore::with_genesis()),
    );
    stranger.start().await.unwrap();

    wait_until(|| strict.peering().is_blacklisted(&strict_addr.ip())).await;
    assert!(strict.peering().connected_peers().is_empty());

    stranger.stop().await;
    strict.stop().await;
}

#[tokio::test]
async fn confirms_milestone_and_records_metrics() {
    let store = Arc::new(NullStore::with_genesis());
    store.add_solid_entry_point(Hash::NULL);

    let (from, to) = (Address::new([1; HASH_LENGTH]), Address::new([2; HASH_LENGTH]));
    store.set_balance(from, 10);

    let tail = Hash::new([7; HASH_LENGTH]);
    store.insert_transaction(StoredTransaction {
        hash: tail,
        trunk: Hash::NULL,
        branch: Hash::NULL,
        bundle: tail,
        is_tail: true,
        timestamp: 0,
        raw_bytes: Vec::new(),
        confirmed_by: None,
    });
    store.insert_bundle(Bundle {
        hash: tail,
        tail,
        head: tail,
        head_trunk: Hash::NULL,
        head_branch: Hash::NULL,
        valid: true,
        valid_strict_semantics: true,
        ledger_changes: BTreeMap::from([(from, -4), (to, 4)]),
    });

    let node = node(config(), store);
    let confirmation = node.confirm_milestone(MilestoneIndex(1), tail).unwrap();

    assert_eq!(confirmation.tails, vec![tail]);
    assert_eq!(confirmation.new_address_state.get(&from), Some(&6));
    assert_eq!(confirmation.new_address_state.get(&to), Some(&4));
    assert_eq!(node.metrics().milestones_confirmed.get(), 1);
    assert_eq!(node.metrics().confirmed_bundles.get(), 1);
}
