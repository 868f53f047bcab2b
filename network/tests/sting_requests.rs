//! A node missing a transaction asks its STING neighbor for it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tangle_network::{
    run_connection, BroadcastQueue, ConnectionContext, InboundMessage, NetworkError, Peer,
    PeerOrigin, PeeringConfig, PeeringManager, Processor, ProcessorConfig, Request, RequestQueue,
    ServerMetrics,
};
use tangle_nullables::{NullParser, NullStore};
use tangle_protocol::{sting, Handshake, Heartbeat, MessageType, TransactionParser};
use tangle_store::TangleStore;
use tangle_types::{Address, Hash, MilestoneIndex, HASH_LENGTH};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn coordinator() -> Address {
    Address::new([1u8; HASH_LENGTH])
}

struct Side {
    peering: Arc<PeeringManager>,
    peer: Arc<Peer>,
    task: JoinHandle<Result<(), NetworkError>>,
}

fn connect(
    stream: DuplexStream,
    origin: PeerOrigin,
    remote: &str,
    server_port: u16,
    inbound: mpsc::Sender<InboundMessage>,
    cancel: &CancellationToken,
) -> Side {
    let peering = Arc::new(PeeringManager::new(PeeringConfig {
        coordinator: coordinator(),
        mwm: 14,
        max_peers: 8,
        accept_any_peer: true,
    }));
    let ctx = ConnectionContext {
        peering: Arc::clone(&peering),
        inbound,
        handshake: Arc::new(
            Handshake::new(server_port, coordinator(), 14)
                .to_message()
                .unwrap(),
        ),
        metrics: Arc::new(ServerMetrics::new()),
    };
    let remote: SocketAddr = remote.parse().unwrap();
    let (peer, outbound) = Peer::new(peering.next_connection_id(), origin, remote);
    let peer = Arc::new(peer);
    let (reader, writer) = tokio::io::split(stream);
    let task = tokio::spawn(run_connection(
        reader,
        writer,
        Arc::clone(&peer),
        outbound,
        ctx,
        cancel.clone(),
    ));
    Side { peering, peer, task }
}

#[tokio::test]
async fn missing_transaction_is_requested_after_heartbeat() {
    let cancel = CancellationToken::new();
    let (a, b) = tokio::io::duplex(64 * 1024);

    // The requesting side runs a processor behind its connection.
    let request_queue = Arc::new(RequestQueue::new());
    let missing = Hash::new([0x5A; HASH_LENGTH]);
    assert!(request_queue.enqueue(Request::new(missing, MilestoneIndex(3))));

    let (broadcast_queue, _broadcasts) = BroadcastQueue::new(16);
    let (processor, _processed) = Processor::new(
        ProcessorConfig::default(),
        Arc::new(NullStore::with_genesis()) as Arc<dyn TangleStore>,
        Arc::new(NullParser::new()) as Arc<dyn TransactionParser>,
        Arc::clone(&request_queue),
        broadcast_queue,
        Arc::new(ServerMetrics::new()),
    );
    let (requester_tx, requester_rx) = mpsc::channel(16);
    let processor_task = tokio::spawn(Arc::new(processor).run(requester_rx, cancel.clone()));
    let requester = connect(a, PeerOrigin::Outbound, "127.0.0.1:15600", 16000, requester_tx, &cancel);

    // The answering side only collects what it receives.
    let (holder_tx, mut holder_rx) = mpsc::channel(16);
    let holder = connect(b, PeerOrigin::Inbound, "127.0.0.1:40000", 15600, holder_tx, &cancel);

    tokio::time::timeout(Duration::from_secs(5), async {
        while holder.peering.connected_peers().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(holder.peer.supports_sting());
    assert!(request_queue.is_queued(&missing));

    let heartbeat = Heartbeat {
        solid_milestone_index: MilestoneIndex(10),
        pruned_milestone_index: MilestoneIndex(0),
        latest_milestone_index: MilestoneIndex(10),
        connected_neighbors: 1,
        synced_neighbors: 0,
    };
    assert!(holder.peer.enqueue_for_sending(heartbeat.to_message().unwrap()));

    let received = tokio::time::timeout(Duration::from_secs(5), holder_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.message.message_type, MessageType::TransactionRequest);
    assert_eq!(sting::parse_transaction_request(&received.message.body), Ok(missing));
    assert!(request_queue.is_pending(&missing));
    assert_eq!(requester.peer.latest_heartbeat(), Some(heartbeat));

    cancel.cancel();
    let _ = requester.task.await.unwrap();
    let _ = holder.task.await.unwrap();
    processor_task.await.unwrap();
}
