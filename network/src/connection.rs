//! Connection driver: handshake, framing and the writer task of one peer.

use std::sync::Arc;

use tangle_protocol::{Framer, Handshake, MessageType};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::metrics::ServerMetrics;
use crate::peer::{Peer, PeerMetrics};
use crate::peer_manager::PeeringManager;
use crate::processor::InboundMessage;
use crate::NetworkError;

const READ_BUFFER_SIZE: usize = 4096;

/// Everything a connection needs besides its socket.
#[derive(Clone)]
pub struct ConnectionContext {
    pub peering: Arc<PeeringManager>,
    pub inbound: mpsc::Sender<InboundMessage>,
    /// Our encoded handshake message, sent first on every connection.
    pub handshake: Arc<Vec<u8>>,
    pub metrics: Arc<ServerMetrics>,
}

/// Drive one connection until it fails, the peer is dropped or `cancel`
/// fires. The peer is registered on entry and removed on exit.
pub async fn run_connection<R, W>(
    mut reader: R,
    writer: W,
    peer: Arc<Peer>,
    outbound: mpsc::Receiver<Vec<u8>>,
    ctx: ConnectionContext,
    cancel: CancellationToken,
) -> Result<(), NetworkError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    ctx.peering.register(Arc::clone(&peer));

    let result = drive(&mut reader, writer, &peer, outbound, &ctx, &cancel).await;

    match &result {
        Ok(()) => tracing::debug!(peer = %peer.id(), "connection closed"),
        Err(e) => tracing::debug!(peer = %peer.id(), error = %e, "connection closed with error"),
    }
    ctx.peering.remove(&peer);
    result
}

async fn drive<R, W>(
    reader: &mut R,
    mut writer: W,
    peer: &Arc<Peer>,
    outbound: mpsc::Receiver<Vec<u8>>,
    ctx: &ConnectionContext,
    cancel: &CancellationToken,
) -> Result<(), NetworkError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    writer.write_all(&ctx.handshake).await?;
    writer.flush().await?;
    ctx.peering.handshake_sent(peer);

    let writer_task = tokio::spawn(write_loop(
        writer,
        Arc::clone(peer),
        outbound,
        Arc::clone(&ctx.metrics),
    ));
    let result = read_loop(reader, peer, ctx, cancel).await;
    peer.disconnect();
    let _ = writer_task.await;
    result
}

async fn read_loop<R>(
    reader: &mut R,
    peer: &Arc<Peer>,
    ctx: &ConnectionContext,
    cancel: &CancellationToken,
) -> Result<(), NetworkError>
where
    R: AsyncRead + Unpin,
{
    let disconnect = peer.disconnect_token();
    let mut framer = Framer::new();
    let mut handshake_verified = false;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = disconnect.cancelled() => return Ok(()),
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            return Err(NetworkError::ConnectionClosed(peer.id()));
        }

        for message in framer.feed(&buf[..n])? {
            if !handshake_verified {
                if message.message_type != MessageType::Handshake {
                    return Err(NetworkError::UnexpectedMessage {
                        peer: peer.id(),
                        message: format!("{:?}", message.message_type),
                    });
                }
                let handshake = Handshake::parse(&message.body)?;
                ctx.peering.verify_handshake(peer, &handshake)?;
                handshake_verified = true;
                continue;
            }

            let inbound = InboundMessage {
                peer: Arc::clone(peer),
                message,
            };
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = disconnect.cancelled() => return Ok(()),
                sent = ctx.inbound.send(inbound) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    peer: Arc<Peer>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    metrics: Arc<ServerMetrics>,
) where
    W: AsyncWrite + Unpin,
{
    let disconnect = peer.disconnect_token();
    loop {
        let data = tokio::select! {
            biased;
            _ = disconnect.cancelled() => break,
            data = outbound.recv() => match data {
                Some(d) => d,
                None => break,
            },
        };

        if let Err(e) = writer.write_all(&data).await {
            tracing::debug!(peer = %peer.id(), error = %e, "write failed");
            peer.disconnect();
            break;
        }
        PeerMetrics::incr(&peer.metrics.sent_packets);
        ServerMetrics::incr(&metrics.sent_packets);
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerOrigin;
    use crate::peer_manager::{PeeringConfig, PeeringEvent};
    use crate::HandshakeError;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tangle_protocol::Heartbeat;
    use tangle_types::{Address, MilestoneIndex, HASH_LENGTH};
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    fn coordinator() -> Address {
        Address::new([1u8; HASH_LENGTH])
    }

    struct Side {
        peering: Arc<PeeringManager>,
        inbound: mpsc::Receiver<InboundMessage>,
        peer: Arc<Peer>,
        task: JoinHandle<Result<(), NetworkError>>,
    }

    fn start(
        stream: DuplexStream,
        origin: PeerOrigin,
        remote: &str,
        server_port: u16,
        mwm: u8,
        cancel: &CancellationToken,
    ) -> Side {
        let peering = Arc::new(PeeringManager::new(PeeringConfig {
            coordinator: coordinator(),
            mwm: 14,
            max_peers: 8,
            accept_any_peer: true,
        }));
        let (inbound_tx, inbound) = mpsc::channel(16);
        let handshake = Handshake::new(server_port, coordinator(), mwm)
            .to_message()
            .unwrap();
        let ctx = ConnectionContext {
            peering: Arc::clone(&peering),
            inbound: inbound_tx,
            handshake: Arc::new(handshake),
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
        Side {
            peering,
            inbound,
            peer,
            task,
        }
    }

    #[tokio::test]
    async fn handshake_then_messages_flow() {
        let cancel = CancellationToken::new();
        let (a, b) = tokio::io::duplex(64 * 1024);
        // `dialer` connected to port 15600, where `listener` accepts.
        let dialer = start(a, PeerOrigin::Outbound, "127.0.0.1:15600", 16000, 14, &cancel);
        let mut listener = start(b, PeerOrigin::Inbound, "127.0.0.1:40000", 15600, 14, &cancel);
        let mut events = listener.peering.subscribe();

        let event = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(PeeringEvent::PeerConnected(p)) = events.recv().await {
                    return p;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event.id().as_str(), "127.0.0.1:16000");

        let heartbeat = Heartbeat {
            latest_milestone_index: MilestoneIndex(5),
            ..Heartbeat::default()
        };
        assert!(dialer.peer.enqueue_for_sending(heartbeat.to_message().unwrap()));

        let inbound = tokio::time::timeout(Duration::from_secs(1), listener.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.message.message_type, MessageType::Heartbeat);
        assert_eq!(inbound.peer.connection_id(), listener.peer.connection_id());

        cancel.cancel();
        let _ = dialer.task.await.unwrap();
        let _ = listener.task.await.unwrap();
        assert_eq!(listener.peering.connected_count(), 0);
    }

    #[tokio::test]
    async fn dropped_peer_stops_while_processor_is_full() {
        let cancel = CancellationToken::new();
        let (a, b) = tokio::io::duplex(64 * 1024);
        let dialer = start(a, PeerOrigin::Outbound, "127.0.0.1:15600", 16000, 14, &cancel);
        let listener = start(b, PeerOrigin::Inbound, "127.0.0.1:40000", 15600, 14, &cancel);

        // Nobody reads the listener's inbound channel: its 16 slots fill up
        // and the next forward blocks.
        for i in 0..32u32 {
            let heartbeat = Heartbeat {
                latest_milestone_index: MilestoneIndex(i),
                ..Heartbeat::default()
            };
            assert!(dialer.peer.enqueue_for_sending(heartbeat.to_message().unwrap()));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        listener.peer.disconnect();
        let result = tokio::time::timeout(Duration::from_secs(1), listener.task)
            .await
            .expect("read loop kept waiting on the processor")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(listener.peering.connected_count(), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn mwm_mismatch_closes_connection() {
        let cancel = CancellationToken::new();
        let (a, b) = tokio::io::duplex(64 * 1024);
        let _dialer = start(a, PeerOrigin::Outbound, "127.0.0.1:15600", 16000, 9, &cancel);
        let listener = start(b, PeerOrigin::Inbound, "127.0.0.1:40000", 15600, 14, &cancel);

        let result = tokio::time::timeout(Duration::from_secs(1), listener.task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(NetworkError::Handshake(HandshakeError::MwmMismatch { ours: 14, theirs: 9 }))
        ));
        assert_eq!(listener.peering.connected_count(), 0);
    }

    #[tokio::test]
    async fn message_before_handshake_is_rejected() {
        let cancel = CancellationToken::new();
        let (mut raw, b) = tokio::io::duplex(64 * 1024);
        let listener = start(b, PeerOrigin::Inbound, "127.0.0.1:40000", 15600, 14, &cancel);

        raw.write_all(&Heartbeat::default().to_message().unwrap())
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), listener.task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(NetworkError::UnexpectedMessage { .. })));
    }

    #[tokio::test]
    async fn bad_header_closes_connection() {
        let cancel = CancellationToken::new();
        let (mut raw, b) = tokio::io::duplex(64 * 1024);
        let listener = start(b, PeerOrigin::Inbound, "127.0.0.1:40000", 15600, 14, &cancel);

        raw.write_all(&[0xEE, 0x01, 0x00]).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), listener.task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(NetworkError::Protocol(_))));
    }
}
