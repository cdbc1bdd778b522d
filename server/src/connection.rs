//! WebSocket connection lifecycle
//!
//! After the 101 handshake each connection runs as its own task that owns
//! the TLS stream: it accumulates incoming bytes, drains complete frames
//! through the codec, answers control frames, and forwards decoded messages
//! to the server loop. Outbound traffic arrives over a channel so the
//! session layer never touches the socket directly.
//!
//! Error handling follows the protocol layering: a frame that fails to
//! parse as a known JSON message is dropped and the connection lives on,
//! while a codec-level violation (oversized frame, bad opcode) or stream
//! error ends the connection. Whatever the cause, exactly one
//! `Disconnected` event is reported.

use log::{debug, info, warn};
use shared::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::frame::{self, Decoded, Frame, Opcode};

/// Instructions queued onto a connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(Message),
    Close,
}

/// Events a connection reports to the server loop.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The upgrade handshake finished; the handle routes outbound traffic.
    Upgraded { handle: ConnectionHandle },
    /// A complete, recognized message arrived.
    Message { conn_id: String, message: Message },
    /// The connection ended. Sent exactly once per connection.
    Disconnected { conn_id: String },
}

/// Sending side of a connection, held by the session manager.
///
/// Both operations are silent no-ops once the connection task has exited;
/// a `send` to a closing connection never errors and never blocks.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: String, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn send(&self, message: &Message) {
        let _ = self.outbound.send(Outbound::Message(message.clone()));
    }

    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Runs one upgraded connection to completion.
///
/// `initial` seeds the read buffer with any bytes the client pipelined
/// behind its upgrade request. Returns when the peer closes, a protocol
/// violation occurs, the stream errors, or the handle is dropped/closed.
pub async fn run<S>(
    conn_id: String,
    mut stream: S,
    initial: Vec<u8>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = initial;
    // At most one unterminated fragmented text message at a time
    let mut fragment: Option<Vec<u8>> = None;
    let mut chunk = [0u8; 4096];

    // The upgrade surplus may already hold complete frames
    let mut flow = drain_frames(&conn_id, &mut buffer, &mut fragment, &mut stream, &events).await;

    while matches!(flow, Flow::Continue) {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(Outbound::Message(message)) => {
                    if let Ok(json) = message.to_json() {
                        if stream.write_all(&frame::encode(Opcode::Text, json.as_bytes())).await.is_err() {
                            flow = Flow::Stop;
                        }
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = stream.write_all(&frame::encode(Opcode::Close, &[])).await;
                    flow = Flow::Stop;
                }
            },
            read = stream.read(&mut chunk) => match read {
                Ok(0) => flow = Flow::Stop,
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    flow = drain_frames(&conn_id, &mut buffer, &mut fragment, &mut stream, &events).await;
                }
                Err(e) => {
                    debug!("Read error on {}: {}", conn_id, e);
                    flow = Flow::Stop;
                }
            },
        }
    }

    let _ = stream.shutdown().await;
    info!("Client disconnected: {}", conn_id);
    let _ = events.send(ConnectionEvent::Disconnected { conn_id });
}

/// Decodes and handles every complete frame currently in the buffer.
async fn drain_frames<S>(
    conn_id: &str,
    buffer: &mut Vec<u8>,
    fragment: &mut Option<Vec<u8>>,
    stream: &mut S,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) -> Flow
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match frame::decode(buffer) {
            Ok(Decoded::NeedMoreData) => return Flow::Continue,
            Ok(Decoded::Frame { frame, consumed }) => {
                buffer.drain(..consumed);
                if let Flow::Stop = handle_frame(conn_id, frame, fragment, stream, events).await {
                    return Flow::Stop;
                }
            }
            Err(e) => {
                warn!("Protocol violation on {}: {}", conn_id, e);
                let _ = stream.write_all(&frame::encode(Opcode::Close, &[])).await;
                return Flow::Stop;
            }
        }
    }
}

async fn handle_frame<S>(
    conn_id: &str,
    frame: Frame,
    fragment: &mut Option<Vec<u8>>,
    stream: &mut S,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) -> Flow
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match frame.opcode {
        Opcode::Text => {
            if fragment.is_some() {
                warn!("Interleaved fragmented message on {}", conn_id);
                let _ = stream.write_all(&frame::encode(Opcode::Close, &[])).await;
                return Flow::Stop;
            }
            if frame.fin {
                dispatch_text(conn_id, frame.payload, events);
            } else {
                *fragment = Some(frame.payload);
            }
        }
        Opcode::Continuation => match fragment.take() {
            Some(mut assembled) => {
                if assembled.len() + frame.payload.len() > frame::MAX_PAYLOAD_LEN {
                    warn!("Fragmented message exceeds size limit on {}", conn_id);
                    let _ = stream.write_all(&frame::encode(Opcode::Close, &[])).await;
                    return Flow::Stop;
                }
                assembled.extend_from_slice(&frame.payload);
                if frame.fin {
                    dispatch_text(conn_id, assembled, events);
                } else {
                    *fragment = Some(assembled);
                }
            }
            None => {
                warn!("Continuation frame without a started message on {}", conn_id);
                let _ = stream.write_all(&frame::encode(Opcode::Close, &[])).await;
                return Flow::Stop;
            }
        },
        Opcode::Ping => {
            if stream
                .write_all(&frame::encode(Opcode::Pong, &frame.payload))
                .await
                .is_err()
            {
                return Flow::Stop;
            }
        }
        Opcode::Pong => {}
        Opcode::Close => {
            // Echo the status code back, then shut down
            let status = if frame.payload.len() >= 2 {
                &frame.payload[..2]
            } else {
                &[][..]
            };
            let _ = stream.write_all(&frame::encode(Opcode::Close, status)).await;
            return Flow::Stop;
        }
    }

    Flow::Continue
}

/// Forwards a text payload as a message event, dropping anything that is
/// not valid UTF-8 JSON with a known `type`.
fn dispatch_text(conn_id: &str, payload: Vec<u8>, events: &mpsc::UnboundedSender<ConnectionEvent>) {
    let text = match String::from_utf8(payload) {
        Ok(text) => text,
        Err(_) => {
            debug!("Dropping non-UTF-8 text frame from {}", conn_id);
            return;
        }
    };

    match Message::from_json(&text) {
        Some(message) => {
            let _ = events.send(ConnectionEvent::Message {
                conn_id: conn_id.to_string(),
                message,
            });
        }
        None => debug!("Dropping unrecognized message from {}: {}", conn_id, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    const MASK: [u8; 4] = [0x3A, 0x9C, 0x51, 0xE7];

    fn masked_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        masked_frame_with_fin(opcode, payload, true)
    }

    fn masked_frame_with_fin(opcode: Opcode, payload: &[u8], fin: bool) -> Vec<u8> {
        let bits = match opcode {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        };
        let mut out = vec![if fin { 0x80 | bits } else { bits }];
        assert!(payload.len() < 126, "test helper handles short frames only");
        out.push(0x80 | payload.len() as u8);
        out.extend_from_slice(&MASK);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
        out
    }

    struct Harness {
        client: DuplexStream,
        handle: ConnectionHandle,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_connection(initial: Vec<u8>) -> Harness {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let handle = ConnectionHandle::new("testconn".to_string(), outbound_tx);
        let task = tokio::spawn(run(
            "testconn".to_string(),
            server,
            initial,
            outbound_rx,
            event_tx,
        ));

        Harness {
            client,
            handle,
            events: event_rx,
            task,
        }
    }

    async fn read_one_frame(client: &mut DuplexStream) -> Frame {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match frame::decode(&buf).unwrap() {
                Decoded::Frame { frame, .. } => return frame,
                Decoded::NeedMoreData => {
                    let n = client.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "stream closed before a frame arrived");
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_text_frame_becomes_message_event() {
        let mut harness = spawn_connection(Vec::new());

        let json = r#"{"type":"join","playerName":"Alice","deviceId":"d1"}"#;
        harness
            .client
            .write_all(&masked_frame(Opcode::Text, json.as_bytes()))
            .await
            .unwrap();

        match harness.events.recv().await.unwrap() {
            ConnectionEvent::Message { conn_id, message } => {
                assert_eq!(conn_id, "testconn");
                assert_eq!(
                    message,
                    Message::Join {
                        player_name: "Alice".to_string(),
                        device_id: "d1".to_string(),
                    }
                );
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_surplus_bytes_are_processed() {
        // Frame that arrived pipelined behind the upgrade request
        let json = r#"{"type":"shake"}"#;
        let mut harness = spawn_connection(masked_frame(Opcode::Text, json.as_bytes()));

        match harness.events.recv().await.unwrap() {
            ConnectionEvent::Message { message, .. } => assert_eq!(message, Message::Shake),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_message_dropped_connection_lives() {
        let mut harness = spawn_connection(Vec::new());

        harness
            .client
            .write_all(&masked_frame(Opcode::Text, br#"{"type":"warp"}"#))
            .await
            .unwrap();
        harness
            .client
            .write_all(&masked_frame(Opcode::Text, br#"{"type":"shake"}"#))
            .await
            .unwrap();

        // Only the recognized message surfaces
        match harness.events.recv().await.unwrap() {
            ConnectionEvent::Message { message, .. } => assert_eq!(message, Message::Shake),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let mut harness = spawn_connection(Vec::new());

        harness
            .client
            .write_all(&masked_frame(Opcode::Ping, b"hb-1"))
            .await
            .unwrap();

        let pong = read_one_frame(&mut harness.client).await;
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.payload, b"hb-1");
    }

    #[tokio::test]
    async fn test_close_frame_echoed_and_disconnect_reported_once() {
        let mut harness = spawn_connection(Vec::new());

        let status = 1000u16.to_be_bytes();
        harness
            .client
            .write_all(&masked_frame(Opcode::Close, &status))
            .await
            .unwrap();

        let echo = read_one_frame(&mut harness.client).await;
        assert_eq!(echo.opcode, Opcode::Close);
        assert_eq!(echo.payload, status);

        match harness.events.recv().await.unwrap() {
            ConnectionEvent::Disconnected { conn_id } => assert_eq!(conn_id, "testconn"),
            other => panic!("Unexpected event: {:?}", other),
        }

        harness.task.await.unwrap();
        assert!(harness.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_without_buffering() {
        let mut harness = spawn_connection(Vec::new());

        // Header declaring 2 MB; no payload follows
        let mut header = vec![0x81, 0xFF];
        header.extend_from_slice(&2_000_000u64.to_be_bytes());
        harness.client.write_all(&header).await.unwrap();

        let close = read_one_frame(&mut harness.client).await;
        assert_eq!(close.opcode, Opcode::Close);

        match harness.events.recv().await.unwrap() {
            ConnectionEvent::Disconnected { .. } => {}
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fragmented_text_reassembled() {
        let mut harness = spawn_connection(Vec::new());

        let json = r#"{"type":"ready","isReady":true}"#;
        let (first, rest) = json.as_bytes().split_at(10);

        harness
            .client
            .write_all(&masked_frame_with_fin(Opcode::Text, first, false))
            .await
            .unwrap();
        harness
            .client
            .write_all(&masked_frame_with_fin(Opcode::Continuation, rest, true))
            .await
            .unwrap();

        match harness.events.recv().await.unwrap() {
            ConnectionEvent::Message { message, .. } => {
                assert_eq!(message, Message::Ready { is_ready: true });
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interleaved_fragments_close_connection() {
        let mut harness = spawn_connection(Vec::new());

        harness
            .client
            .write_all(&masked_frame_with_fin(Opcode::Text, b"{\"ty", false))
            .await
            .unwrap();
        // Second text frame while the first message is unterminated
        harness
            .client
            .write_all(&masked_frame(Opcode::Text, br#"{"type":"shake"}"#))
            .await
            .unwrap();

        match harness.events.recv().await.unwrap() {
            ConnectionEvent::Disconnected { .. } => {}
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_writes_text_frame() {
        let mut harness = spawn_connection(Vec::new());

        harness.handle.send(&Message::Welcome {
            player_id: "p1".to_string(),
            player_color: "e63333".to_string(),
        });

        let frame = read_one_frame(&mut harness.client).await;
        assert_eq!(frame.opcode, Opcode::Text);
        let text = String::from_utf8(frame.payload).unwrap();
        assert_eq!(
            Message::from_json(&text),
            Some(Message::Welcome {
                player_id: "p1".to_string(),
                player_color: "e63333".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_close_sends_close_frame() {
        let mut harness = spawn_connection(Vec::new());

        harness.handle.close();

        let frame = read_one_frame(&mut harness.client).await;
        assert_eq!(frame.opcode, Opcode::Close);
        assert!(frame.payload.is_empty());

        match harness.events.recv().await.unwrap() {
            ConnectionEvent::Disconnected { .. } => {}
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_after_close_is_silent_noop() {
        let harness = spawn_connection(Vec::new());

        harness.handle.close();
        harness.task.await.unwrap();

        // The task is gone; send must neither panic nor error
        harness.handle.send(&Message::GameEnd);
    }

    #[tokio::test]
    async fn test_peer_hangup_reports_disconnect() {
        let mut harness = spawn_connection(Vec::new());

        drop(harness.client);

        match harness.events.recv().await.unwrap() {
            ConnectionEvent::Disconnected { conn_id } => assert_eq!(conn_id, "testconn"),
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
