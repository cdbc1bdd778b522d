//! Server accept loop and connection pipeline
//!
//! One TCP port carries everything: each accepted socket gets a short random
//! connection ID, runs the TLS server handshake, then waits for its first
//! HTTP request. WebSocket upgrades continue into a connection task;
//! anything else is answered by the HTTP responder and closed.
//!
//! The loop task owns the [`SessionManager`] outright. Connection tasks and
//! the host application both talk to it through channels, so no lock guards
//! the player tables.

use std::net::UdpSocket;
use std::sync::Arc;

use log::{debug, info, warn};
use shared::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

use crate::connection::{self, ConnectionEvent, ConnectionHandle};
use crate::session::{SessionEvent, SessionManager};
use crate::upgrade::{self, HttpResponder, NotFoundResponder, RequestKind};

/// Commands the host application issues to a running server.
#[derive(Debug)]
pub enum ServerCommand {
    StartGame { mode: String },
    ResetLobby,
    Broadcast { message: Message },
    SendToPlayer { player_id: String, message: Message },
}

/// Cloneable driver for a running server, handed to the host UI and the
/// game world. Dropping every handle shuts the server down.
#[derive(Clone)]
pub struct ServerHandle {
    commands: mpsc::UnboundedSender<ServerCommand>,
}

impl ServerHandle {
    pub fn start_game(&self, mode: &str) {
        let _ = self.commands.send(ServerCommand::StartGame {
            mode: mode.to_string(),
        });
    }

    pub fn reset_lobby(&self) {
        let _ = self.commands.send(ServerCommand::ResetLobby);
    }

    pub fn broadcast(&self, message: Message) {
        let _ = self.commands.send(ServerCommand::Broadcast { message });
    }

    pub fn send_to_player(&self, player_id: &str, message: Message) {
        let _ = self.commands.send(ServerCommand::SendToPlayer {
            player_id: player_id.to_string(),
            message,
        });
    }
}

/// The session host: TLS acceptor, connection pipeline, session manager.
pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    session: SessionManager,
    responder: Arc<dyn HttpResponder>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    commands_rx: mpsc::UnboundedReceiver<ServerCommand>,
}

impl Server {
    /// Binds the listener and wires the session manager. `session_events`
    /// is the one subscription collaborators get (see [`SessionEvent`]).
    pub async fn new(
        addr: &str,
        acceptor: TlsAcceptor,
        min_players: usize,
        session_events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(Self, ServerHandle), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("Server listening on {}", local);
        info!("Open https://{}:{} on your phone", local_ip(), local.port());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let server = Server {
            listener,
            acceptor,
            session: SessionManager::new(min_players, session_events),
            responder: Arc::new(NotFoundResponder),
            events_tx,
            events_rx,
            commands_rx,
        };

        Ok((server, ServerHandle { commands: commands_tx }))
    }

    /// Replaces the fallback HTTP responder, e.g. with a static file server.
    pub fn with_responder(mut self, responder: Arc<dyn HttpResponder>) -> Self {
        self.responder = responder;
        self
    }

    /// Runs the accept loop and session event loop until every
    /// [`ServerHandle`] is dropped.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn_id = new_connection_id();
                        debug!("Accepted {} from {}", conn_id, peer);
                        tokio::spawn(establish(
                            stream,
                            conn_id,
                            self.acceptor.clone(),
                            Arc::clone(&self.responder),
                            self.events_tx.clone(),
                        ));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },

                event = self.events_rx.recv() => match event {
                    Some(ConnectionEvent::Upgraded { handle }) => {
                        info!("Client connected: {}", handle.id());
                        self.session.register_connection(handle);
                    }
                    Some(ConnectionEvent::Message { conn_id, message }) => {
                        self.session.handle_message(&conn_id, message);
                    }
                    Some(ConnectionEvent::Disconnected { conn_id }) => {
                        self.session.handle_disconnect(&conn_id);
                    }
                    None => break,
                },

                command = self.commands_rx.recv() => match command {
                    Some(ServerCommand::StartGame { mode }) => {
                        self.session.start_game(&mode);
                    }
                    Some(ServerCommand::ResetLobby) => self.session.reset_lobby(),
                    Some(ServerCommand::Broadcast { message }) => {
                        self.session.broadcast(&message);
                    }
                    Some(ServerCommand::SendToPlayer { player_id, message }) => {
                        self.session.send_to_player(&player_id, &message);
                    }
                    None => {
                        info!("Server shutting down");
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }
}

/// Takes a raw accepted socket through TLS and the HTTP request phase.
///
/// The TLS handshake and request wait both run inside this connection's own
/// task: a failure at any stage logs and discards this connection only.
async fn establish(
    tcp: TcpStream,
    conn_id: String,
    acceptor: TlsAcceptor,
    responder: Arc<dyn HttpResponder>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let mut stream = match acceptor.accept(tcp).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("TLS handshake failed for {}: {}", conn_id, e);
            return;
        }
    };

    // Buffer until the request head terminator. Anything past it already
    // belongs to the next protocol layer.
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 2048];
    let head_len = loop {
        if let Some(end) = upgrade::find_request_end(&buffer) {
            break end;
        }
        if buffer.len() > upgrade::MAX_REQUEST_LEN {
            debug!("Request head too large from {}", conn_id);
            return;
        }
        match stream.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) => {
                debug!("Read error from {} while waiting for request: {}", conn_id, e);
                return;
            }
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_len]).into_owned();
    let Some(request) = upgrade::parse_request(&head) else {
        debug!("Malformed HTTP request from {}", conn_id);
        return;
    };

    match upgrade::classify(request) {
        RequestKind::Upgrade { key } => {
            if let Err(e) = stream.write_all(&upgrade::handshake_response(&key)).await {
                debug!("Failed to complete upgrade for {}: {}", conn_id, e);
                return;
            }
            info!("WebSocket upgrade completed for {}", conn_id);

            let surplus = buffer.split_off(head_len);
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let handle = ConnectionHandle::new(conn_id.clone(), outbound_tx);
            let _ = events.send(ConnectionEvent::Upgraded { handle });

            connection::run(conn_id, stream, surplus, outbound_rx, events).await;
        }
        RequestKind::Http(request) => {
            debug!("HTTP {} {} from {}", request.method, request.path, conn_id);
            let response = responder.respond(&request);
            let _ = stream.write_all(&response.to_bytes()).await;
            let _ = stream.shutdown().await;
        }
    }
}

/// Short opaque connection identifier, distinct from any session identity.
fn new_connection_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Best-effort LAN address for the join URL. Routes a UDP socket toward a
/// public address and reads back the chosen local endpoint; nothing is sent.
pub fn local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:65530")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}
