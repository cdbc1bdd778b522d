//! # Partypad Session Host
//!
//! This library implements the session and wire-protocol layer for a
//! local-network party game: phones on the same Wi-Fi open a browser page,
//! connect over an encrypted WebSocket, and act as controllers for a game
//! world advanced by the host machine.
//!
//! ## Core Responsibilities
//!
//! ### Transport
//! A single TLS-terminated TCP port carries everything. Each accepted
//! socket runs the TLS server handshake and then waits for its first HTTP
//! request: WebSocket upgrades are completed in-process with a hand-rolled
//! RFC 6455 implementation (framing, masking, control frames; no library
//! WebSocket stack), while ordinary requests go to a pluggable HTTP
//! responder and close.
//!
//! ### Message Protocol
//! Messages are JSON text frames tagged by a `type` field, defined in the
//! `shared` crate. Deserialization is deliberately lenient: a message with
//! an unknown tag or malformed body is dropped without disturbing the
//! connection, because controller clients ship forward-compatible fields.
//!
//! ### Session Identity
//! The session manager tracks players across joins, disconnects, and
//! reconnects. A player dropping mid-game is parked in a pool keyed by
//! their device identifier; a later join presenting the same identifier
//! transparently remaps the session (name, color, collaborator-held state)
//! onto the new connection.
//!
//! ## Architecture Design
//!
//! One tokio task per connection owns that connection's stream; one server
//! loop task owns the session manager and the player tables. The two sides
//! talk exclusively over channels, so the authoritative maps have a single
//! writer and need no locks. Failure domains are per-connection: a TLS
//! error, protocol violation, or stream failure discards one connection and
//! never affects the others.
//!
//! ## Module Organization
//!
//! - [`frame`]: pure RFC 6455 frame codec with the oversize guard
//! - [`tls`]: PEM identity loading into a `TlsAcceptor`
//! - [`upgrade`]: HTTP request parsing, 101 handshake, responder seam
//! - [`connection`]: per-socket task for buffering, codec drain, control frames
//! - [`player`]: player session state, name rules, color palette
//! - [`session`]: authoritative player table and session events
//! - [`network`]: accept loop, connection pipeline, command handle
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::tls;
//! use std::path::Path;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let acceptor = tls::load_identity(Path::new("cert.pem"), Path::new("key.pem"))?;
//!
//!     // Collaborators subscribe to session events once, at startup
//!     let (event_tx, mut event_rx) = mpsc::unbounded_channel();
//!     tokio::spawn(async move {
//!         while let Some(event) = event_rx.recv().await {
//!             println!("session event: {:?}", event);
//!         }
//!     });
//!
//!     let (mut server, handle) = Server::new("0.0.0.0:8443", acceptor, 2, event_tx).await?;
//!
//!     // The handle drives rounds from the host UI
//!     handle.start_game("melee");
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod frame;
pub mod network;
pub mod player;
pub mod session;
pub mod tls;
pub mod upgrade;
