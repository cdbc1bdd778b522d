//! Session manager: the authoritative player table
//!
//! Owns the mapping from live connections to player sessions and the pool
//! of disconnected players waiting to reconnect, drives the transition from
//! lobby to gameplay, and broadcasts lobby state. All mutation happens on the
//! server loop task that owns this struct; connections only deliver events
//! over channels, which keeps the identity invariants single-writer:
//!
//! - a connection ID maps to at most one player session
//! - a device identifier maps to at most one session across the active
//!   table and the disconnected pool
//! - the color palette index only moves forward within one lobby lifetime
//!
//! Game-world collaborators subscribe to [`SessionEvent`]s once at startup
//! and drive rounds through the server's command handle; they never reach
//! into these maps.

use std::collections::HashMap;

use log::{debug, info, warn};
use shared::{Message, PlayerInfo};
use tokio::sync::mpsc;

use crate::connection::ConnectionHandle;
use crate::player::{normalize_name, PlayerSession, PLAYER_COLORS};

/// Typed notifications published to the game world.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PlayerJoined { player: PlayerInfo },
    PlayerLeft { player: PlayerInfo },
    /// Mid-game drop; the player's entity should be hidden, not destroyed.
    PlayerDisconnected { player: PlayerInfo },
    /// The session moved to a new connection ID. `old_id` lets the world
    /// remap any entity keyed by the previous connection.
    PlayerReconnected { player: PlayerInfo, old_id: String },
    PlayerShook { player_id: String },
    PlayerReady { player_id: String, is_ready: bool },
    GameStarted { mode: String },
    LobbyChanged,
}

pub struct SessionManager {
    connections: HashMap<String, ConnectionHandle>,
    players: HashMap<String, PlayerSession>,
    disconnected: HashMap<String, PlayerSession>,
    game_in_progress: bool,
    game_mode: String,
    min_players: usize,
    color_index: usize,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionManager {
    pub fn new(min_players: usize, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            connections: HashMap::new(),
            players: HashMap::new(),
            disconnected: HashMap::new(),
            game_in_progress: false,
            game_mode: String::new(),
            min_players,
            color_index: 0,
            events,
        }
    }

    /// Takes ownership of an upgraded connection's sending side.
    pub fn register_connection(&mut self, handle: ConnectionHandle) {
        debug!("Connection registered: {}", handle.id());
        self.connections.insert(handle.id().to_string(), handle);
    }

    /// Dispatches one inbound message. Server-to-client tags echoed back by
    /// a confused client are ignored.
    pub fn handle_message(&mut self, conn_id: &str, message: Message) {
        match message {
            Message::Join {
                player_name,
                device_id,
            } => self.handle_join(conn_id, &player_name, &device_id),
            Message::Input {
                move_x,
                move_y,
                action1,
                action2,
                orient_alpha,
            } => self.handle_input(conn_id, move_x, move_y, action1, action2, orient_alpha),
            Message::Shake => self.handle_shake(conn_id),
            Message::Ready { is_ready } => self.handle_ready(conn_id, is_ready),
            other => debug!("Ignoring unexpected message from {}: {:?}", conn_id, other),
        }
    }

    fn handle_join(&mut self, conn_id: &str, raw_name: &str, device_id: &str) {
        if self.players.contains_key(conn_id) {
            self.send_to_connection(
                conn_id,
                &Message::Error {
                    code: "ALREADY_JOINED".to_string(),
                    message: "You have already joined".to_string(),
                },
            );
            return;
        }

        // Reconnect path: the device identifier re-identifies a session
        // that survived a mid-game drop
        if !device_id.is_empty() {
            if let Some(mut session) = self.disconnected.remove(device_id) {
                let old_id = std::mem::replace(&mut session.id, conn_id.to_string());
                let info = session.info();
                self.players.insert(conn_id.to_string(), session);

                info!(
                    "Player reconnected: {} (old id={}, new id={}, deviceId={})",
                    info.name, old_id, conn_id, device_id
                );

                self.send_to_connection(
                    conn_id,
                    &Message::Welcome {
                        player_id: info.id.clone(),
                        player_color: info.color.clone(),
                    },
                );
                if self.game_in_progress {
                    self.send_to_connection(
                        conn_id,
                        &Message::GameStart {
                            game_mode: self.game_mode.clone(),
                        },
                    );
                }

                self.publish(SessionEvent::PlayerReconnected { player: info, old_id });
                self.broadcast_lobby_state();
                return;
            }
        }

        // New player path
        let name = normalize_name(raw_name, self.players.len());
        let color = self.next_color();
        let session = PlayerSession::new(conn_id, name, device_id, color);
        let info = session.info();
        self.players.insert(conn_id.to_string(), session);

        info!("Player joined: {} ({})", info.name, conn_id);

        self.send_to_connection(
            conn_id,
            &Message::Welcome {
                player_id: info.id.clone(),
                player_color: info.color.clone(),
            },
        );
        if self.game_in_progress {
            self.send_to_connection(
                conn_id,
                &Message::GameStart {
                    game_mode: self.game_mode.clone(),
                },
            );
        }

        self.publish(SessionEvent::PlayerJoined { player: info });
        self.broadcast_lobby_state();
    }

    fn handle_input(
        &mut self,
        conn_id: &str,
        move_x: f32,
        move_y: f32,
        action1: bool,
        action2: bool,
        orient_alpha: f32,
    ) {
        // Input from a connection that never joined is ignored
        if let Some(player) = self.players.get_mut(conn_id) {
            player.input.move_x = move_x;
            player.input.move_y = move_y;
            player.input.action1 = action1;
            player.input.action2 = action2;
            player.input.orient_alpha = orient_alpha;
        }
    }

    fn handle_shake(&mut self, conn_id: &str) {
        if let Some(player) = self.players.get(conn_id) {
            info!("Player {} triggered shake", player.name);
            let player_id = player.id.clone();
            self.publish(SessionEvent::PlayerShook { player_id });
        }
    }

    fn handle_ready(&mut self, conn_id: &str, is_ready: bool) {
        if let Some(player) = self.players.get(conn_id) {
            let player_id = player.id.clone();
            self.publish(SessionEvent::PlayerReady { player_id, is_ready });
        }
    }

    /// Handles the end of a connection, whatever caused it.
    ///
    /// During gameplay a player with a device identifier moves to the
    /// disconnected pool with neutralized input so the simulation sees them
    /// stop immediately; otherwise the session is gone for good.
    pub fn handle_disconnect(&mut self, conn_id: &str) {
        self.connections.remove(conn_id);

        let Some(mut session) = self.players.remove(conn_id) else {
            return;
        };

        if self.game_in_progress && !session.device_id.is_empty() {
            session.input.reset();
            info!(
                "Player disconnected (can reconnect): {} [deviceId={}]",
                session.name, session.device_id
            );
            let info = session.info();
            self.disconnected.insert(session.device_id.clone(), session);
            self.publish(SessionEvent::PlayerDisconnected { player: info });
        } else {
            info!("Player left: {}", session.name);
            self.publish(SessionEvent::PlayerLeft { player: session.info() });
        }

        self.broadcast_lobby_state();
    }

    /// Starts a round. Refused while below the player threshold.
    pub fn start_game(&mut self, mode: &str) -> bool {
        if !self.can_start() {
            warn!("Cannot start game - not enough players");
            return false;
        }

        self.game_mode = mode.to_string();
        self.game_in_progress = true;
        info!("Starting game with mode: {}", mode);

        self.broadcast(&Message::GameStart {
            game_mode: mode.to_string(),
        });
        self.publish(SessionEvent::GameStarted {
            mode: mode.to_string(),
        });
        true
    }

    /// Clears both player pools and rewinds the palette for a fresh lobby.
    /// Connections stay open; clients rejoin with a fresh `join`.
    pub fn reset_lobby(&mut self) {
        self.players.clear();
        self.disconnected.clear();
        self.color_index = 0;
        self.game_mode.clear();
        self.game_in_progress = false;
        self.broadcast_lobby_state();
    }

    pub fn broadcast(&self, message: &Message) {
        for handle in self.connections.values() {
            handle.send(message);
        }
    }

    /// Unicast to a player by their current connection. Keeps working across
    /// reconnects because the session's `id` tracks the live connection.
    pub fn send_to_player(&self, player_id: &str, message: &Message) {
        if self.players.contains_key(player_id) {
            self.send_to_connection(player_id, message);
        }
    }

    fn send_to_connection(&self, conn_id: &str, message: &Message) {
        if let Some(handle) = self.connections.get(conn_id) {
            handle.send(message);
        }
    }

    fn broadcast_lobby_state(&mut self) {
        let players: Vec<PlayerInfo> = self.players.values().map(PlayerSession::info).collect();
        let message = Message::LobbyState {
            players,
            can_start: self.can_start(),
        };
        self.broadcast(&message);
        self.publish(SessionEvent::LobbyChanged);
    }

    fn next_color(&mut self) -> String {
        let color = PLAYER_COLORS[self.color_index % PLAYER_COLORS.len()];
        self.color_index += 1;
        color.to_string()
    }

    fn publish(&self, event: SessionEvent) {
        // Subscriber may be gone during shutdown; events are best-effort
        let _ = self.events.send(event);
    }

    pub fn can_start(&self) -> bool {
        self.players.len() >= self.min_players
    }

    pub fn is_game_in_progress(&self) -> bool {
        self.game_in_progress
    }

    pub fn game_mode(&self) -> &str {
        &self.game_mode
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, conn_id: &str) -> Option<&PlayerSession> {
        self.players.get(conn_id)
    }

    pub fn disconnected_player(&self, device_id: &str) -> Option<&PlayerSession> {
        self.disconnected.get(device_id)
    }

    pub fn disconnected_count(&self) -> usize {
        self.disconnected.len()
    }
}
