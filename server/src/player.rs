//! Per-player session state
//!
//! A `PlayerSession` represents a human participant independently of any one
//! transport connection: its connection ID is remapped when the same device
//! rejoins after a drop, while name, color and score-bearing collaborator
//! state survive.

use shared::{InputSnapshot, PlayerInfo, MAX_NAME_LEN};

/// Fixed palette handed out round-robin as players join. Hex RGB, no `#`,
/// matching what the controller page expects in `welcome`/`lobbyState`.
pub const PLAYER_COLORS: [&str; 8] = [
    "e63333", // red
    "3399e6", // blue
    "33cc4d", // green
    "e6cc33", // yellow
    "cc4dcc", // purple
    "e68033", // orange
    "4dcccc", // cyan
    "e66699", // pink
];

/// A joined participant and their latest controller input.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    /// Connection currently carrying this player. Changes on reconnect.
    pub id: String,
    /// Client-supplied identifier that survives reconnects. May be empty,
    /// in which case the player cannot be re-identified after a drop.
    pub device_id: String,
    pub name: String,
    pub color: String,
    pub input: InputSnapshot,
}

impl PlayerSession {
    pub fn new(id: &str, name: String, device_id: &str, color: String) -> Self {
        Self {
            id: id.to_string(),
            device_id: device_id.to_string(),
            name,
            color,
            input: InputSnapshot::default(),
        }
    }

    /// Snapshot used in lobby broadcasts and session events.
    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

/// Derives a display name from a join request: trimmed, `"Player N"` when
/// blank, truncated to `MAX_NAME_LEN` characters.
pub fn normalize_name(raw: &str, player_count: usize) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        format!("Player {}", player_count + 1)
    } else {
        trimmed.chars().take(MAX_NAME_LEN).collect()
    }
}
