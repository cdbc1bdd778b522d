use serde::{Deserialize, Serialize};

/// Maximum display name length after trimming. Longer names are truncated.
pub const MAX_NAME_LEN: usize = 20;

/// Wire message exchanged with controller clients as JSON text frames.
///
/// The `type` field carries the discriminator tag; field names follow the
/// camelCase convention the web client uses. Unknown tags and malformed
/// payloads are not errors at this layer: `Message::from_json` simply
/// returns `None` so a single bad message never takes down a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    Join {
        #[serde(default)]
        player_name: String,
        #[serde(default)]
        device_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Input {
        #[serde(default)]
        move_x: f32,
        #[serde(default)]
        move_y: f32,
        #[serde(default)]
        action1: bool,
        #[serde(default)]
        action2: bool,
        #[serde(default)]
        orient_alpha: f32,
    },
    Shake,
    #[serde(rename_all = "camelCase")]
    Ready {
        #[serde(default)]
        is_ready: bool,
    },

    #[serde(rename_all = "camelCase")]
    Welcome {
        player_id: String,
        player_color: String,
    },
    #[serde(rename_all = "camelCase")]
    LobbyState {
        players: Vec<PlayerInfo>,
        can_start: bool,
    },
    Error {
        code: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    GameStart {
        game_mode: String,
    },
    #[serde(rename_all = "camelCase")]
    GrappleState {
        stab_speed: f32,
    },
    #[serde(rename_all = "camelCase")]
    PlayerState {
        health: i32,
        max_health: i32,
        score: i32,
        kung_fu_count: i32,
        reverse_grip_count: i32,
        turbo_stab_count: i32,
        smoke_bomb_count: i32,
        is_dead: bool,
    },
    GameEnd,
    Death,
    Oof,
}

impl Message {
    /// Serializes the message to its JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a JSON text payload into a message.
    ///
    /// Returns `None` for malformed JSON and for unknown `type` tags alike.
    /// Clients intentionally send forward-compatible messages, so an
    /// unrecognized tag is dropped rather than treated as a protocol error.
    pub fn from_json(json: &str) -> Option<Message> {
        serde_json::from_str(json).ok()
    }
}

/// Per-player entry in a `lobbyState` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// Latest input received from a controller, sampled by the game world.
///
/// Overwritten in place on every `input` message; zeroed (movement and
/// actions, not orientation) when the player's connection drops so a
/// disconnected character immediately stops moving.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSnapshot {
    pub move_x: f32,
    pub move_y: f32,
    pub action1: bool,
    pub action2: bool,
    pub orient_alpha: f32,
}

impl InputSnapshot {
    pub fn reset(&mut self) {
        self.move_x = 0.0;
        self.move_y = 0.0;
        self.action1 = false;
        self.action2 = false;
    }
}
