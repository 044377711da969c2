//! Renderer stream message definitions
//! These are the wire types between the host and renderer clients

use serde::{Deserialize, Serialize};

use crate::device::{ColorSymbol, ConnectionStatus};
use crate::game::entity::{Entity, EntityPhase};
use crate::game::field::Playfield;
use crate::players::{Calibration, Player, PlayerId};

/// Messages sent from a renderer to the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from the host to renderers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { server_time: u64 },

    /// Session state (sent at regular intervals)
    Snapshot {
        /// Simulation frame number
        frame: u64,
        state: SessionSnapshot,
        /// Events that occurred since last snapshot
        events: Vec<GameEvent>,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Everything a renderer or operator panel needs to draw
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub frame: u64,
    pub running: bool,
    pub dark: bool,
    pub difficulty: usize,
    pub difficulty_label: &'static str,
    pub field: Playfield,
    pub players: Vec<PlayerView>,
    pub targets: Vec<TargetView>,
}

/// A player as shown to renderers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub address: String,
    pub threshold: u8,
    pub status: ConnectionStatus,
    pub shots: u32,
    pub hits: u32,
    pub accuracy: u32,
    pub calibration: Calibration,
    pub device: DeviceView,
}

/// Device metadata without credentials
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    pub version: String,
    pub wifi_ssid: String,
    pub ap_ssid: String,
    pub oled_width: u32,
    pub oled_height: u32,
}

impl PlayerView {
    pub fn new(player: &Player, calibration: Calibration) -> Self {
        let device = player.link.device();
        Self {
            id: player.id,
            name: player.name.clone(),
            address: player.address.clone(),
            threshold: player.threshold,
            status: player.status(),
            shots: player.shots,
            hits: player.hits,
            accuracy: player.accuracy(),
            calibration,
            device: DeviceView {
                version: device.version.clone(),
                wifi_ssid: device.wifi.ssid.clone(),
                ap_ssid: device.ap.ssid.clone(),
                oled_width: device.oled_width,
                oled_height: device.oled_height,
            },
        }
    }
}

/// A live target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetView {
    pub color: ColorSymbol,
    /// Short hex code of the color
    pub hex: &'static str,
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub vel_x: f64,
    pub vel_y: f64,
    pub phase: EntityPhase,
    pub frame: u8,
    pub facing_left: bool,
}

impl From<&Entity> for TargetView {
    fn from(entity: &Entity) -> Self {
        Self {
            color: entity.color,
            hex: entity.color.hex(),
            x: entity.x,
            y: entity.y,
            size: entity.size,
            vel_x: entity.vel_x,
            vel_y: entity.vel_y,
            phase: entity.phase,
            frame: entity.frame,
            facing_left: entity.facing_left(),
        }
    }
}

/// Game events for renderers and audio
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    /// A player pulled the trigger; `cue` selects the shot sound
    ShotFired {
        player: PlayerId,
        color: ColorSymbol,
        cue: u8,
    },
    /// A shot struck a target; `cue` selects the hit sound
    TargetHit {
        player: PlayerId,
        color: ColorSymbol,
        cue: u8,
    },
    TargetSpawned {
        color: ColorSymbol,
        x: f64,
        y: f64,
        size: f64,
    },
    TargetEscaped { color: ColorSymbol },
    /// A struck target left play; drives the feather effect
    TargetDestroyed {
        color: ColorSymbol,
        x: f64,
        y: f64,
        vel_x: f64,
        vel_y: f64,
        size: f64,
        feathers: u8,
    },
    /// The game was (re)started
    SessionStarted { difficulty: usize },
}
