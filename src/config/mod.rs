//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::util::time::{DEFAULT_FRAME_RATE, DEFAULT_SNAPSHOT_RATE};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Control/renderer API binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines instead of text
    pub log_json: bool,

    /// Where the persisted settings record lives
    pub settings_path: PathBuf,

    /// Simulation ticks per second
    pub frame_rate: u32,
    /// Renderer snapshots per second
    pub snapshot_rate: u32,

    /// Window size the simulation lays the field out in
    pub window_width: f64,
    pub window_height: f64,
    /// Width/height ratio of the field artwork
    pub field_aspect: f64,

    /// Fixed simulation seed (random when unset)
    pub rng_seed: Option<u64>,

    /// Allowed client origins for CORS (comma-separated), if any
    pub client_origin: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let (window_width, window_height) = match env::var("PLAYFIELD") {
            Ok(raw) => parse_playfield(&raw).ok_or(ConfigError::Invalid("PLAYFIELD"))?,
            Err(_) => (1920.0, 1080.0),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),

            settings_path: env::var("QUACKHUNT_SETTINGS")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("quackhunt_settings.json")),

            frame_rate: parse_var("FRAME_RATE", DEFAULT_FRAME_RATE)?,
            snapshot_rate: parse_var("SNAPSHOT_RATE", DEFAULT_SNAPSHOT_RATE)?,

            window_width,
            window_height,
            field_aspect: parse_var("FIELD_ASPECT", 16.0 / 9.0)?,

            rng_seed: match env::var("RNG_SEED") {
                Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid("RNG_SEED"))?),
                Err(_) => None,
            },

            client_origin: env::var("CLIENT_ORIGIN").ok(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_json: false,
            settings_path: PathBuf::from("quackhunt_settings.json"),
            frame_rate: DEFAULT_FRAME_RATE,
            snapshot_rate: DEFAULT_SNAPSHOT_RATE,
            window_width: 1920.0,
            window_height: 1080.0,
            field_aspect: 16.0 / 9.0,
            rng_seed: None,
            client_origin: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Parse `<width>x<height>`
fn parse_playfield(raw: &str) -> Option<(f64, f64)> {
    let (w, h) = raw.trim().split_once(|c: char| c == 'x' || c == 'X')?;
    let w: f64 = w.trim().parse().ok()?;
    let h: f64 = h.trim().parse().ok()?;
    (w > 0.0 && h > 0.0).then_some((w, h))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playfield_parses_width_by_height() {
        assert_eq!(parse_playfield("1280x720"), Some((1280.0, 720.0)));
        assert_eq!(parse_playfield(" 800 X 600 "), Some((800.0, 600.0)));
    }

    #[test]
    fn playfield_rejects_garbage() {
        assert_eq!(parse_playfield("1280"), None);
        assert_eq!(parse_playfield("0x720"), None);
        assert_eq!(parse_playfield("axb"), None);
    }
}
