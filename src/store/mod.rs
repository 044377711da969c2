//! Durable settings storage

pub mod settings;

pub use settings::{PlayerProfile, Settings, SettingsStore, StoreError};
