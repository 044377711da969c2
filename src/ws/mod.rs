//! Renderer stream

pub mod handler;
pub mod protocol;
