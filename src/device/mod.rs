//! Light gun devices: wire protocol, color classification and links

pub mod classifier;
pub mod link;
pub mod protocol;
pub mod transport;

pub use classifier::{classify, ColorSymbol};
pub use link::{ConnectionStatus, DeviceLink, FrameOutcome, LinkError, LinkState};
pub use transport::{Connector, Frame, LinkEvent, LinkEventKind, WsConnector};
