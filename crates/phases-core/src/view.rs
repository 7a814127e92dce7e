use std::collections::BTreeSet;
use std::fmt;

use crate::surface::ControlSurface;
use crate::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting...",
            Self::Connected => "connected",
        }
    }

    /// The connect control is only offered while disconnected.
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The presentation side. It never talks to the controller; it only reads the
/// control surface it is handed.
pub trait ViewRenderer {
    /// Full teardown and rebuild, after a handshake or reconnect.
    fn rebuild(&mut self, surface: &ControlSurface);

    /// Redraw after a snapshot. `changed` lists entities whose playhead or
    /// loop point moved; redrawing everything is also correct.
    fn refresh(&mut self, surface: &ControlSurface, changed: &BTreeSet<EntityId>);

    fn connection_changed(&mut self, state: ConnectionState);
}
