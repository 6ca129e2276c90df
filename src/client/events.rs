//! Lifecycle events reported to the application through
//! [`ClientHandler::on_event`](super::ports::ClientHandler::on_event).

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// An access token is available (freshly provisioned or loaded).
    Provisioned,
    /// The client reached `Connected`.
    Active,
    Suspended,
    Disconnected,
    /// Server time was refreshed.
    TimeUpdate,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provisioned => "PROVISIONED",
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Disconnected => "DISCONNECTED",
            Self::TimeUpdate => "TIME_UPDATE",
        };
        f.write_str(name)
    }
}
