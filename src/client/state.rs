//! Connection states and the transition table.
//!
//! ```text
//!   INIT ──▶ DISCONNECTED ──connect──▶ CONNECTING ──▶ CONNECTED ⇄ SUSPENDED
//!                 ▲                        │              │           │
//!                 └──── start failure ─────┘              │           │
//!                 └──────────────── disconnect ───────────┴───────────┘
//! ```
//!
//! [`check`] decides, for every `(state, operation)` pair, whether the
//! operation proceeds, is already satisfied, or is invalid. The client
//! performs the side effects; this module holds no state.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Init = 0,
    Disconnected = 1,
    Connecting = 2,
    Connected = 3,
    Suspended = 4,
}

impl ConnectionState {
    pub const COUNT: usize = 5;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Init,
        Self::Disconnected,
        Self::Connecting,
        Self::Connected,
        Self::Suspended,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations that move the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Disconnect,
    Suspend,
    Resume,
}

impl Operation {
    pub const ALL: [Self; 4] = [Self::Connect, Self::Disconnect, Self::Suspend, Self::Resume];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Run the operation.
    Proceed,
    /// The target state already holds; succeed without side effects.
    Already,
    /// Not allowed from this state.
    Invalid,
}

/// Result of an idempotent lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Already,
}

pub const fn check(state: ConnectionState, op: Operation) -> Transition {
    use ConnectionState as S;
    use Operation as Op;

    match (op, state) {
        (Op::Connect, S::Disconnected) => Transition::Proceed,
        (Op::Connect, S::Connected | S::Suspended) => Transition::Already,
        (Op::Connect, S::Init | S::Connecting) => Transition::Invalid,

        // Disconnecting while CONNECTING aborts a stalled provisioning or
        // subscription attempt.
        (Op::Disconnect, S::Connecting | S::Connected | S::Suspended) => Transition::Proceed,
        (Op::Disconnect, S::Disconnected) => Transition::Already,
        (Op::Disconnect, S::Init) => Transition::Invalid,

        (Op::Suspend, S::Connected) => Transition::Proceed,
        (Op::Suspend, S::Suspended) => Transition::Already,
        (Op::Suspend, S::Init | S::Disconnected | S::Connecting) => Transition::Invalid,

        (Op::Resume, S::Suspended) => Transition::Proceed,
        (Op::Resume, S::Connected) => Transition::Already,
        (Op::Resume, S::Init | S::Disconnected | S::Connecting) => Transition::Invalid,
    }
}
