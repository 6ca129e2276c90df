//! Unified error types for the device client.
//!
//! Every public operation returns [`Result`]. Subsystems keep their own
//! small `Copy` error enums and convert into [`Error`] at the boundary, so
//! the connection state machine handles failures uniformly.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level client error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The session is not `Connected`; nothing was allocated.
    NotReady,
    /// No free request slot, or a path/payload does not fit its buffer.
    NoSpace,
    /// The operation is not valid from the current connection state.
    InvalidState,
    /// The transport could not be opened.
    NotConnected,
    /// The transport reported a failure.
    Transport(TransportError),
    /// A payload could not be encoded into its request buffer.
    Encode(CodecError),
    /// A payload received from the server could not be decoded.
    Decode(CodecError),
    /// The provisioning handshake failed.
    Provision(ProvisionError),
    /// The firmware image target refused an operation.
    Image(ImageError),
    /// Persistent storage failed.
    Storage(StorageError),
    /// Configuration is missing a required field or is inconsistent.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "client not connected"),
            Self::NoSpace => write!(f, "no space for request"),
            Self::InvalidState => write!(f, "invalid in current connection state"),
            Self::NotConnected => write!(f, "transport not connected"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Encode(e) => write!(f, "encode: {e}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Provision(e) => write!(f, "provisioning: {e}"),
            Self::Image(e) => write!(f, "image: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Destination buffer cannot hold even one element.
    BufferTooSmall,
    /// Input bytes are not a valid message in the active encoding.
    Malformed,
    /// A string field exceeded its fixed capacity.
    FieldTooLong,
    /// Text payload is not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::Malformed => write!(f, "malformed payload"),
            Self::FieldTooLong => write!(f, "field exceeds capacity"),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failure reported by the transport collaborator for a request or for
/// a session-level operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The request was cancelled (by us or by the transport).
    Cancelled,
    /// No response within the transport's retransmission budget.
    Timeout,
    /// Server address could not be resolved.
    Unresolved,
    /// Any other negative result code from the transport.
    Io(i32),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Timeout => write!(f, "timed out"),
            Self::Unresolved => write!(f, "server address unresolved"),
            Self::Io(code) => write!(f, "I/O error {code}"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    ReadFailed,
    WriteFailed,
    BufferTooSmall,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::ReadFailed => write!(f, "read failed"),
            Self::WriteFailed => write!(f, "write failed"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Image target errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    /// Target could not be prepared for a new image.
    InitFailed,
    /// Flash write failed.
    WriteFailed,
    /// Written image did not verify.
    VerifyFailed,
    /// Bootloader refused to schedule or confirm the image.
    BootFailed,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed => write!(f, "image init failed"),
            Self::WriteFailed => write!(f, "image write failed"),
            Self::VerifyFailed => write!(f, "image verification failed"),
            Self::BootFailed => write!(f, "bootloader operation failed"),
        }
    }
}

impl From<ImageError> for Error {
    fn from(e: ImageError) -> Self {
        Self::Image(e)
    }
}

// ---------------------------------------------------------------------------
// Provisioning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionError {
    /// Response body was not a JSON object.
    Malformed,
    /// `status` was missing or not `SUCCESS`.
    Rejected,
    /// `credentialsType` was missing or not `ACCESS_TOKEN`.
    UnsupportedCredentials,
    /// `credentialsValue` was missing or empty.
    MissingToken,
    /// Token does not fit the token buffer.
    TokenTooLong,
    /// Server answered with something other than 2.05.
    UnexpectedResponse,
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed response"),
            Self::Rejected => write!(f, "request rejected by server"),
            Self::UnsupportedCredentials => write!(f, "unsupported credentials type"),
            Self::MissingToken => write!(f, "no access token in response"),
            Self::TokenTooLong => write!(f, "access token too long"),
            Self::UnexpectedResponse => write!(f, "unexpected response code"),
        }
    }
}

impl From<ProvisionError> for Error {
    fn from(e: ProvisionError) -> Self {
        Self::Provision(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, Error>;
