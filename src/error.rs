//! Error types for the flowpath dataplane

use crate::action::AddressSpace;
use crate::app::AppState;
use thiserror::Error;

/// Dataplane error type
#[derive(Error, Debug)]
pub enum Error {
    /// The buffer pool has no free buffers
    #[error("buffer pool exhausted")]
    PoolExhausted,

    /// Ingress frame larger than a pool buffer
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// A field id with no binding in the context
    #[error("field {0} is not bound")]
    UnboundField(u32),

    /// Gathered field lengths do not sum to the table's key width
    #[error("key width mismatch: expected {expected}, found {found}")]
    KeyWidthMismatch { expected: u16, found: u16 },

    /// Key wider than the fixed maximum
    #[error("key too wide: {0} bytes")]
    KeyTooWide(usize),

    /// Table declared with an unusable key width
    #[error("invalid key width: {0}")]
    InvalidKeyWidth(u16),

    /// Table type code outside the known set
    #[error("unknown table type: {0}")]
    UnknownTableType(u32),

    /// No table registered under the given id
    #[error("unknown table: {0}")]
    UnknownTable(u32),

    /// Dataplane name already registered
    #[error("dataplane name already exists: {0}")]
    DuplicateDataplaneName(String),

    /// Dataplane name not registered
    #[error("dataplane name not in use: {0}")]
    UnknownDataplane(String),

    /// Port name not registered
    #[error("unknown port: {0}")]
    UnknownPort(String),

    /// Port id not registered
    #[error("unknown port id: {0}")]
    UnknownPortId(u32),

    /// A field range falls outside its address space
    #[error("range {offset}+{length} out of bounds in {space:?} memory")]
    OutOfBounds {
        space: AddressSpace,
        offset: u16,
        length: u16,
    },

    /// SetField value length differs from the field length
    #[error("field value length mismatch: field is {expected} bytes, value is {found}")]
    FieldValueMismatch { expected: u16, found: usize },

    /// Action or instruction encoding ended early
    #[error("truncated encoding")]
    TruncatedEncoding,

    /// Unknown discriminant byte in an encoding
    #[error("unknown discriminant: {0:#04x}")]
    UnknownDiscriminant(u8),

    /// Loading over an already-loaded application
    #[error("application already loaded")]
    AppAlreadyLoaded,

    /// Unloading when no application is loaded
    #[error("application is not loaded")]
    AppNotLoaded,

    /// Lifecycle operation invalid in the current state
    #[error("application cannot {op} while {state:?}")]
    AppLifecycle { state: AppState, op: &'static str },

    /// Packet delivered to a dataplane with no application
    #[error("no application loaded")]
    NoApplication,

    /// Transmit failure
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Transmit error returned by [`crate::port::Port::send`]
#[derive(Error, Debug)]
pub enum PortError {
    /// Link is administratively or physically down
    #[error("link down on port {0}")]
    LinkDown(u32),

    /// Port has been removed or closed
    #[error("port {0} is closed")]
    Closed(u32),
}

/// Result type for the flowpath dataplane
pub type Result<T> = std::result::Result<T, Error>;
