// Error types for cape communication and control

/// Coarse classification of a [`CapeError`], stable for programmatic checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    IoFailure,
    ConnectionFailure,
    VersionReadFailure,
    IdentityMismatch,
    VersionMismatch,
    IncompatibleVersion,
    OutOfRange,
    AllocationFailure,
    AddressInUse,
}

#[derive(Debug, thiserror::Error)]
pub enum CapeError {
    #[error("Invalid {what} {value}: must be {expected}")]
    InvalidArgument {
        what: &'static str,
        value: i64,
        expected: &'static str,
    },

    #[error("I2C transfer error: {0}")]
    Bus(#[from] std::io::Error),

    #[error("Short I2C {op} at 0x{addr:02X}: expected {expected} bytes, transferred {actual}")]
    ShortTransfer {
        op: &'static str,
        addr: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Cannot bind {device} to address 0x{address:02x}: {source}")]
    ConnectionFailure {
        device: String,
        address: u16,
        source: std::io::Error,
    },

    #[error("Cannot read board version from {path}: {reason}")]
    VersionReadFailure { path: String, reason: String },

    #[error("Board is not a DMCC cape (identity {identity:?})")]
    IdentityMismatch { identity: String },

    #[error("Board version {board} does not match on-board software version {software}")]
    VersionMismatch { board: u8, software: u8 },

    #[error("Board software version {version:02} is not supported by this driver")]
    IncompatibleVersion { version: u8 },

    #[error("{what} {value} is out of range [{min}, {max}]")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Cannot allocate a {bytes}-byte read buffer")]
    AllocationFailure { bytes: usize },

    #[error("Board {slot} on {bus} already has an open session")]
    AddressInUse { bus: String, slot: u8 },
}

impl CapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CapeError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            CapeError::Bus(_) | CapeError::ShortTransfer { .. } => ErrorKind::IoFailure,
            CapeError::ConnectionFailure { .. } => ErrorKind::ConnectionFailure,
            CapeError::VersionReadFailure { .. } => ErrorKind::VersionReadFailure,
            CapeError::IdentityMismatch { .. } => ErrorKind::IdentityMismatch,
            CapeError::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            CapeError::IncompatibleVersion { .. } => ErrorKind::IncompatibleVersion,
            CapeError::OutOfRange { .. } => ErrorKind::OutOfRange,
            CapeError::AllocationFailure { .. } => ErrorKind::AllocationFailure,
            CapeError::AddressInUse { .. } => ErrorKind::AddressInUse,
        }
    }
}

pub type Result<T> = std::result::Result<T, CapeError>;
