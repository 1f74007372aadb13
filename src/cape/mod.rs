// DMCC motor cape driver
//
// Provides:
// - Byte transport over Linux i2c-dev and little-endian register marshaling
// - Session handshake (EEPROM version, identity string, version whitelist)
// - Register map and command encoding for power, targets, PID gains and QEI
// - Blocking move-until supervision with timeout and cancellation

mod bus;
mod commands;
pub mod convergence;
pub mod eeprom;
mod error;
pub mod registers;
mod session;
pub mod sim;
mod transport;
mod types;

pub use bus::{Bus, signed_word};
pub use commands::{DEFAULT_POSITION_PID, DEFAULT_VELOCITY_PID};
pub use convergence::{CancelToken, Convergence, ConvergenceReport, Outcome, TimedMove};
pub use eeprom::{EepromVersion, VersionSource, board_version};
pub use error::{CapeError, ErrorKind, Result};
pub use session::{Session, SessionOptions, verify_identity};
pub use transport::{I2cDevice, Transport};
pub use types::{BoardAddress, Direction, Motor, PidConstants, PidMode};
