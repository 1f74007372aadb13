// Session establishment and board verification
//
// A session exists only after the handshake passed: EEPROM version read,
// identity string checked, on-board software version matched against the
// EEPROM and against the compatibility list. Any failure drops the handle.

use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::bus::Bus;
use super::eeprom::{EepromVersion, VersionSource};
use super::error::{CapeError, Result};
use super::registers::{IDENTITY, IDENTITY_LEN};
use super::transport::{I2cDevice, Transport};
use super::types::BoardAddress;
use crate::config::{BUS_DEVICE, COMPATIBLE_VERSIONS, EEPROM_ROOT, IDENTITY_PREFIX};

/// (bus id, slot) pairs that currently have a live session in this process
static CLAIMS: Mutex<Vec<(String, u8)>> = parking_lot::const_mutex(Vec::new());

/// Where to find the hardware and which firmware to accept
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub device: String,
    pub eeprom_root: PathBuf,
    pub compatible_versions: Vec<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            device: BUS_DEVICE.to_string(),
            eeprom_root: PathBuf::from(EEPROM_ROOT),
            compatible_versions: COMPATIBLE_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Exclusive hold on one board slot of one bus, released on drop
struct AddressClaim {
    bus: String,
    slot: u8,
}

impl AddressClaim {
    fn acquire(bus: &str, board: BoardAddress) -> Result<Self> {
        let mut claims = CLAIMS.lock();
        if claims.iter().any(|(b, s)| b == bus && *s == board.slot()) {
            return Err(CapeError::AddressInUse {
                bus: bus.to_string(),
                slot: board.slot(),
            });
        }
        claims.push((bus.to_string(), board.slot()));
        Ok(Self {
            bus: bus.to_string(),
            slot: board.slot(),
        })
    }
}

impl Drop for AddressClaim {
    fn drop(&mut self) {
        CLAIMS
            .lock()
            .retain(|(b, s)| !(b == &self.bus && *s == self.slot));
    }
}

/// A verified, exclusive connection to one cape
pub struct Session<T: Transport = I2cDevice> {
    pub(super) bus: Bus<T>,
    board: BoardAddress,
    version: u8,
    // Declared last so the handle is closed before the slot is released
    _claim: AddressClaim,
}

impl Session<I2cDevice> {
    /// Connect to the cape in `board` on the default bus
    pub fn open(board: BoardAddress) -> Result<Self> {
        Self::open_with_options(board, &SessionOptions::default())
    }

    pub fn open_with_options(board: BoardAddress, options: &SessionOptions) -> Result<Self> {
        info!(
            "Opening DMCC board {} on {} (0x{:02x})",
            board.slot(),
            options.device,
            board.i2c_address()
        );
        let device = I2cDevice::open(&options.device, board.i2c_address())?;
        let versions = EepromVersion::new(&options.eeprom_root);
        Self::connect(board, device, &versions, &options.compatible_versions)
    }
}

impl<T: Transport> Session<T> {
    /// Run the handshake over an already-bound transport
    pub fn connect(
        board: BoardAddress,
        transport: T,
        versions: &dyn VersionSource,
        compatible: &[String],
    ) -> Result<Self> {
        let claim = AddressClaim::acquire(transport.bus_id(), board)?;
        let mut bus = Bus::new(transport);

        let board_version = versions.board_version(board)?;
        let identity = bus.read_bytes(IDENTITY_LEN, IDENTITY)?;
        let version = verify_identity(&identity, board_version, compatible)?;

        info!(
            "DMCC board {} verified (software version {:02})",
            board.slot(),
            version
        );
        Ok(Self {
            bus,
            board,
            version,
            _claim: claim,
        })
    }

    pub fn board(&self) -> BoardAddress {
        self.board
    }

    /// On-board software version confirmed by the handshake
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn transport(&self) -> &T {
        self.bus.transport()
    }

    /// End the session, releasing the bus handle and the board slot
    ///
    /// Motors keep their last command; stop them first if needed.
    pub fn close(self) {
        info!("Closing DMCC board {}", self.board.slot());
    }
}

/// Check an identity block and return the embedded software version
pub fn verify_identity(identity: &[u8], board_version: u8, compatible: &[String]) -> Result<u8> {
    let text = String::from_utf8_lossy(identity)
        .trim_end_matches('\0')
        .to_string();
    debug!("Board identity {:?}", text);

    if !identity.starts_with(IDENTITY_PREFIX.as_bytes()) {
        return Err(CapeError::IdentityMismatch { identity: text });
    }

    let digits = identity.get(8..10).unwrap_or_default();
    let &[tens, units] = digits else {
        return Err(CapeError::IdentityMismatch { identity: text });
    };
    if !tens.is_ascii_digit() || !units.is_ascii_digit() {
        return Err(CapeError::IdentityMismatch { identity: text });
    }
    let software = (tens - b'0') * 10 + (units - b'0');

    if software != board_version {
        return Err(CapeError::VersionMismatch {
            board: board_version,
            software,
        });
    }

    if !compatible.iter().any(|v| v.as_bytes() == digits) {
        return Err(CapeError::IncompatibleVersion { version: software });
    }
    Ok(software)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cape::ErrorKind;
    use crate::cape::sim::{FixedVersion, SimulatedCape};

    fn compatible() -> Vec<String> {
        SessionOptions::default().compatible_versions
    }

    fn board(slot: i64) -> BoardAddress {
        BoardAddress::try_from(slot).unwrap()
    }

    #[test]
    fn test_connect_to_simulated_cape() {
        let sim = SimulatedCape::new();
        let session = Session::connect(board(0), sim, &FixedVersion(6), &compatible()).unwrap();
        assert_eq!(session.version(), 6);
        assert_eq!(session.board().slot(), 0);
        session.close();
    }

    #[test]
    fn test_handshake_reads_identity_block() {
        let sim = SimulatedCape::new();
        let session =
            Session::connect(board(1), sim.clone(), &FixedVersion(6), &compatible()).unwrap();
        // address write + data read per identity byte, nothing else
        assert_eq!(sim.transfer_count(), 2 * IDENTITY_LEN);
        assert!(sim.commits().is_empty());
        drop(session);
    }

    #[test]
    fn test_wrong_identity() {
        let sim = SimulatedCape::new().with_identity("PWM Cape 06");
        let err = Session::connect(board(0), sim, &FixedVersion(6), &compatible())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::IdentityMismatch);
    }

    #[test]
    fn test_board_and_software_versions_disagree() {
        let sim = SimulatedCape::new();
        let err = Session::connect(board(0), sim, &FixedVersion(5), &compatible())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            CapeError::VersionMismatch {
                board: 5,
                software: 6
            }
        ));
    }

    #[test]
    fn test_unlisted_version_is_incompatible() {
        let sim = SimulatedCape::new().with_identity("DMCC Mk.07");
        let err = Session::connect(board(0), sim, &FixedVersion(7), &compatible())
            .err()
            .unwrap();
        assert!(matches!(err, CapeError::IncompatibleVersion { version: 7 }));
    }

    #[test]
    fn test_failed_handshake_releases_slot() {
        let sim = SimulatedCape::new().with_identity("nope");
        assert!(Session::connect(board(2), sim.clone(), &FixedVersion(6), &compatible()).is_err());

        let sim = sim.with_identity(crate::cape::sim::DEFAULT_IDENTITY);
        assert!(Session::connect(board(2), sim, &FixedVersion(6), &compatible()).is_ok());
    }

    #[test]
    fn test_one_session_per_slot() {
        let sim = SimulatedCape::new();
        let first =
            Session::connect(board(3), sim.clone(), &FixedVersion(6), &compatible()).unwrap();
        let err = Session::connect(board(3), sim.clone(), &FixedVersion(6), &compatible())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::AddressInUse);

        // Another slot on the same bus is independent
        let other = Session::connect(board(0), sim.clone(), &FixedVersion(6), &compatible());
        assert!(other.is_ok());

        first.close();
        assert!(Session::connect(board(3), sim, &FixedVersion(6), &compatible()).is_ok());
    }

    #[test]
    fn test_handshake_is_repeatable() {
        let sim = SimulatedCape::new();
        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let mut session =
                Session::connect(board(1), sim.clone(), &FixedVersion(6), &compatible()).unwrap();
            session.set_motor_power(crate::cape::Motor::One, 1000).unwrap();
            outcomes.push(session.version());
            session.close();
        }
        assert_eq!(outcomes, vec![6, 6]);
    }

    #[test]
    fn test_short_transfer_during_handshake() {
        let sim = SimulatedCape::new();
        sim.fail_after(5);
        let err = Session::connect(board(0), sim, &FixedVersion(6), &compatible())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_verify_identity_digits() {
        let list = compatible();
        assert_eq!(verify_identity(b"DMCC Mk.05\0\0\0\0\0\0", 5, &list).unwrap(), 5);
        let err = verify_identity(b"DMCC Mk.x5", 5, &list).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityMismatch);
        let err = verify_identity(b"DMCC Mk", 5, &list).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityMismatch);
    }
}
