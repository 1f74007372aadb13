// Board version from the cape's identity EEPROM
//
// The BCD version lives in the low nibbles of bytes 40 and 41 of the sysfs
// `eeprom` node for the cape's slot.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{CapeError, Result};
use super::types::BoardAddress;
use crate::config::EEPROM_ROOT;

/// Byte offset of the tens digit; the units digit follows it
pub const VERSION_OFFSET: usize = 40;

/// Something that can report the hardware version of a cape slot
pub trait VersionSource {
    fn board_version(&self, board: BoardAddress) -> Result<u8>;
}

/// Reads versions from `<root>/1-005X/eeprom`
#[derive(Debug, Clone)]
pub struct EepromVersion {
    root: PathBuf,
}

impl EepromVersion {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, board: BoardAddress) -> PathBuf {
        self.root.join(board.eeprom_device()).join("eeprom")
    }
}

impl Default for EepromVersion {
    fn default() -> Self {
        Self::new(EEPROM_ROOT)
    }
}

impl VersionSource for EepromVersion {
    fn board_version(&self, board: BoardAddress) -> Result<u8> {
        let path = self.path_for(board);
        let header = read_header(&path).map_err(|e| CapeError::VersionReadFailure {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let version = parse_version(&header).map_err(|reason| CapeError::VersionReadFailure {
            path: path.display().to_string(),
            reason,
        })?;
        debug!("Board {} EEPROM version {:02}", board.slot(), version);
        Ok(version)
    }
}

fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(VERSION_OFFSET + 2);
    File::open(path)?
        .take((VERSION_OFFSET + 2) as u64)
        .read_to_end(&mut header)?;
    Ok(header)
}

/// Decode the two BCD nibbles at `VERSION_OFFSET`
pub fn parse_version(eeprom: &[u8]) -> std::result::Result<u8, String> {
    let (Some(&tens), Some(&units)) = (eeprom.get(VERSION_OFFSET), eeprom.get(VERSION_OFFSET + 1))
    else {
        return Err(format!(
            "no version number found ({} bytes, need {})",
            eeprom.len(),
            VERSION_OFFSET + 2
        ));
    };

    let (tens, units) = (tens & 0x0f, units & 0x0f);
    if tens > 9 || units > 9 {
        return Err(format!("invalid version digits 0x{:x}{:x}", tens, units));
    }
    Ok(tens * 10 + units)
}

/// Version of the cape in `board`, read from the default sysfs location
pub fn board_version(board: BoardAddress) -> Result<u8> {
    EepromVersion::default().board_version(board)
}
