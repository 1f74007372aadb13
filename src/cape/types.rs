// Validated selectors and operand types shared by the command layer

use serde::{Deserialize, Serialize};

use super::error::{CapeError, Result};
use crate::config::BASE_ADDRESS;

/// One of the four cape slots, mapped to I2C addresses 0x2c..=0x2f
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct BoardAddress(u8);

impl BoardAddress {
    pub const SLOTS: u8 = 4;

    pub fn slot(self) -> u8 {
        self.0
    }

    /// Physical 7-bit bus address of the cape
    pub fn i2c_address(self) -> u16 {
        BASE_ADDRESS + self.0 as u16
    }

    /// Sysfs device name of the cape's identity EEPROM, e.g. `1-0054`
    pub fn eeprom_device(self) -> String {
        format!("1-{:04x}", 0x54 + self.0 as u16)
    }
}

impl TryFrom<i64> for BoardAddress {
    type Error = CapeError;

    fn try_from(slot: i64) -> Result<Self> {
        if (0..Self::SLOTS as i64).contains(&slot) {
            Ok(Self(slot as u8))
        } else {
            Err(CapeError::InvalidArgument {
                what: "board number",
                value: slot,
                expected: "between 0 and 3",
            })
        }
    }
}

impl From<BoardAddress> for u8 {
    fn from(board: BoardAddress) -> u8 {
        board.0
    }
}

/// Motor channel on the cape
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub enum Motor {
    One = 1,
    Two = 2,
}

impl Motor {
    pub const ALL: [Motor; 2] = [Motor::One, Motor::Two];

    pub fn number(self) -> u8 {
        self as u8
    }

    /// Zero-based index into per-motor tables
    pub fn index(self) -> usize {
        self as usize - 1
    }
}

impl TryFrom<i64> for Motor {
    type Error = CapeError;

    fn try_from(number: i64) -> Result<Self> {
        match number {
            1 => Ok(Motor::One),
            2 => Ok(Motor::Two),
            _ => Err(CapeError::InvalidArgument {
                what: "motor number",
                value: number,
                expected: "1 or 2",
            }),
        }
    }
}

impl From<Motor> for u8 {
    fn from(motor: Motor) -> u8 {
        motor.number()
    }
}

/// Which PID block of a motor is addressed
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidMode {
    Position = 0,
    Velocity = 1,
}

impl TryFrom<i64> for PidMode {
    type Error = CapeError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(PidMode::Position),
            1 => Ok(PidMode::Velocity),
            _ => Err(CapeError::InvalidArgument {
                what: "position/velocity selector",
                value,
                expected: "0 (position) or 1 (velocity)",
            }),
        }
    }
}

/// Motor or encoder direction bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn from_bit(bit: u8) -> Self {
        if bit & 1 == 0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    pub fn bit(self) -> u8 {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }
}

/// Gains consumed by the cape's onboard PID loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidConstants {
    pub p: i16,
    pub i: i16,
    pub d: i16,
}

impl PidConstants {
    pub const fn new(p: i16, i: i16, d: i16) -> Self {
        Self { p, i, d }
    }

    /// Build from wide integers, rejecting anything outside the signed 16-bit range
    pub fn checked(p: i64, i: i64, d: i64) -> Result<Self> {
        Ok(Self {
            p: gain("P", p)?,
            i: gain("I", i)?,
            d: gain("D", d)?,
        })
    }
}

fn gain(what: &'static str, value: i64) -> Result<i16> {
    i16::try_from(value).map_err(|_| CapeError::OutOfRange {
        what,
        value,
        min: i16::MIN as i64,
        max: i16::MAX as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cape::ErrorKind;

    #[test]
    fn test_board_address_mapping() {
        let board = BoardAddress::try_from(0).unwrap();
        assert_eq!(board.i2c_address(), 0x2c);
        assert_eq!(board.eeprom_device(), "1-0054");

        let board = BoardAddress::try_from(3).unwrap();
        assert_eq!(board.i2c_address(), 0x2f);
        assert_eq!(board.eeprom_device(), "1-0057");
    }

    #[test]
    fn test_board_address_rejects_out_of_range() {
        for slot in [-1, 4, 5, 255, i64::MAX] {
            let err = BoardAddress::try_from(slot).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn test_motor_selector() {
        assert_eq!(Motor::try_from(1).unwrap(), Motor::One);
        assert_eq!(Motor::try_from(2).unwrap().index(), 1);
        for n in [0, 3, -1, 0x11] {
            assert_eq!(
                Motor::try_from(n).unwrap_err().kind(),
                ErrorKind::InvalidArgument
            );
        }
    }

    #[test]
    fn test_pid_mode_selector() {
        assert_eq!(PidMode::try_from(0).unwrap(), PidMode::Position);
        assert_eq!(PidMode::try_from(1).unwrap(), PidMode::Velocity);
        assert!(PidMode::try_from(2).is_err());
    }

    #[test]
    fn test_pid_constants_bounds() {
        let pid = PidConstants::checked(-32768, 32767, 0).unwrap();
        assert_eq!(pid, PidConstants::new(i16::MIN, i16::MAX, 0));

        let err = PidConstants::checked(32768, 0, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert!(PidConstants::checked(0, -32769, 0).is_err());
        assert!(PidConstants::checked(0, 0, 40000).is_err());
    }

    #[test]
    fn test_direction_bits() {
        assert_eq!(Direction::from_bit(0), Direction::Forward);
        assert_eq!(Direction::from_bit(1), Direction::Reverse);
        assert_eq!(Direction::Reverse.bit(), 1);
    }
}
