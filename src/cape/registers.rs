// DMCC register map
//
// All multi-byte fields are little-endian. Status fields are only coherent
// after a refresh commit has latched them.

use super::types::{Motor, PidMode};

/// Width of a register field in bytes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte = 1,
    Word = 2,
    DWord = 4,
}

/// One logical quantity in the register file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: u8,
    pub width: Width,
    pub signed: bool,
}

impl Field {
    const fn new(offset: u8, width: Width, signed: bool) -> Self {
        Self {
            offset,
            width,
            signed,
        }
    }

    /// Offset of the byte following this field
    pub const fn end(self) -> u8 {
        self.offset + self.width as u8
    }
}

/// Per-motor register block
#[derive(Debug, Clone, Copy)]
pub struct MotorFields {
    pub power: Field,
    pub qei_position: Field,
    pub qei_velocity: Field,
    pub current: Field,
    pub target_position: Field,
    pub target_velocity: Field,
    /// First word of the (P, I, D) position block
    pub position_pid: Field,
    /// First word of the (P, I, D) velocity block
    pub velocity_pid: Field,
    pub dir_bit: u8,
    pub qei_dir_bit: u8,
}

impl MotorFields {
    pub fn pid(&self, mode: PidMode) -> Field {
        match mode {
            PidMode::Position => self.position_pid,
            PidMode::Velocity => self.velocity_pid,
        }
    }
}

/// Direction bitfield: motor dirs in bits 0-1, QEI dirs in bits 2-3
pub const DIRECTION_CONFIG: Field = Field::new(0x01, Width::Byte, false);
/// Motor supply voltage in millivolts
pub const SUPPLY_VOLTAGE: Field = Field::new(0x06, Width::Word, false);
pub const IDENTITY: u8 = 0xE0;
pub const IDENTITY_LEN: usize = 16;
/// Write-triggered command register
pub const COMMAND: u8 = 0xFF;

/// Spacing between consecutive P, I and D words of a PID block
pub const PID_STRIDE: u8 = 2;

pub const MOTOR_FIELDS: [MotorFields; 2] = [
    MotorFields {
        power: Field::new(0x02, Width::Word, true),
        qei_position: Field::new(0x10, Width::DWord, false),
        qei_velocity: Field::new(0x18, Width::Word, true),
        current: Field::new(0x1C, Width::Word, false),
        target_position: Field::new(0x20, Width::DWord, false),
        target_velocity: Field::new(0x28, Width::Word, true),
        position_pid: Field::new(0x30, Width::Word, true),
        velocity_pid: Field::new(0x36, Width::Word, true),
        dir_bit: 0,
        qei_dir_bit: 2,
    },
    MotorFields {
        power: Field::new(0x04, Width::Word, true),
        qei_position: Field::new(0x14, Width::DWord, false),
        qei_velocity: Field::new(0x1A, Width::Word, true),
        current: Field::new(0x1E, Width::Word, false),
        target_position: Field::new(0x24, Width::DWord, false),
        target_velocity: Field::new(0x2A, Width::Word, true),
        position_pid: Field::new(0x40, Width::Word, true),
        velocity_pid: Field::new(0x46, Width::Word, true),
        dir_bit: 1,
        qei_dir_bit: 3,
    },
];

pub fn motor(motor: Motor) -> &'static MotorFields {
    &MOTOR_FIELDS[motor.index()]
}

/// Operations latched by writing the command register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Snapshot all status registers
    Refresh,
    Power(Motor),
    PowerBoth,
    HoldPosition(Motor),
    HoldPositionBoth,
    HoldVelocity(Motor),
    HoldVelocityBoth,
    ResetQei(Motor),
    ResetQeiBoth,
}

impl Commit {
    pub fn code(self) -> u8 {
        match self {
            Commit::Refresh => 0x00,
            Commit::Power(m) => m.number(),
            Commit::PowerBoth => 0x03,
            Commit::HoldPosition(m) => 0x10 | m.number(),
            Commit::HoldPositionBoth => 0x13,
            Commit::HoldVelocity(m) => 0x20 | m.number(),
            Commit::HoldVelocityBoth => 0x23,
            Commit::ResetQei(m) => 0x2F + m.number(),
            Commit::ResetQeiBoth => 0x32,
        }
    }

    pub fn decode(code: u8) -> Option<Self> {
        let commit = match code {
            0x00 => Commit::Refresh,
            0x01 => Commit::Power(Motor::One),
            0x02 => Commit::Power(Motor::Two),
            0x03 => Commit::PowerBoth,
            0x11 => Commit::HoldPosition(Motor::One),
            0x12 => Commit::HoldPosition(Motor::Two),
            0x13 => Commit::HoldPositionBoth,
            0x21 => Commit::HoldVelocity(Motor::One),
            0x22 => Commit::HoldVelocity(Motor::Two),
            0x23 => Commit::HoldVelocityBoth,
            0x30 => Commit::ResetQei(Motor::One),
            0x31 => Commit::ResetQei(Motor::Two),
            0x32 => Commit::ResetQeiBoth,
            _ => return None,
        };
        Some(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_codes() {
        assert_eq!(Commit::Refresh.code(), 0x00);
        assert_eq!(Commit::Power(Motor::One).code(), 0x01);
        assert_eq!(Commit::Power(Motor::Two).code(), 0x02);
        assert_eq!(Commit::PowerBoth.code(), 0x03);
        assert_eq!(Commit::HoldPosition(Motor::One).code(), 0x11);
        assert_eq!(Commit::HoldPosition(Motor::Two).code(), 0x12);
        assert_eq!(Commit::HoldPositionBoth.code(), 0x13);
        assert_eq!(Commit::HoldVelocity(Motor::One).code(), 0x21);
        assert_eq!(Commit::HoldVelocity(Motor::Two).code(), 0x22);
        assert_eq!(Commit::HoldVelocityBoth.code(), 0x23);
        assert_eq!(Commit::ResetQei(Motor::One).code(), 0x30);
        assert_eq!(Commit::ResetQei(Motor::Two).code(), 0x31);
        assert_eq!(Commit::ResetQeiBoth.code(), 0x32);
    }

    #[test]
    fn test_commit_decode_inverts_code() {
        for code in 0..=u8::MAX {
            if let Some(commit) = Commit::decode(code) {
                assert_eq!(commit.code(), code);
            }
        }
        assert_eq!(Commit::decode(0x10), None);
    }

    #[test]
    fn test_pid_blocks_are_six_bytes() {
        for fields in &MOTOR_FIELDS {
            assert_eq!(fields.velocity_pid.offset - fields.position_pid.offset, 6);
            assert!(fields.position_pid.signed);
        }
        assert_eq!(motor(Motor::Two).pid(PidMode::Velocity).offset, 0x46);
    }

    #[test]
    fn test_motor_blocks_do_not_overlap() {
        let [m1, m2] = MOTOR_FIELDS;
        assert_eq!(m1.qei_position.end(), m2.qei_position.offset);
        assert_eq!(m1.target_position.end(), m2.target_position.offset);
        assert_eq!(m1.power.end(), m2.power.offset);
        assert_eq!(m2.power.end(), SUPPLY_VOLTAGE.offset);
    }
}
