// Command encoding and status readback
//
// Setters stage operand bytes in the motor's register block, then write a
// commit code to the command register; nothing happens on the board until
// the commit lands. Getters issue a refresh commit first so every field read
// comes from the same latched snapshot.

use tracing::debug;

use super::bus::signed_word;
use super::error::{CapeError, Result};
use super::registers::{self, COMMAND, Commit, DIRECTION_CONFIG, Field, PID_STRIDE, SUPPLY_VOLTAGE, Width};
use super::session::Session;
use super::transport::Transport;
use super::types::{Direction, Motor, PidConstants, PidMode};
use crate::config::MAX_POWER;

/// Factory gains written by [`Session::set_default_pid_constants`]
pub const DEFAULT_VELOCITY_PID: PidConstants = PidConstants::new(-19200, -8000, -150);
pub const DEFAULT_POSITION_PID: [PidConstants; 2] = [
    PidConstants::new(-5248, -75, -500),
    PidConstants::new(-10000, -75, -500),
];

fn check_power(power: i32) -> Result<i16> {
    if !(-MAX_POWER..=MAX_POWER).contains(&power) {
        return Err(CapeError::OutOfRange {
            what: "Power",
            value: power as i64,
            min: -MAX_POWER as i64,
            max: MAX_POWER as i64,
        });
    }
    Ok(power as i16)
}

impl<T: Transport> Session<T> {
    fn commit(&mut self, commit: Commit) -> Result<()> {
        debug!("Commit {:?} (0x{:02X})", commit, commit.code());
        self.bus.write_byte(COMMAND, commit.code())
    }

    /// Latch a fresh status snapshot and read one field of it
    fn read_status(&mut self, field: Field) -> Result<u32> {
        self.commit(Commit::Refresh)?;
        match field.width {
            Width::Byte => self.bus.read_byte(field.offset).map(u32::from),
            Width::Word => self.bus.read_word(field.offset).map(u32::from),
            Width::DWord => self.bus.read_dword(field.offset),
        }
    }

    /// Rewrite one bit of the direction byte, keeping the others
    fn update_direction_bit(&mut self, bit: u8, dir: Direction) -> Result<()> {
        let current = self.bus.read_byte(DIRECTION_CONFIG.offset)?;
        let updated = (current & !(1 << bit)) | (dir.bit() << bit);
        debug!("Direction config 0x{:02X} -> 0x{:02X}", current, updated);
        self.bus.write_byte(DIRECTION_CONFIG.offset, updated)
    }

    // === Power ===

    /// Drive a motor open-loop; `power` must lie in [-10000, 10000]
    pub fn set_motor_power(&mut self, motor: Motor, power: i32) -> Result<()> {
        let power = check_power(power)?;
        debug!("Motor {} power {}", motor.number(), power);
        self.bus
            .write_word(registers::motor(motor).power.offset, power as u16)?;
        self.commit(Commit::Power(motor))
    }

    pub fn set_all_motor_power(&mut self, power: i32) -> Result<()> {
        let power = check_power(power)?;
        debug!("All motors power {}", power);
        for motor in Motor::ALL {
            self.bus
                .write_word(registers::motor(motor).power.offset, power as u16)?;
        }
        self.commit(Commit::PowerBoth)
    }

    /// Zero the power of one motor
    pub fn stop_motor(&mut self, motor: Motor) -> Result<()> {
        self.set_motor_power(motor, 0)
    }

    pub fn stop_all(&mut self) -> Result<()> {
        self.set_all_motor_power(0)
    }

    // === Closed-loop targets ===

    /// Stage a target position and switch the motor to position hold
    pub fn set_target_pos(&mut self, motor: Motor, position: u32) -> Result<()> {
        debug!("Motor {} target position {}", motor.number(), position);
        self.bus
            .write_dword(registers::motor(motor).target_position.offset, position)?;
        self.commit(Commit::HoldPosition(motor))
    }

    pub fn set_all_target_pos(&mut self, position: u32) -> Result<()> {
        debug!("All motors target position {}", position);
        for motor in Motor::ALL {
            self.bus
                .write_dword(registers::motor(motor).target_position.offset, position)?;
        }
        self.commit(Commit::HoldPositionBoth)
    }

    /// Stage a target velocity and switch the motor to velocity hold
    pub fn set_target_vel(&mut self, motor: Motor, velocity: i16) -> Result<()> {
        debug!("Motor {} target velocity {}", motor.number(), velocity);
        self.bus.write_word(
            registers::motor(motor).target_velocity.offset,
            velocity as u16,
        )?;
        self.commit(Commit::HoldVelocity(motor))
    }

    pub fn set_all_target_vel(&mut self, velocity: i16) -> Result<()> {
        debug!("All motors target velocity {}", velocity);
        for motor in Motor::ALL {
            self.bus.write_word(
                registers::motor(motor).target_velocity.offset,
                velocity as u16,
            )?;
        }
        self.commit(Commit::HoldVelocityBoth)
    }

    pub fn get_target_pos(&mut self, motor: Motor) -> Result<u32> {
        self.read_status(registers::motor(motor).target_position)
    }

    pub fn get_target_vel(&mut self, motor: Motor) -> Result<i16> {
        let raw = self.read_status(registers::motor(motor).target_velocity)?;
        Ok(signed_word(raw as u16))
    }

    // === PID gains ===

    /// Write the (P, I, D) block; the board picks the gains up without a commit
    pub fn set_pid_constants(
        &mut self,
        motor: Motor,
        mode: PidMode,
        pid: PidConstants,
    ) -> Result<()> {
        let base = registers::motor(motor).pid(mode).offset;
        debug!(
            "Motor {} {:?} PID <- P={} I={} D={}",
            motor.number(),
            mode,
            pid.p,
            pid.i,
            pid.d
        );
        self.bus.write_word(base, pid.p as u16)?;
        self.bus.write_word(base + PID_STRIDE, pid.i as u16)?;
        self.bus.write_word(base + 2 * PID_STRIDE, pid.d as u16)
    }

    pub fn get_pid_constants(&mut self, motor: Motor, mode: PidMode) -> Result<PidConstants> {
        let base = registers::motor(motor).pid(mode).offset;
        Ok(PidConstants {
            p: self.bus.read_i16(base)?,
            i: self.bus.read_i16(base + PID_STRIDE)?,
            d: self.bus.read_i16(base + 2 * PID_STRIDE)?,
        })
    }

    pub fn set_default_pid_constants(&mut self) -> Result<()> {
        for motor in Motor::ALL {
            self.set_pid_constants(motor, PidMode::Velocity, DEFAULT_VELOCITY_PID)?;
        }
        for motor in Motor::ALL {
            self.set_pid_constants(
                motor,
                PidMode::Position,
                DEFAULT_POSITION_PID[motor.index()],
            )?;
        }
        Ok(())
    }

    // === Direction ===

    /// Reverse (or restore) the drive polarity of a motor
    pub fn config_motor_dir(&mut self, motor: Motor, dir: Direction) -> Result<()> {
        self.update_direction_bit(registers::motor(motor).dir_bit, dir)
    }

    pub fn get_motor_dir(&mut self, motor: Motor) -> Result<Direction> {
        let config = self.read_status(DIRECTION_CONFIG)? as u8;
        Ok(Direction::from_bit(config >> registers::motor(motor).dir_bit))
    }

    /// Reverse (or restore) the counting direction of a motor's encoder
    pub fn config_qei_dir(&mut self, motor: Motor, dir: Direction) -> Result<()> {
        self.update_direction_bit(registers::motor(motor).qei_dir_bit, dir)
    }

    pub fn get_qei_dir(&mut self, motor: Motor) -> Result<Direction> {
        let config = self.read_status(DIRECTION_CONFIG)? as u8;
        Ok(Direction::from_bit(config >> registers::motor(motor).qei_dir_bit))
    }

    // === Encoder ===

    pub fn get_qei(&mut self, motor: Motor) -> Result<u32> {
        self.read_status(registers::motor(motor).qei_position)
    }

    pub fn get_qei_vel(&mut self, motor: Motor) -> Result<i16> {
        let raw = self.read_status(registers::motor(motor).qei_velocity)?;
        Ok(signed_word(raw as u16))
    }

    /// Zero a motor's encoder counter on the board
    pub fn reset_qei(&mut self, motor: Motor) -> Result<()> {
        self.commit(Commit::ResetQei(motor))
    }

    pub fn reset_all_qei(&mut self) -> Result<()> {
        self.commit(Commit::ResetQeiBoth)
    }

    // === Supply ===

    pub fn get_motor_current(&mut self, motor: Motor) -> Result<u16> {
        Ok(self.read_status(registers::motor(motor).current)? as u16)
    }

    /// Raw motor supply reading in millivolts
    pub fn get_motor_voltage(&mut self) -> Result<u16> {
        Ok(self.read_status(SUPPLY_VOLTAGE)? as u16)
    }

    pub fn get_motor_volts(&mut self) -> Result<f64> {
        Ok(self.get_motor_voltage()? as f64 / 1000.0)
    }
}
