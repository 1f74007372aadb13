// Command-line surface of the `dmcc` binary
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{BUS_DEVICE, EEPROM_ROOT};

/// Control DC motors through a DMCC cape
#[derive(Debug, Parser)]
#[command(name = "dmcc", version, about)]
pub struct Cli {
    /// I2C adapter the cape is attached to
    #[arg(long, global = true, default_value = BUS_DEVICE)]
    pub device: String,

    /// Directory holding the cape identity EEPROMs
    #[arg(long, global = true, default_value = EEPROM_ROOT)]
    pub eeprom_root: PathBuf,

    /// Talk to an in-memory simulated cape instead of hardware
    #[arg(long, global = true)]
    pub simulate: bool,

    /// JSON file with convergence thresholds and timing
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set the open-loop power of one motor (-10000 to 10000)
    #[command(allow_negative_numbers = true)]
    SetMotor { board: i64, motor: i64, power: i32 },

    /// Print encoder counts and velocities every 200 ms
    GetQei {
        board: i64,
        #[arg(long)]
        json: bool,
    },

    /// Print motor currents and supply voltage every 200 ms
    GetCurrent {
        board: i64,
        #[arg(long)]
        json: bool,
    },

    /// Tune PID gains: reset the encoder, apply gains, move to the target and
    /// print the tracking error every 200 ms
    #[command(allow_negative_numbers = true)]
    SetPid {
        board: i64,
        /// Target position (pos_vel = 0) or velocity (pos_vel = 1)
        target: i64,
        /// 0 for position, 1 for velocity
        pos_vel: i64,
        p: i64,
        i: i64,
        d: i64,
        motor: i64,
        #[arg(long)]
        json: bool,
    },

    /// Hold a position until converged or timed out
    MovePos {
        board: i64,
        position: u32,
        /// Motor 1 or 2; both motors when omitted
        #[arg(short, long)]
        motor: Option<i64>,
    },

    /// Hold a velocity until converged or timed out
    #[command(allow_negative_numbers = true)]
    MoveVel {
        board: i64,
        velocity: i16,
        #[arg(short, long)]
        motor: Option<i64>,
    },

    /// Drive at a fixed power for a number of microseconds, then stop
    #[command(allow_negative_numbers = true)]
    MoveTime {
        board: i64,
        power: i32,
        micros: u64,
        #[arg(short, long)]
        motor: Option<i64>,
    },

    /// Print the board version stored in the cape EEPROM
    Version { board: i64 },
}
