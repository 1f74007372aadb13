// Readings and results printed by the command-line front-end
//
// Each type prints as the classic one-line text form via Display, or as a
// JSON object per line when `--json` is given.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cape::{ConvergenceReport, Outcome, TimedMove};

/// Encoder counts and velocities for both motors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderReading {
    pub position: [u32; 2],
    pub velocity: [i16; 2],
}

impl fmt::Display for EncoderReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QEI Motor 1 = {} (0x{:x}) [v = {}], Motor 2 = {} (0x{:x}) [v = {}]",
            self.position[0],
            self.position[0],
            self.velocity[0],
            self.position[1],
            self.position[1],
            self.velocity[1]
        )
    }
}

/// Motor currents and supply voltage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyReading {
    pub current: [u16; 2],
    pub voltage_raw: u16,
    pub volts: f64,
}

impl fmt::Display for SupplyReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Current Motor 1 = {} (0x{:x}), Motor 2 = {} (0x{:x}), Voltage = {} (0x{:x})",
            self.current[0],
            self.current[0],
            self.current[1],
            self.current[1],
            self.voltage_raw,
            self.voltage_raw
        )
    }
}

/// Tracking error of one motor against a fixed target (PID tuning output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingReading {
    pub motor: u8,
    pub error: i64,
    pub current: u16,
}

impl fmt::Display for TrackingReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error = {}, Current = {}", self.error, self.current)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOutcome {
    Converged,
    TimedOut,
    Cancelled,
    Completed,
}

/// Result of a move command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveSummary {
    pub outcome: MoveOutcome,
    pub elapsed_ms: u64,
    pub errors: [Option<u32>; 2],
}

impl From<&ConvergenceReport> for MoveSummary {
    fn from(report: &ConvergenceReport) -> Self {
        Self {
            outcome: match report.outcome {
                Outcome::Converged => MoveOutcome::Converged,
                Outcome::TimedOut => MoveOutcome::TimedOut,
                Outcome::Cancelled => MoveOutcome::Cancelled,
            },
            elapsed_ms: report.elapsed.as_millis() as u64,
            errors: report.errors,
        }
    }
}

impl From<TimedMove> for MoveSummary {
    fn from(result: TimedMove) -> Self {
        Self {
            outcome: match result {
                TimedMove::Completed => MoveOutcome::Completed,
                TimedMove::Cancelled => MoveOutcome::Cancelled,
            },
            elapsed_ms: 0,
            errors: [None; 2],
        }
    }
}

impl fmt::Display for MoveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self.outcome {
            MoveOutcome::Converged => "converged",
            MoveOutcome::TimedOut => "timed out",
            MoveOutcome::Cancelled => "cancelled",
            MoveOutcome::Completed => "completed",
        };
        write!(f, "Move {}", outcome)?;
        if self.elapsed_ms > 0 {
            write!(f, " after {} ms", self.elapsed_ms)?;
        }
        for (i, error) in self.errors.iter().enumerate() {
            if let Some(error) = error {
                write!(f, ", motor {} error = {}", i + 1, error)?;
            }
        }
        Ok(())
    }
}
