// Blocking move-until supervision
//
// Commit a target, then poll the board's target and encoder readback until
// every supervised motor is within its threshold or the wall-clock ceiling
// passes. A timeout leaves the motors running at the committed target; a
// cancellation powers them down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::error::Result;
use super::session::Session;
use super::transport::Transport;
use super::types::Motor;
use crate::config::ConvergenceConfig;

/// Longest uninterrupted sleep while waiting on a cancellable delay
const CANCEL_SLICE: Duration = Duration::from_millis(20);

/// Cooperative stop signal shared between a supervisor and its controller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first; returns false on cancellation
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            sleep((deadline - now).min(CANCEL_SLICE));
        }
    }
}

/// How a supervised move ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Converged,
    /// The ceiling passed; motors are still driving toward the target
    TimedOut,
    /// Aborted through the cancel token; motors were powered down
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceReport {
    pub outcome: Outcome,
    /// Time since the target was committed
    pub elapsed: Duration,
    /// Last observed |target - measured| per motor, `None` if not supervised or never sampled
    pub errors: [Option<u32>; 2],
}

impl ConvergenceReport {
    pub fn converged(&self) -> bool {
        self.outcome == Outcome::Converged
    }

    pub fn error(&self, motor: Motor) -> Option<u32> {
        self.errors[motor.index()]
    }
}

/// Result of an open-loop timed move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedMove {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quantity {
    Position,
    Velocity,
}

/// Distance between a position target and the encoder count
///
/// Both are reinterpreted as signed 32-bit so a counter that wrapped below
/// zero is still close to a small target.
pub fn position_error(target: u32, measured: u32) -> u32 {
    (target as i32).wrapping_sub(measured as i32).unsigned_abs()
}

pub fn velocity_error(target: i16, measured: i16) -> u32 {
    (target as i32 - measured as i32).unsigned_abs()
}

/// Runs move-until operations with fixed thresholds and timing
pub struct Convergence {
    config: ConvergenceConfig,
    cancel: CancelToken,
}

impl Convergence {
    pub fn new(config: ConvergenceConfig) -> Self {
        Self::with_cancel(config, CancelToken::new())
    }

    pub fn with_cancel(config: ConvergenceConfig, cancel: CancelToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Hold `motor` at `position` until the encoder is within the position threshold
    pub fn move_until_pos<T: Transport>(
        &self,
        session: &mut Session<T>,
        motor: Motor,
        position: u32,
    ) -> Result<ConvergenceReport> {
        session.set_target_pos(motor, position)?;
        self.supervise(session, &[motor], Quantity::Position, Instant::now())
    }

    /// Hold `motor` at `velocity` until the measured velocity is within threshold
    ///
    /// Polling starts only after the settling delay; the delay counts toward
    /// the timeout.
    pub fn move_until_vel<T: Transport>(
        &self,
        session: &mut Session<T>,
        motor: Motor,
        velocity: i16,
    ) -> Result<ConvergenceReport> {
        session.set_target_vel(motor, velocity)?;
        let start = Instant::now();
        if !self.cancel.sleep(self.config.velocity_settle()) {
            return self.abort(session, &[motor], start, [None; 2]);
        }
        self.supervise(session, &[motor], Quantity::Velocity, start)
    }

    /// Move both motors to `position`; converged only when both are in threshold
    pub fn move_all_until_pos<T: Transport>(
        &self,
        session: &mut Session<T>,
        position: u32,
    ) -> Result<ConvergenceReport> {
        session.set_all_target_pos(position)?;
        self.supervise(session, &Motor::ALL, Quantity::Position, Instant::now())
    }

    /// Run both motors at `velocity`; converged only when both are in threshold
    pub fn move_all_until_vel<T: Transport>(
        &self,
        session: &mut Session<T>,
        velocity: i16,
    ) -> Result<ConvergenceReport> {
        session.set_all_target_vel(velocity)?;
        let start = Instant::now();
        if !self.cancel.sleep(self.config.velocity_settle()) {
            return self.abort(session, &Motor::ALL, start, [None; 2]);
        }
        self.supervise(session, &Motor::ALL, Quantity::Velocity, start)
    }

    /// Drive `motor` at `power` for `duration`, then stop it. No feedback is used.
    pub fn move_until_time<T: Transport>(
        &self,
        session: &mut Session<T>,
        motor: Motor,
        power: i32,
        duration: Duration,
    ) -> Result<TimedMove> {
        session.set_motor_power(motor, power)?;
        let finished = self.cancel.sleep(duration);
        session.stop_motor(motor)?;
        Ok(if finished {
            TimedMove::Completed
        } else {
            TimedMove::Cancelled
        })
    }

    pub fn move_all_until_time<T: Transport>(
        &self,
        session: &mut Session<T>,
        power: i32,
        duration: Duration,
    ) -> Result<TimedMove> {
        session.set_all_motor_power(power)?;
        let finished = self.cancel.sleep(duration);
        session.stop_all()?;
        Ok(if finished {
            TimedMove::Completed
        } else {
            TimedMove::Cancelled
        })
    }

    fn threshold(&self, quantity: Quantity, motor: Motor) -> u32 {
        match quantity {
            Quantity::Position => self.config.position_threshold[motor.index()],
            Quantity::Velocity => self.config.velocity_threshold[motor.index()],
        }
    }

    fn sample<T: Transport>(
        session: &mut Session<T>,
        quantity: Quantity,
        motor: Motor,
    ) -> Result<u32> {
        Ok(match quantity {
            Quantity::Position => {
                let target = session.get_target_pos(motor)?;
                position_error(target, session.get_qei(motor)?)
            }
            Quantity::Velocity => {
                let target = session.get_target_vel(motor)?;
                velocity_error(target, session.get_qei_vel(motor)?)
            }
        })
    }

    fn supervise<T: Transport>(
        &self,
        session: &mut Session<T>,
        motors: &[Motor],
        quantity: Quantity,
        start: Instant,
    ) -> Result<ConvergenceReport> {
        let timeout = self.config.timeout();
        let poll = self.config.poll_interval();
        let mut errors = [None; 2];

        loop {
            if self.cancel.is_cancelled() {
                return self.abort(session, motors, start, errors);
            }

            let mut converged = true;
            for &motor in motors {
                let error = Self::sample(session, quantity, motor)?;
                errors[motor.index()] = Some(error);
                converged &= error <= self.threshold(quantity, motor);
            }

            let elapsed = start.elapsed();
            if converged {
                info!(
                    "{:?} converged in {:?} (errors {:?})",
                    quantity, elapsed, errors
                );
                return Ok(ConvergenceReport {
                    outcome: Outcome::Converged,
                    elapsed,
                    errors,
                });
            }
            if elapsed >= timeout {
                warn!(
                    "{:?} did not converge within {:?} (errors {:?}), leaving target active",
                    quantity, timeout, errors
                );
                return Ok(ConvergenceReport {
                    outcome: Outcome::TimedOut,
                    elapsed,
                    errors,
                });
            }

            if !poll.is_zero() {
                // Never sleep past the ceiling
                self.cancel.sleep(poll.min(timeout - elapsed));
            }
        }
    }

    fn abort<T: Transport>(
        &self,
        session: &mut Session<T>,
        motors: &[Motor],
        start: Instant,
        errors: [Option<u32>; 2],
    ) -> Result<ConvergenceReport> {
        warn!("Move cancelled, powering down motors {:?}", motors);
        for &motor in motors {
            session.stop_motor(motor)?;
        }
        debug!("Motors stopped after {:?}", start.elapsed());
        Ok(ConvergenceReport {
            outcome: Outcome::Cancelled,
            elapsed: start.elapsed(),
            errors,
        })
    }
}
