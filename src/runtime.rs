// Command execution for the `dmcc` binary
//
// Cape I/O is blocking, so each command runs on tokio's blocking pool while
// the async side waits for Ctrl-C. An interrupt trips the shared cancel token:
// convergence loops abort and power down, monitors stop both motors and close
// the session before exiting.

use std::error::Error;
use std::fmt::Display;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::cape::sim::{DEFAULT_VERSION, FixedVersion, SimulatedCape};
use crate::cape::{
    BoardAddress, CancelToken, CapeError, Convergence, EepromVersion, I2cDevice, Motor,
    PidConstants, PidMode, Session, SessionOptions, Transport, VersionSource,
};
use crate::cli::{Cli, Command};
use crate::config::{ConvergenceConfig, MONITOR_INTERVAL};
use crate::messages::{EncoderReading, MoveSummary, SupplyReading, TrackingReading};

pub type BoxError = Box<dyn Error + Send + Sync>;

type DynSession = Session<Box<dyn Transport + Send>>;

pub async fn run(cli: Cli) -> Result<(), BoxError> {
    let cancel = CancelToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping motors");
            interrupt.cancel();
        }
    });

    tokio::task::spawn_blocking(move || execute(&cli, &cancel)).await?
}

/// Run one command to completion (or until `cancel` trips)
pub fn execute(cli: &Cli, cancel: &CancelToken) -> Result<(), BoxError> {
    let config = match &cli.config {
        Some(path) => ConvergenceConfig::from_json_file(path)?,
        None => ConvergenceConfig::default(),
    };
    let convergence = Convergence::with_cancel(config, cancel.clone());

    match cli.command {
        Command::SetMotor {
            board,
            motor,
            power,
        } => {
            let board = BoardAddress::try_from(board)?;
            let motor = Motor::try_from(motor)?;
            let mut session = open_session(cli, board)?;
            session.set_motor_power(motor, power)?;
            println!("Motor {} power set to {}", motor.number(), power);
            session.close();
        }

        Command::GetQei { board, json } => {
            let mut session = open_session(cli, BoardAddress::try_from(board)?)?;
            monitor(&mut session, cancel, json, |session| {
                Ok(EncoderReading {
                    position: [session.get_qei(Motor::One)?, session.get_qei(Motor::Two)?],
                    velocity: [
                        session.get_qei_vel(Motor::One)?,
                        session.get_qei_vel(Motor::Two)?,
                    ],
                })
            })?;
            session.close();
        }

        Command::GetCurrent { board, json } => {
            let mut session = open_session(cli, BoardAddress::try_from(board)?)?;
            monitor(&mut session, cancel, json, |session| {
                let voltage_raw = session.get_motor_voltage()?;
                Ok(SupplyReading {
                    current: [
                        session.get_motor_current(Motor::One)?,
                        session.get_motor_current(Motor::Two)?,
                    ],
                    voltage_raw,
                    volts: voltage_raw as f64 / 1000.0,
                })
            })?;
            session.close();
        }

        Command::SetPid {
            board,
            target,
            pos_vel,
            p,
            i,
            d,
            motor,
            json,
        } => {
            let board = BoardAddress::try_from(board)?;
            let motor = Motor::try_from(motor)?;
            let mode = PidMode::try_from(pos_vel)?;
            let pid = PidConstants::checked(p, i, d)?;
            let target = Target::new(mode, target)?;

            let mut session = open_session(cli, board)?;
            session.reset_qei(motor)?;
            session.set_pid_constants(motor, mode, pid)?;

            let report = match target {
                Target::Position(pos) => convergence.move_until_pos(&mut session, motor, pos)?,
                Target::Velocity(vel) => convergence.move_until_vel(&mut session, motor, vel)?,
            };
            emit(&MoveSummary::from(&report), json)?;

            monitor(&mut session, cancel, json, |session| {
                let error = match target {
                    Target::Position(pos) => pos as i32 as i64 - session.get_qei(motor)? as i32 as i64,
                    Target::Velocity(vel) => vel as i64 - session.get_qei_vel(motor)? as i64,
                };
                Ok(TrackingReading {
                    motor: motor.number(),
                    error,
                    current: session.get_motor_current(motor)?,
                })
            })?;
            session.close();
        }

        Command::MovePos {
            board,
            position,
            motor,
        } => {
            let board = BoardAddress::try_from(board)?;
            let motor = motor.map(Motor::try_from).transpose()?;
            let mut session = open_session(cli, board)?;
            let report = match motor {
                Some(motor) => convergence.move_until_pos(&mut session, motor, position)?,
                None => convergence.move_all_until_pos(&mut session, position)?,
            };
            println!("{}", MoveSummary::from(&report));
            session.close();
        }

        Command::MoveVel {
            board,
            velocity,
            motor,
        } => {
            let board = BoardAddress::try_from(board)?;
            let motor = motor.map(Motor::try_from).transpose()?;
            let mut session = open_session(cli, board)?;
            let report = match motor {
                Some(motor) => convergence.move_until_vel(&mut session, motor, velocity)?,
                None => convergence.move_all_until_vel(&mut session, velocity)?,
            };
            println!("{}", MoveSummary::from(&report));
            session.close();
        }

        Command::MoveTime {
            board,
            power,
            micros,
            motor,
        } => {
            let board = BoardAddress::try_from(board)?;
            let motor = motor.map(Motor::try_from).transpose()?;
            let duration = Duration::from_micros(micros);
            let mut session = open_session(cli, board)?;
            let result = match motor {
                Some(motor) => convergence.move_until_time(&mut session, motor, power, duration)?,
                None => convergence.move_all_until_time(&mut session, power, duration)?,
            };
            println!("{}", MoveSummary::from(result));
            session.close();
        }

        Command::Version { board } => {
            let board = BoardAddress::try_from(board)?;
            let version = if cli.simulate {
                FixedVersion(DEFAULT_VERSION).board_version(board)?
            } else {
                EepromVersion::new(&cli.eeprom_root).board_version(board)?
            };
            println!("Board {} version {:02}", board.slot(), version);
        }
    }
    Ok(())
}

/// Closed-loop target parsed from the command line
#[derive(Debug, Clone, Copy)]
enum Target {
    Position(u32),
    Velocity(i16),
}

impl Target {
    fn new(mode: PidMode, value: i64) -> Result<Self, CapeError> {
        match mode {
            // Negative positions wrap onto the 32-bit counter like any other value
            PidMode::Position if (i32::MIN as i64..=u32::MAX as i64).contains(&value) => {
                Ok(Target::Position(value as u32))
            }
            PidMode::Position => Err(CapeError::OutOfRange {
                what: "Target position",
                value,
                min: i32::MIN as i64,
                max: u32::MAX as i64,
            }),
            PidMode::Velocity => i16::try_from(value)
                .map(Target::Velocity)
                .map_err(|_| CapeError::OutOfRange {
                    what: "Target velocity",
                    value,
                    min: i16::MIN as i64,
                    max: i16::MAX as i64,
                }),
        }
    }
}

fn open_session(cli: &Cli, board: BoardAddress) -> Result<DynSession, CapeError> {
    let options = SessionOptions {
        device: cli.device.clone(),
        eeprom_root: cli.eeprom_root.clone(),
        ..SessionOptions::default()
    };

    if cli.simulate {
        info!("Using simulated cape for board {}", board.slot());
        let transport: Box<dyn Transport + Send> = Box::new(SimulatedCape::new());
        return Session::connect(
            board,
            transport,
            &FixedVersion(DEFAULT_VERSION),
            &options.compatible_versions,
        );
    }

    let transport: Box<dyn Transport + Send> =
        Box::new(I2cDevice::open(&options.device, board.i2c_address())?);
    let versions = EepromVersion::new(&options.eeprom_root);
    Session::connect(board, transport, &versions, &options.compatible_versions)
}

fn emit<R: Serialize + Display>(reading: &R, json: bool) -> Result<(), BoxError> {
    if json {
        println!("{}", serde_json::to_string(reading)?);
    } else {
        println!("{}", reading);
    }
    Ok(())
}

/// Sample and print until cancelled, then stop both motors and close
fn monitor<R, F>(
    session: &mut DynSession,
    cancel: &CancelToken,
    json: bool,
    mut sample: F,
) -> Result<(), BoxError>
where
    R: Serialize + Display,
    F: FnMut(&mut DynSession) -> Result<R, CapeError>,
{
    while !cancel.is_cancelled() {
        emit(&sample(session)?, json)?;
        cancel.sleep(MONITOR_INTERVAL);
    }

    if let Err(e) = session.stop_all() {
        warn!("Failed to stop motors on exit: {}", e);
    }
    info!("Monitoring stopped on board {}", session.board().slot());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["dmcc", "--simulate"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_set_motor_on_simulator() {
        execute(&cli(&["set-motor", "0", "2", "-10000"]), &CancelToken::new()).unwrap();
    }

    #[test]
    fn test_invalid_selectors_fail_before_io() {
        let err = execute(&cli(&["set-motor", "4", "1", "0"]), &CancelToken::new()).unwrap_err();
        let err = err.downcast::<CapeError>().unwrap();
        assert_eq!(err.kind(), crate::cape::ErrorKind::InvalidArgument);

        let err = execute(&cli(&["set-motor", "0", "3", "0"]), &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("motor number 3"));
    }

    #[test]
    fn test_out_of_range_power_is_reported() {
        let err = execute(&cli(&["set-motor", "1", "1", "10001"]), &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("10001"));
    }

    #[test]
    fn test_move_commands_on_simulator() {
        let token = CancelToken::new();
        execute(&cli(&["move-pos", "2", "1000", "-m", "1"]), &token).unwrap();
        execute(&cli(&["move-pos", "2", "1000"]), &token).unwrap();
        execute(&cli(&["move-time", "2", "500", "1000"]), &token).unwrap();
        execute(&cli(&["version", "3"]), &token).unwrap();
    }

    #[test]
    fn test_monitors_exit_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        execute(&cli(&["get-qei", "0", "--json"]), &token).unwrap();
        execute(&cli(&["get-current", "0"]), &token).unwrap();
        execute(
            &cli(&["set-pid", "0", "5000", "0", "-5248", "-75", "-500", "1"]),
            &token,
        )
        .unwrap();
    }

    #[test]
    fn test_set_pid_validates_gains() {
        let err = execute(
            &cli(&["set-pid", "0", "10", "1", "40000", "0", "0", "1"]),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("40000"));
    }

    #[test]
    fn test_target_conversion() {
        assert!(matches!(
            Target::new(PidMode::Position, -1).unwrap(),
            Target::Position(u32::MAX)
        ));
        assert!(Target::new(PidMode::Velocity, 40_000).is_err());
        assert!(matches!(
            Target::new(PidMode::Velocity, -300).unwrap(),
            Target::Velocity(-300)
        ));
    }
}
