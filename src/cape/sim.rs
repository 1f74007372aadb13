// In-memory cape for tests and `--simulate` runs
//
// Models the slave side of the i2c-dev protocol (one-byte writes set the
// register pointer, two-byte writes store a register) and a crude firmware:
// commits select a per-motor mode and every refresh advances the encoder
// plant by one step.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::eeprom::VersionSource;
use super::error::Result;
use super::registers::{self, COMMAND, Commit, IDENTITY, IDENTITY_LEN, SUPPLY_VOLTAGE};
use super::transport::Transport;
use super::types::{BoardAddress, Motor};

/// Identity string of a current-firmware cape
pub const DEFAULT_IDENTITY: &str = "DMCC Mk.06";

/// EEPROM version matching `DEFAULT_IDENTITY`
pub const DEFAULT_VERSION: u8 = 6;

/// Largest position change per refresh in position-hold mode
pub const DEFAULT_STEP: u32 = 250;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

type RefreshHook = Box<dyn FnMut(&mut Registers) + Send>;

/// The 256-byte register file
pub struct Registers([u8; 256]);

impl Registers {
    pub fn byte(&self, addr: u8) -> u8 {
        self.0[addr as usize]
    }

    pub fn set_byte(&mut self, addr: u8, value: u8) {
        self.0[addr as usize] = value;
    }

    pub fn word(&self, addr: u8) -> u16 {
        u16::from_le_bytes([self.byte(addr), self.byte(addr.wrapping_add(1))])
    }

    pub fn set_word(&mut self, addr: u8, value: u16) {
        for (i, b) in value.to_le_bytes().into_iter().enumerate() {
            self.set_byte(addr.wrapping_add(i as u8), b);
        }
    }

    pub fn dword(&self, addr: u8) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.byte(addr.wrapping_add(i as u8));
        }
        u32::from_le_bytes(bytes)
    }

    pub fn set_dword(&mut self, addr: u8, value: u32) {
        for (i, b) in value.to_le_bytes().into_iter().enumerate() {
            self.set_byte(addr.wrapping_add(i as u8), b);
        }
    }

    pub fn qei(&self, motor: Motor) -> u32 {
        self.dword(registers::motor(motor).qei_position.offset)
    }

    pub fn set_qei(&mut self, motor: Motor, position: u32) {
        self.set_dword(registers::motor(motor).qei_position.offset, position);
    }

    pub fn set_qei_velocity(&mut self, motor: Motor, velocity: i16) {
        self.set_word(registers::motor(motor).qei_velocity.offset, velocity as u16);
    }

    pub fn target_position(&self, motor: Motor) -> u32 {
        self.dword(registers::motor(motor).target_position.offset)
    }

    pub fn target_velocity(&self, motor: Motor) -> i16 {
        self.word(registers::motor(motor).target_velocity.offset) as i16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Power,
    Position,
    Velocity,
}

struct SimState {
    regs: Registers,
    pointer: u8,
    modes: [Mode; 2],
    step: u32,
    frozen: bool,
    fail_after: Option<usize>,
    transfers: usize,
    commits: Vec<u8>,
    hook: Option<RefreshHook>,
}

impl SimState {
    /// Count a transfer; false once the injected fault has tripped
    fn transfer_ok(&mut self) -> bool {
        let ok = self.fail_after.is_none_or(|limit| self.transfers < limit);
        if ok {
            self.transfers += 1;
        }
        ok
    }

    fn commit(&mut self, code: u8) {
        self.commits.push(code);
        let Some(commit) = Commit::decode(code) else {
            return;
        };
        match commit {
            Commit::Refresh => self.refresh(),
            Commit::Power(m) => self.modes[m.index()] = Mode::Power,
            Commit::PowerBoth => self.modes = [Mode::Power; 2],
            Commit::HoldPosition(m) => self.modes[m.index()] = Mode::Position,
            Commit::HoldPositionBoth => self.modes = [Mode::Position; 2],
            Commit::HoldVelocity(m) => self.modes[m.index()] = Mode::Velocity,
            Commit::HoldVelocityBoth => self.modes = [Mode::Velocity; 2],
            Commit::ResetQei(m) => self.regs.set_qei(m, 0),
            Commit::ResetQeiBoth => {
                for m in Motor::ALL {
                    self.regs.set_qei(m, 0);
                }
            }
        }
    }

    fn refresh(&mut self) {
        if !self.frozen {
            for motor in Motor::ALL {
                self.advance(motor);
            }
        }
        if let Some(hook) = self.hook.as_mut() {
            hook(&mut self.regs);
        }
    }

    fn advance(&mut self, motor: Motor) {
        let fields = registers::motor(motor);
        let position = self.regs.qei(motor);
        let velocity: i32 = match self.modes[motor.index()] {
            Mode::Idle => return,
            Mode::Power => (self.regs.word(fields.power.offset) as i16 / 100) as i32,
            Mode::Velocity => self.regs.target_velocity(motor) as i32,
            Mode::Position => {
                let step = self.step.min(i32::MAX as u32) as i32;
                let distance = (self.regs.target_position(motor) as i32).wrapping_sub(position as i32);
                distance.clamp(-step, step)
            }
        };

        self.regs.set_qei(motor, position.wrapping_add(velocity as u32));
        self.regs
            .set_qei_velocity(motor, velocity.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
        let current = velocity.unsigned_abs().saturating_mul(4).min(u16::MAX as u32);
        self.regs.set_word(fields.current.offset, current as u16);
    }
}

/// Shared handle to a simulated cape; clones observe the same registers
#[derive(Clone)]
pub struct SimulatedCape {
    id: String,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCape {
    pub fn new() -> Self {
        let mut regs = Registers([0u8; 256]);
        regs.set_word(SUPPLY_VOLTAGE.offset, 12_000);

        let sim = Self {
            id: format!("sim-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            state: Arc::new(Mutex::new(SimState {
                regs,
                pointer: 0,
                modes: [Mode::Idle; 2],
                step: DEFAULT_STEP,
                frozen: false,
                fail_after: None,
                transfers: 0,
                commits: Vec::new(),
                hook: None,
            })),
        };
        sim.set_identity(DEFAULT_IDENTITY);
        sim
    }

    /// Replace the identity string (truncated or zero-padded to 16 bytes)
    pub fn with_identity(self, identity: &str) -> Self {
        self.set_identity(identity);
        self
    }

    fn set_identity(&self, identity: &str) {
        let mut state = self.state.lock();
        let bytes = identity.as_bytes();
        for i in 0..IDENTITY_LEN {
            let b = bytes.get(i).copied().unwrap_or(0);
            state.regs.set_byte(IDENTITY + i as u8, b);
        }
    }

    pub fn register(&self, addr: u8) -> u8 {
        self.state.lock().regs.byte(addr)
    }

    pub fn set_register(&self, addr: u8, value: u8) {
        self.state.lock().regs.set_byte(addr, value);
    }

    pub fn word(&self, addr: u8) -> u16 {
        self.state.lock().regs.word(addr)
    }

    pub fn dword(&self, addr: u8) -> u32 {
        self.state.lock().regs.dword(addr)
    }

    pub fn set_qei(&self, motor: Motor, position: u32) {
        self.state.lock().regs.set_qei(motor, position);
    }

    /// Stop the encoder plant; counters only change through hooks or resets
    pub fn freeze(&self, frozen: bool) {
        self.state.lock().frozen = frozen;
    }

    pub fn set_step(&self, step: u32) {
        self.state.lock().step = step;
    }

    /// Let `count` more transfers succeed, then short every transfer to zero bytes
    pub fn fail_after(&self, count: usize) {
        let mut state = self.state.lock();
        state.fail_after = Some(state.transfers + count);
    }

    /// Run `hook` on the register file after every refresh commit
    pub fn on_refresh(&self, hook: impl FnMut(&mut Registers) + Send + 'static) {
        self.state.lock().hook = Some(Box::new(hook));
    }

    pub fn transfer_count(&self) -> usize {
        self.state.lock().transfers
    }

    /// Every code written to the command register, oldest first
    pub fn commits(&self) -> Vec<u8> {
        self.state.lock().commits.clone()
    }
}

impl Default for SimulatedCape {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedCape {
    fn bus_id(&self) -> &str {
        &self.id
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if !state.transfer_ok() {
            return Ok(0);
        }
        match data {
            &[addr] => state.pointer = addr,
            &[addr, value] => {
                state.regs.set_byte(addr, value);
                if addr == COMMAND {
                    state.commit(value);
                }
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported {}-byte write", data.len()),
                ));
            }
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if !state.transfer_ok() {
            return Ok(0);
        }
        for b in buf.iter_mut() {
            *b = state.regs.byte(state.pointer);
            state.pointer = state.pointer.wrapping_add(1);
        }
        Ok(buf.len())
    }
}

/// Version source reporting a fixed EEPROM version for every slot
#[derive(Debug, Clone, Copy)]
pub struct FixedVersion(pub u8);

impl VersionSource for FixedVersion {
    fn board_version(&self, _board: BoardAddress) -> Result<u8> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_write_then_read() {
        let mut sim = SimulatedCape::new();
        sim.write(&[0x02, 0xAB]).unwrap();
        sim.write(&[0x02]).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(sim.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0xAB);
        assert_eq!(sim.transfer_count(), 3);
    }

    #[test]
    fn test_identity_is_padded() {
        let sim = SimulatedCape::new();
        assert_eq!(sim.register(IDENTITY), b'D');
        assert_eq!(sim.register(IDENTITY + 9), b'6');
        assert_eq!(sim.register(IDENTITY + 15), 0);
    }

    #[test]
    fn test_position_plant_steps_toward_target() {
        let mut sim = SimulatedCape::new();
        sim.set_step(100);
        sim.write(&[0x20, 0xF4]).unwrap();
        sim.write(&[0x21, 0x01]).unwrap(); // target 500
        sim.write(&[COMMAND, 0x11]).unwrap();

        sim.write(&[COMMAND, 0x00]).unwrap();
        assert_eq!(sim.dword(0x10), 100);
        for _ in 0..10 {
            sim.write(&[COMMAND, 0x00]).unwrap();
        }
        assert_eq!(sim.dword(0x10), 500);
        assert_eq!(sim.word(0x18), 0);
    }

    #[test]
    fn test_frozen_plant_runs_hook_only() {
        let mut sim = SimulatedCape::new();
        sim.freeze(true);
        sim.on_refresh(|regs| regs.set_qei(Motor::Two, 42));
        sim.write(&[COMMAND, 0x12]).unwrap();
        sim.write(&[COMMAND, 0x00]).unwrap();
        assert_eq!(sim.dword(0x10), 0);
        assert_eq!(sim.dword(0x14), 42);
        assert_eq!(sim.commits(), vec![0x12, 0x00]);
    }

    #[test]
    fn test_fault_injection() {
        let mut sim = SimulatedCape::new();
        sim.fail_after(1);
        assert_eq!(sim.write(&[0x02, 1]).unwrap(), 2);
        assert_eq!(sim.write(&[0x02, 1]).unwrap(), 0);
    }
}
