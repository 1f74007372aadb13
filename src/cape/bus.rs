// Byte transport and little-endian marshaling on top of a `Transport`

use tracing::debug;

use super::error::{CapeError, Result};
use super::transport::Transport;

/// Register-addressed access to the cape
pub struct Bus<T> {
    transport: T,
}

impl<T: Transport> Bus<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Address-then-value write of one register
    pub fn write_byte(&mut self, addr: u8, value: u8) -> Result<()> {
        let written = self.transport.write(&[addr, value])?;
        if written != 2 {
            return Err(CapeError::ShortTransfer {
                op: "write",
                addr,
                expected: 2,
                actual: written,
            });
        }
        Ok(())
    }

    /// Address write followed by a one-byte read
    pub fn read_byte(&mut self, addr: u8) -> Result<u8> {
        let written = self.transport.write(&[addr])?;
        if written != 1 {
            return Err(CapeError::ShortTransfer {
                op: "address write",
                addr,
                expected: 1,
                actual: written,
            });
        }

        let mut buf = [0u8; 1];
        let read = self.transport.read(&mut buf)?;
        if read != 1 {
            return Err(CapeError::ShortTransfer {
                op: "read",
                addr,
                expected: 1,
                actual: read,
            });
        }
        Ok(buf[0])
    }

    pub fn read_word(&mut self, addr: u8) -> Result<u16> {
        let lo = self.read_byte(addr)?;
        let hi = self.read_byte(addr.wrapping_add(1))?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    pub fn read_dword(&mut self, addr: u8) -> Result<u32> {
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read_byte(addr.wrapping_add(i as u8))?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    /// Signed view of a word, e.g. velocities and PID gains
    pub fn read_i16(&mut self, addr: u8) -> Result<i16> {
        self.read_word(addr).map(signed_word)
    }

    pub fn write_word(&mut self, addr: u8, value: u16) -> Result<()> {
        self.write_run(addr, &value.to_le_bytes())
    }

    pub fn write_dword(&mut self, addr: u8, value: u32) -> Result<()> {
        self.write_run(addr, &value.to_le_bytes())
    }

    /// Read `count` consecutive registers starting at `addr`
    pub fn read_bytes(&mut self, count: usize, addr: u8) -> Result<Vec<u8>> {
        if count == 0 || addr as usize + count > 0x100 {
            return Err(CapeError::InvalidArgument {
                what: "byte count",
                value: count as i64,
                expected: "at least 1 and within the 256-byte register file",
            });
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(count)
            .map_err(|_| CapeError::AllocationFailure { bytes: count })?;

        for i in 0..count {
            buf.push(self.read_byte(addr + i as u8)?);
        }
        debug!("Read {} bytes at 0x{:02X}", count, addr);
        Ok(buf)
    }

    fn write_run(&mut self, addr: u8, bytes: &[u8]) -> Result<()> {
        for (i, &byte) in bytes.iter().enumerate() {
            self.write_byte(addr.wrapping_add(i as u8), byte)?;
        }
        Ok(())
    }
}

/// Two's-complement reinterpretation: raw values above 32767 map to `raw - 65536`
pub fn signed_word(raw: u16) -> i16 {
    raw as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cape::ErrorKind;
    use crate::cape::sim::SimulatedCape;

    fn bus_with(bytes: &[(u8, u8)]) -> Bus<SimulatedCape> {
        let sim = SimulatedCape::new();
        for &(addr, value) in bytes {
            sim.set_register(addr, value);
        }
        Bus::new(sim)
    }

    #[test]
    fn test_word_is_little_endian() {
        let mut bus = bus_with(&[(0x40, 0x34), (0x41, 0x12)]);
        assert_eq!(bus.read_word(0x40).unwrap(), 0x1234);
    }

    #[test]
    fn test_dword_is_little_endian() {
        let mut bus = bus_with(&[(0x10, 0x78), (0x11, 0x56), (0x12, 0x34), (0x13, 0x12)]);
        assert_eq!(bus.read_dword(0x10).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_signed_word_reinterpretation() {
        assert_eq!(signed_word(0x0000), 0);
        assert_eq!(signed_word(0x7FFF), 32767);
        assert_eq!(signed_word(0x8000), -32768);
        assert_eq!(signed_word(0xFFFF), -1);
        assert_eq!(signed_word(0xB500) as i32, 0xB500 - 65536);

        let mut bus = bus_with(&[(0x18, 0x9C), (0x19, 0xFF)]);
        assert_eq!(bus.read_i16(0x18).unwrap(), -100);
    }

    #[test]
    fn test_word_writes_round_trip() {
        let mut bus = bus_with(&[]);
        bus.write_word(0x30, (-5248i16) as u16).unwrap();
        bus.write_dword(0x20, 0xDEAD_BEEF).unwrap();
        assert_eq!(bus.read_i16(0x30).unwrap(), -5248);
        assert_eq!(bus.read_dword(0x20).unwrap(), 0xDEAD_BEEF);
        assert_eq!(bus.transport().register(0x20), 0xEF);
    }

    #[test]
    fn test_read_bytes() {
        let mut bus = bus_with(&[(0xE0, b'D'), (0xE1, b'M')]);
        assert_eq!(bus.read_bytes(2, 0xE0).unwrap(), b"DM");

        let err = bus.read_bytes(0, 0xE0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = bus.read_bytes(17, 0xF0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(bus.read_bytes(16, 0xF0).unwrap().len(), 16);
    }

    #[test]
    fn test_short_write_is_io_failure() {
        let sim = SimulatedCape::new();
        sim.fail_after(0);
        let mut bus = Bus::new(sim);
        let err = bus.write_byte(0x02, 0x10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert!(matches!(err, CapeError::ShortTransfer { op: "write", .. }));
    }

    #[test]
    fn test_short_read_is_io_failure() {
        let sim = SimulatedCape::new();
        // The address write succeeds, the data read comes back empty
        sim.fail_after(1);
        let mut bus = Bus::new(sim);
        let err = bus.read_byte(0x10).unwrap_err();
        assert!(matches!(err, CapeError::ShortTransfer { op: "read", actual: 0, .. }));
    }
}
