// Raw I2C transport
//
// The Linux i2c-dev interface: open the adapter node, bind it to a slave
// address with the I2C_SLAVE ioctl, then plain read(2)/write(2) each perform
// one bus transaction.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;

use tracing::debug;

use super::error::{CapeError, Result};

nix::ioctl_write_int_bad!(i2c_set_slave, 0x0703);

/// A byte pipe to a single bus slave
///
/// Implementations report the number of bytes actually moved so callers can
/// detect short transfers.
pub trait Transport {
    /// Identifies the underlying bus; sessions are exclusive per (bus, slot)
    fn bus_id(&self) -> &str;

    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn bus_id(&self) -> &str {
        (**self).bus_id()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }
}

/// Linux `/dev/i2c-N` adapter bound to one slave address
pub struct I2cDevice {
    file: File,
    path: String,
}

impl I2cDevice {
    pub fn open(path: &str, address: u16) -> Result<Self> {
        let connection_failure = |source: io::Error| CapeError::ConnectionFailure {
            device: path.to_string(),
            address,
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(connection_failure)?;

        // SAFETY: the descriptor is owned by `file` and stays open for the call;
        // I2C_SLAVE takes the address by value.
        unsafe { i2c_set_slave(file.as_raw_fd(), address as i32) }
            .map_err(|errno| connection_failure(io::Error::from(errno)))?;

        debug!("Bound {} to address 0x{:02x}", path, address);
        Ok(Self {
            file,
            path: path.to_string(),
        })
    }
}

impl Transport for I2cDevice {
    fn bus_id(&self) -> &str {
        &self.path
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file.write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cape::ErrorKind;

    #[test]
    fn test_open_missing_adapter_is_connection_failure() {
        let err = I2cDevice::open("/nonexistent/i2c-99", 0x2c)
            .err()
            .expect("open should fail");
        assert_eq!(err.kind(), ErrorKind::ConnectionFailure);
        assert!(err.to_string().contains("0x2c"));
    }
}
