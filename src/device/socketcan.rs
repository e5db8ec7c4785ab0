//! SocketCAN transport: a raw CAN socket bound to a Linux network interface.
//!
//! Grounded in the teacher's `lib.rs` (`CANSocket`) and `socketcan.rs` (the
//! kernel wire struct and raw constants), generalized behind the
//! [`crate::device::CanDevice`] trait and the shared [`Frame`] type.

use std::mem::size_of;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::device::{validate_timeout, BusError, CanDevice, DeviceError};
use crate::frame::{Frame, EFF_MASK, SFF_MASK};
use crate::retry::ShouldRetry;
use crate::util;

const AF_CAN: libc::c_int = 29;
const PF_CAN: libc::c_int = 29;
const CAN_RAW: libc::c_int = 1;
const SOL_CAN_BASE: libc::c_int = 100;
const SOL_CAN_RAW: libc::c_int = SOL_CAN_BASE + CAN_RAW;
const CAN_RAW_FILTER: libc::c_int = 1;
const CAN_RAW_ERR_FILTER: libc::c_int = 2;

const EFF_FLAG: u32 = 0x8000_0000;
const RTR_FLAG: u32 = 0x4000_0000;
const ERR_FLAG: u32 = 0x2000_0000;
const ERR_MASK: u32 = 0x1fff_ffff;

/// Kernel `struct can_frame`, laid out identically for zero-copy
/// `read`/`write`.
#[derive(Debug, Copy, Clone)]
#[repr(C, align(8))]
struct RawFrame {
    id: u32,
    data_len: u8,
    pad: u8,
    res0: u8,
    res1: u8,
    data: [u8; 8],
}

impl Default for RawFrame {
    fn default() -> Self {
        Self {
            id: 0,
            data_len: 0,
            pad: 0,
            res0: 0,
            res1: 0,
            data: [0; 8],
        }
    }
}

#[repr(C, align(8))]
struct SockAddrCan {
    af_can: libc::c_short,
    if_index: libc::c_int,
}

/// Classifies a raw kernel error frame (`id & ERR_FLAG != 0`) into the
/// shared [`BusError`] taxonomy. Grounded on the teacher's `err.rs`
/// (`CANError::from_frame`), which decodes the same bit layout.
fn classify_error_frame(raw: &RawFrame) -> BusError {
    let bits = raw.id & ERR_MASK;
    let data = raw.data;

    if bits & 0x0000_0040 != 0 {
        return BusError::BusOff;
    }
    if bits & 0x0000_0004 != 0 {
        // Controller problem: distinguish the buffer-overflow flavour (RX
        // byte 1 bits 0x01/0x02) from a plain warning level.
        match data.get(1).copied().unwrap_or(0) {
            0x01 | 0x02 => return BusError::QueueOverrun,
            0x08 => return BusError::TxBusy,
            _ => return BusError::ErrorWarning,
        }
    }
    if bits & 0x0000_0008 != 0 {
        // Protocol violation: byte 2 carries the violation type.
        return match data.get(2).copied().unwrap_or(0) {
            0x04 => BusError::Stuff,
            0x02 => BusError::Form,
            0x01 => BusError::Bit,
            _ => BusError::Bit,
        };
    }
    if bits & 0x0000_0020 != 0 {
        return BusError::Ack;
    }
    if bits & 0x0000_0002 != 0 {
        return BusError::MessageLost;
    }
    // CRC errors are reported as a protocol-violation location in real
    // hardware; fall back to treating an otherwise unrecognised error bit
    // as a CRC error since no other variant claims it.
    BusError::Crc
}

pub struct SocketCanDevice {
    fd: RawFd,
    name: String,
}

impl SocketCanDevice {
    pub fn open(name: &str) -> Result<Self, DeviceError> {
        let interface_index = nix::net::if_::if_nametoindex(name)
            .map_err(|e| DeviceError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, e)))?;

        let sock_fd = unsafe { libc::socket(PF_CAN, libc::SOCK_RAW, CAN_RAW) };
        if sock_fd == -1 {
            return Err(DeviceError::Io(std::io::Error::last_os_error()));
        }

        let bind_result = unsafe {
            let addr = SockAddrCan {
                af_can: AF_CAN as libc::c_short,
                if_index: interface_index as libc::c_int,
            };
            libc::bind(
                sock_fd,
                &addr as *const SockAddrCan as *const libc::sockaddr,
                size_of::<SockAddrCan>() as u32,
            )
        };

        if bind_result == -1 {
            let e = std::io::Error::last_os_error();
            unsafe { libc::close(sock_fd) };
            return Err(DeviceError::Io(e));
        }

        Ok(Self {
            fd: sock_fd,
            name: name.to_string(),
        })
    }

    fn set_nonblocking(&self, enabled: bool) -> std::io::Result<()> {
        let old_flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL) };
        if old_flags == -1 {
            return Err(std::io::Error::last_os_error());
        }
        let new_flags = if enabled {
            old_flags | libc::O_NONBLOCK
        } else {
            old_flags & !libc::O_NONBLOCK
        };
        if unsafe { libc::fcntl(self.fd, libc::F_SETFL, new_flags) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn read_raw(&self) -> std::io::Result<RawFrame> {
        let mut frame = RawFrame::default();
        let n = unsafe {
            libc::read(
                self.fd,
                &mut frame as *mut RawFrame as *mut libc::c_void,
                size_of::<RawFrame>(),
            )
        };
        if n as usize != size_of::<RawFrame>() {
            return Err(std::io::Error::last_os_error());
        }
        Ok(frame)
    }

    /// Enables the "accept everything" error filter so the kernel forwards
    /// error frames to this socket instead of silently handling them.
    pub fn accept_all_errors(&self) -> std::io::Result<()> {
        util::set_socket_option(self.fd, SOL_CAN_RAW, CAN_RAW_ERR_FILTER, &ERR_MASK)
    }
}

impl CanDevice for SocketCanDevice {
    fn transmit(&self, frame: &Frame) -> Result<(), DeviceError> {
        let mut id = frame.id();
        if frame.is_extended() {
            id |= EFF_FLAG;
        }
        if frame.is_rtr() {
            id |= RTR_FLAG;
        }

        let mut data = [0u8; 8];
        data[..frame.data().len()].copy_from_slice(frame.data());

        let raw = RawFrame {
            id,
            data_len: frame.dlc(),
            pad: 0,
            res0: 0,
            res1: 0,
            data,
        };

        let n = unsafe {
            libc::write(
                self.fd,
                &raw as *const RawFrame as *const libc::c_void,
                size_of::<RawFrame>(),
            )
        };

        if n as usize != size_of::<RawFrame>() {
            return Err(DeviceError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn receive(&self) -> Result<Frame, DeviceError> {
        let raw = match self.read_raw() {
            Ok(raw) => raw,
            Err(e) if e.should_retry() => return Err(DeviceError::Timeout),
            Err(e) => return Err(DeviceError::Io(e)),
        };

        if raw.id & ERR_FLAG != 0 {
            return Err(DeviceError::Bus(classify_error_frame(&raw)));
        }

        let extended = raw.id & EFF_FLAG != 0;
        let id = raw.id & if extended { EFF_MASK } else { SFF_MASK };
        let rtr = raw.id & RTR_FLAG != 0;
        let len = raw.data_len.min(8) as usize;

        Ok(Frame::new(id, extended, rtr, &raw.data[..len])?)
    }

    fn flush_rx(&self) -> Result<(), DeviceError> {
        self.set_nonblocking(true)?;
        loop {
            match self.read_raw() {
                Ok(_) => continue,
                Err(e) if e.should_retry() => break,
                Err(e) => {
                    let _ = self.set_nonblocking(false);
                    return Err(DeviceError::Io(e));
                }
            }
        }
        self.set_nonblocking(false)?;
        Ok(())
    }

    fn set_timeout(&self, millis: u32) -> Result<(), DeviceError> {
        validate_timeout(millis)?;
        let duration = std::time::Duration::from_millis(millis as u64);
        util::set_socket_option(
            self.fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &util::c_timeval_new(duration),
        )?;
        Ok(())
    }

    fn baudrate(&self) -> Option<u32> {
        // Not exposed by the raw CAN_RAW socket API; a caller that needs
        // this reads it out of band (e.g. from `ip -details link show`).
        None
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn device_type(&self) -> &str {
        "socketcan"
    }

    fn close(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}

impl Drop for SocketCanDevice {
    fn drop(&mut self) {
        self.close();
    }
}

impl AsRawFd for SocketCanDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const CAN: &str = "vcan0";

    #[test]
    #[serial]
    #[cfg(feature = "vcan_tests")]
    fn init() {
        assert!(SocketCanDevice::open(CAN).is_ok());
    }

    #[test]
    #[serial]
    #[cfg(feature = "vcan_tests")]
    fn read_write() {
        let read = SocketCanDevice::open(CAN).unwrap();
        let write = SocketCanDevice::open(CAN).unwrap();
        let frame = Frame::new(0x123, false, false, &[1, 2, 3]).unwrap();
        write.transmit(&frame).unwrap();
        let received = read.receive().unwrap();
        assert_eq!(received.id(), frame.id());
        assert_eq!(received.data(), frame.data());
    }
}
