//! Capability interface for a CAN transport, plus name-prefix dispatch
//! between the two concrete transports.
//!
//! Per Design Notes §9 "Polymorphic device": the source builds a manual
//! vtable on each device instance. The `CanDevice` trait here is the
//! language-neutral equivalent; [`open`] is the one place that knows about
//! every concrete transport.

mod slcan;
mod socketcan;

pub use slcan::SlcanDevice;
pub use socketcan::SocketCanDevice;

use crate::frame::Frame;
use thiserror::Error;

/// The largest receive timeout accepted by [`CanDevice::set_timeout`];
/// `0` is reserved to mean "block indefinitely".
pub const TIMEOUT_MAX_MS: u32 = 65535;

/// A CAN controller error, decoded from a transport-specific error frame or
/// status code into the shared taxonomy named in the specification's error
/// handling design.
///
/// Grounded in the teacher's `err.rs` (`CANError` and friends), which
/// already classifies the same SocketCAN error-frame layout this taxonomy
/// names informally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus-off")]
    BusOff,
    #[error("error warning")]
    ErrorWarning,
    #[error("stuff error")]
    Stuff,
    #[error("form error")]
    Form,
    #[error("ack error")]
    Ack,
    #[error("bit error")]
    Bit,
    #[error("crc error")]
    Crc,
    #[error("message lost")]
    MessageLost,
    #[error("queue overrun")]
    QueueOverrun,
    #[error("tx busy")]
    TxBusy,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("receive timed out")]
    Timeout,
    #[error("bus error: {0}")]
    Bus(BusError),
    #[error("operation not supported on this platform")]
    Unsupported,
    #[error("timeout value {0} ms is out of range (must be < {TIMEOUT_MAX_MS})")]
    InvalidTimeout(u32),
    #[error("no transport recognises device name '{0}'")]
    UnknownTransport(String),
    #[error("frame construction failed: {0}")]
    Frame(#[from] crate::frame::FrameError),
}

/// Uniform transmit / receive / flush / timeout contract implemented by
/// every concrete transport (§4.2).
pub trait CanDevice: Send {
    fn transmit(&self, frame: &Frame) -> Result<(), DeviceError>;

    /// Blocks up to the configured timeout for one frame. Bus errors are
    /// reported as `Err(DeviceError::Bus(_))` rather than a normal frame;
    /// the caller may inspect the variant to decide whether to keep
    /// whatever frame buffer it already held.
    fn receive(&self) -> Result<Frame, DeviceError>;

    /// Discards all buffered received frames without blocking.
    fn flush_rx(&self) -> Result<(), DeviceError>;

    /// `0` means block indefinitely; values `>= TIMEOUT_MAX_MS` are
    /// rejected.
    fn set_timeout(&self, millis: u32) -> Result<(), DeviceError>;

    fn baudrate(&self) -> Option<u32>;

    fn device_name(&self) -> &str;

    fn device_type(&self) -> &str;

    fn close(&mut self);
}

/// Opens the transport named by `name`'s prefix (§6 "CAN device names").
pub fn open(name: &str) -> Result<Box<dyn CanDevice>, DeviceError> {
    if name.starts_with("can") || name.starts_with("vcan") {
        Ok(Box::new(SocketCanDevice::open(name)?))
    } else if name.starts_with("/dev/tty") || name.starts_with("COM") {
        Ok(Box::new(SlcanDevice::open(name)?))
    } else {
        Err(DeviceError::UnknownTransport(name.to_string()))
    }
}

pub(crate) fn validate_timeout(millis: u32) -> Result<(), DeviceError> {
    if millis >= TIMEOUT_MAX_MS {
        Err(DeviceError::InvalidTimeout(millis))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_prefix_is_rejected() {
        assert!(matches!(
            open("ftdi0"),
            Err(DeviceError::UnknownTransport(_))
        ));
    }

    #[test]
    fn timeout_validation() {
        assert!(validate_timeout(0).is_ok());
        assert!(validate_timeout(64999).is_ok());
        assert!(validate_timeout(65535).is_err());
        assert!(validate_timeout(70000).is_err());
    }
}
