//! Crate-level error type, gathering each subsystem's own `thiserror` enum
//! behind one umbrella `#[from]` chain — the same flat-enum-of-subsystem-
//! errors shape as the teacher's `OpenError`, scaled up to a multi-module
//! crate.

use thiserror::Error;

use crate::database::DatabaseError;
use crate::dbc::ParseError;
use crate::device::DeviceError;
use crate::eeprom::EepromError;
use crate::frame::FrameError;
use crate::mdf::MdfError;

#[derive(Debug, Error)]
pub enum CanToolkitError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Dbc(#[from] ParseError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Eeprom(#[from] EepromError),
    #[error(transparent)]
    Mdf(#[from] MdfError),
}
