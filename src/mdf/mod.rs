//! ASAM MDF v4.11 writer: block-structured binary logging for CAN bus
//! traffic, grounded in `original_source/lib/mdf`.

pub mod block;
pub mod blocks;
pub mod log;

pub use block::{MdfError, MdfWriter};
pub use log::{CanBusLog, LogConfig};
