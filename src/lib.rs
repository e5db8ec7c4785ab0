//! A toolkit for interacting with a CAN bus on an automotive embedded
//! vehicle.
//!
//! The crate is built around three tightly coupled subsystems:
//!
//! - [`dbc`] and [`database`] — a DBC-file parser and a live signal-value
//!   database that receives CAN frames on a background worker, decodes
//!   their bitfields into typed signal values, and tracks per-message
//!   freshness deadlines.
//! - [`device`] — a polymorphic device facade unifying SocketCAN and
//!   serial-line CAN transports behind one transmit/receive/flush/timeout
//!   contract, plus [`bus_load`] for frame-format-aware bus-load
//!   accounting.
//! - [`mdf`] — a block-structured, address-linked binary writer that
//!   produces ASAM MDF v4.11 CAN bus logs.
//!
//! Layered on top of the first two is [`eeprom`], a variable-granularity
//! register-access protocol with at-most-once semantics via
//! read-after-write verification.
//!
//! # An introduction to CAN
//!
//! The CAN bus was originally designed to allow microcontrollers inside a
//! vehicle to communicate over a single shared bus. Messages called
//! *frames* are multicast to all devices on the bus.
//!
//! Every frame consists of an ID and a payload of up to 8 bytes. If two
//! devices attempt to send a frame at the same time, the device with the
//! higher ID will notice the conflict, stop sending and reattempt to send
//! its frame in the next time slot — the lower the ID, the higher the
//! priority.
//!
//! A DBC file describes how to turn a frame's raw payload into named,
//! scaled physical values ([`signal`], [`dbc`]); a [`database::Database`]
//! keeps those values up to date in the background so the rest of an
//! application can just read them.

pub mod bus_load;
pub mod database;
pub mod dbc;
pub mod device;
pub mod eeprom;
pub mod error;
pub mod frame;
pub mod logging;
pub mod mdf;
pub mod retry;
pub mod signal;
mod util;

pub use database::Database;
pub use dbc::{DbcFile, DbcSet, Message};
pub use device::{open, CanDevice};
pub use eeprom::Eeprom;
pub use error::CanToolkitError;
pub use frame::Frame;
pub use mdf::CanBusLog;
pub use signal::Signal;
