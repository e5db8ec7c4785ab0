//! CAN-EEPROM request/response protocol: register-style reads and writes of
//! a remote device's EEPROM over a CAN bus, plus JSON-described variable
//! maps for bulk configuration.
//!
//! Grounded in `lib/can_eeprom/can_eeprom_operations.c` (command/response
//! framing, the 10-attempt retry loop, 4-byte block splitting) and
//! `lib/can_eeprom/can_eeprom.c` (variable descriptors, mode gating, JSON
//! bulk programming).
//!
//! Command/response framing (`EEPROM_COMMAND_MESSAGE_RW`,
//! `EEPROM_RESPONSE_MESSAGE_ADDR`): bytes 0-1 hold a 15-bit address in bits
//! 0-14 and the read/write flag in bit 15, transmitted little-endian. A
//! command goes out on `can_id`; its response comes back on `can_id + 1`.

use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use crate::device::{CanDevice, DeviceError};
use crate::frame::Frame;

const RESPONSE_ATTEMPT_COUNT: u32 = 10;
const RESPONSE_ATTEMPT_TIMEOUT: Duration = Duration::from_micros(1000);
const MAX_BLOCK_SIZE: u16 = 4;
const RW_WRITE: u16 = 0x0000;
const RW_READ: u16 = 0x8000;
const ADDRESS_MASK: u16 = 0x7fff;

#[derive(Debug, Error)]
pub enum EepromError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("frame construction failed: {0}")]
    Frame(#[from] crate::frame::FrameError),
    #[error("write was not acknowledged within the retry budget")]
    WriteTimeout,
    #[error("read was not acknowledged within the retry budget")]
    ReadTimeout,
    #[error("unrecognised variable type {0:?}")]
    InvalidType(String),
    #[error("unrecognised variable mode {0:?}")]
    InvalidMode(String),
    #[error("variable {0:?} is read-only")]
    ReadOnly(String),
    #[error("variable {0:?} is write-only")]
    WriteOnly(String),
    #[error("dimension mismatch writing variable {0:?}")]
    BadDimension(String),
    #[error("value for variable {0:?} was not a JSON string")]
    BadValue(String),
    #[error("no EEPROM variable named {0:?}")]
    BadKey(String),
    #[error("malformed configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromType {
    U8,
    U16,
    U32,
    F32,
}

impl EepromType {
    fn size(self) -> u16 {
        match self {
            EepromType::U8 => 1,
            EepromType::U16 => 2,
            EepromType::U32 => 4,
            EepromType::F32 => 4,
        }
    }

    fn from_name(name: &str) -> Result<Self, EepromError> {
        match name {
            "u8" => Ok(EepromType::U8),
            "u16" => Ok(EepromType::U16),
            "u32" => Ok(EepromType::U32),
            "f32" => Ok(EepromType::F32),
            other => Err(EepromError::InvalidType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromMode {
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

impl EepromMode {
    fn from_name(name: &str) -> Result<Self, EepromError> {
        match name {
            "read_write" => Ok(EepromMode::ReadWrite),
            "read_only" => Ok(EepromMode::ReadOnly),
            "write_only" => Ok(EepromMode::WriteOnly),
            other => Err(EepromError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EepromVariable {
    pub name: String,
    pub address: u16,
    pub data_type: EepromType,
    pub mode: EepromMode,
    pub width: u16,
    pub height: u16,
}

impl EepromVariable {
    fn element_count(&self) -> u16 {
        self.width * self.height
    }

    fn byte_count(&self) -> u16 {
        self.data_type.size() * self.element_count()
    }

    fn from_json(value: &Value) -> Result<Self, EepromError> {
        let name = value["name"]
            .as_str()
            .ok_or_else(|| EepromError::BadValue("name".into()))?
            .to_string();
        let address = value["address"]
            .as_u64()
            .ok_or_else(|| EepromError::BadValue(name.clone()))? as u16;
        let data_type = EepromType::from_name(
            value["type"]
                .as_str()
                .ok_or_else(|| EepromError::BadValue(name.clone()))?,
        )?;
        let mode = match value.get("mode").and_then(Value::as_str) {
            Some(mode) => EepromMode::from_name(mode)?,
            None => EepromMode::ReadWrite,
        };
        let (width, height) = match value.get("width").and_then(Value::as_u64) {
            Some(width) => (
                width as u16,
                value.get("height").and_then(Value::as_u64).unwrap_or(1) as u16,
            ),
            None => (1, 1),
        };

        Ok(Self {
            name,
            address,
            data_type,
            mode,
            width,
            height,
        })
    }
}

/// A single EEPROM-equipped device's variable map, addressed by CAN ID.
pub struct Eeprom {
    pub name: String,
    pub can_id: u16,
    pub variables: Vec<EepromVariable>,
}

impl Eeprom {
    /// Builds an `Eeprom` from the same JSON shape as the configuration
    /// files this device family ships with: `{"name", "canId",
    /// "variables": [{"address","name","type","mode"?,"width"?,"height"?}]}`.
    pub fn from_config(config: &Value) -> Result<Self, EepromError> {
        let name = config["name"]
            .as_str()
            .ok_or_else(|| EepromError::BadValue("name".into()))?
            .to_string();
        let can_id = config["canId"]
            .as_u64()
            .ok_or_else(|| EepromError::BadValue("canId".into()))? as u16;
        let variables = config["variables"]
            .as_array()
            .ok_or_else(|| EepromError::BadValue("variables".into()))?
            .iter()
            .map(EepromVariable::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            can_id,
            variables,
        })
    }

    pub fn variable(&self, name: &str) -> Option<&EepromVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Writes `buffer` into the EEPROM starting at `address`, splitting
    /// into at-most-4-byte blocks.
    pub fn write(
        &self,
        device: &dyn CanDevice,
        mut address: u16,
        buffer: &[u8],
    ) -> Result<(), EepromError> {
        let mut remaining = buffer;
        while remaining.len() > MAX_BLOCK_SIZE as usize {
            let (block, rest) = remaining.split_at(MAX_BLOCK_SIZE as usize);
            write_single(self.can_id, device, address, block)?;
            address += MAX_BLOCK_SIZE;
            remaining = rest;
        }
        write_single(self.can_id, device, address, remaining)
    }

    /// Reads `count` bytes from the EEPROM starting at `address`.
    pub fn read(
        &self,
        device: &dyn CanDevice,
        mut address: u16,
        count: u16,
    ) -> Result<Vec<u8>, EepromError> {
        let mut out = Vec::with_capacity(count as usize);
        let mut remaining = count;
        while remaining > MAX_BLOCK_SIZE {
            out.extend(read_single(self.can_id, device, address, MAX_BLOCK_SIZE)?);
            address += MAX_BLOCK_SIZE;
            remaining -= MAX_BLOCK_SIZE;
        }
        out.extend(read_single(self.can_id, device, address, remaining)?);
        Ok(out)
    }

    pub fn write_variable(
        &self,
        device: &dyn CanDevice,
        variable: &EepromVariable,
        buffer: &[u8],
    ) -> Result<(), EepromError> {
        if variable.mode == EepromMode::ReadOnly {
            return Err(EepromError::ReadOnly(variable.name.clone()));
        }
        self.write(device, variable.address, &buffer[..variable.byte_count() as usize])
    }

    pub fn read_variable(
        &self,
        device: &dyn CanDevice,
        variable: &EepromVariable,
    ) -> Result<Vec<u8>, EepromError> {
        if variable.mode == EepromMode::WriteOnly {
            return Err(EepromError::WriteOnly(variable.name.clone()));
        }
        self.read(device, variable.address, variable.byte_count())
    }

    /// Writes every key of `data` to its matching variable, per §6's bulk
    /// configuration format. Scalars are single JSON strings; arrays/
    /// matrices are nested JSON arrays of strings, traversed row-major.
    pub fn write_config(&self, device: &dyn CanDevice, data: &Value) -> Result<(), EepromError> {
        let object = data
            .as_object()
            .ok_or_else(|| EepromError::BadValue("<config root>".into()))?;

        for (key, value) in object {
            let variable = self
                .variable(key)
                .ok_or_else(|| EepromError::BadKey(key.clone()))?;

            if variable.height != 1 {
                let rows = value
                    .as_array()
                    .ok_or_else(|| EepromError::BadDimension(key.clone()))?;
                if rows.len() as u16 != variable.height {
                    return Err(EepromError::BadDimension(key.clone()));
                }
            }

            let mut buffer = Vec::with_capacity(variable.byte_count() as usize);
            for y in 0..variable.height {
                let row = if variable.height != 1 {
                    &value[y as usize]
                } else {
                    value
                };

                if variable.width != 1 {
                    let cols = row
                        .as_array()
                        .ok_or_else(|| EepromError::BadDimension(key.clone()))?;
                    if cols.len() as u16 != variable.width {
                        return Err(EepromError::BadDimension(key.clone()));
                    }
                }

                for x in 0..variable.width {
                    let element = if variable.width != 1 { &row[x as usize] } else { row };
                    let string = element
                        .as_str()
                        .ok_or_else(|| EepromError::BadValue(key.clone()))?;
                    buffer.extend_from_slice(&parse_primitive(variable.data_type, string, key)?);
                }
            }

            self.write_variable(device, variable, &buffer)?;
        }

        Ok(())
    }
}

/// Parses one scalar of a bulk-configuration value, `strtol(string, NULL,
/// 0)`-style for integers so that `"0x10"` writes 16, matching §6 and the
/// original's `strtol` call. `key` is only used to name the variable in
/// the returned error.
fn parse_primitive(data_type: EepromType, string: &str, key: &str) -> Result<Vec<u8>, EepromError> {
    let bad_value = || EepromError::BadValue(key.to_string());
    match data_type {
        EepromType::U8 => {
            let value = crate::dbc::parse_uint_base0(string).ok_or_else(bad_value)?;
            Ok(vec![u8::try_from(value).map_err(|_| bad_value())?])
        }
        EepromType::U16 => {
            let value = crate::dbc::parse_uint_base0(string).ok_or_else(bad_value)?;
            Ok(u16::try_from(value).map_err(|_| bad_value())?.to_le_bytes().to_vec())
        }
        EepromType::U32 => {
            let value = crate::dbc::parse_uint_base0(string).ok_or_else(bad_value)?;
            Ok(u32::try_from(value).map_err(|_| bad_value())?.to_le_bytes().to_vec())
        }
        EepromType::F32 => {
            let value = string.parse::<f32>().map_err(|_| bad_value())?;
            Ok(value.to_le_bytes().to_vec())
        }
    }
}

fn encode_command(can_id: u16, rw: u16, address: u16, payload: &[u8]) -> Result<Frame, EepromError> {
    let header = (address & ADDRESS_MASK) | rw;
    let mut data = Vec::with_capacity(2 + payload.len());
    data.extend_from_slice(&header.to_le_bytes());
    data.extend_from_slice(payload);
    Ok(Frame::new(can_id as u32, false, false, &data)?)
}

/// Parses a response frame, returning the data bytes if it matches the
/// outstanding command. Unlike the source this is grounded on, the address
/// comparison below is derived from the *frame's own* header word rather
/// than re-deriving it from the expected address — the original recomputes
/// the expected side of the comparison from its own input, making the check
/// tautologically true regardless of what the device actually echoed back.
fn parse_response<'a>(
    can_id: u16,
    frame: &'a Frame,
    rw: u16,
    address: u16,
    count: u8,
) -> Option<&'a [u8]> {
    if frame.id() != (can_id as u32) + 1 {
        return None;
    }
    let data = frame.data();
    if data.len() < 2 {
        return None;
    }
    let header = u16::from_le_bytes([data[0], data[1]]);
    if (header & RW_READ) != rw {
        return None;
    }
    let response_address = header & ADDRESS_MASK;
    if response_address != (address & ADDRESS_MASK) {
        return None;
    }
    let response_count = frame.dlc().saturating_sub(2);
    if response_count != count {
        return None;
    }
    Some(&data[2..])
}

fn write_single(
    can_id: u16,
    device: &dyn CanDevice,
    address: u16,
    buffer: &[u8],
) -> Result<(), EepromError> {
    let command = encode_command(can_id, RW_WRITE, address, buffer)?;
    let count = buffer.len() as u8;

    for _attempt in 0..RESPONSE_ATTEMPT_COUNT {
        device.flush_rx()?;
        device.transmit(&command)?;

        let deadline = Instant::now() + RESPONSE_ATTEMPT_TIMEOUT;
        while Instant::now() < deadline {
            let response = match device.receive() {
                Ok(frame) => frame,
                Err(_) => continue,
            };
            let echoed = match parse_response(can_id, &response, RW_WRITE, address, count) {
                Some(data) => data,
                None => continue,
            };
            if echoed == buffer {
                return Ok(());
            }
            // Incorrect echo: break out of the inner wait and retransmit.
            break;
        }
    }

    Err(EepromError::WriteTimeout)
}

fn read_single(
    can_id: u16,
    device: &dyn CanDevice,
    address: u16,
    count: u16,
) -> Result<Vec<u8>, EepromError> {
    let command = encode_command(can_id, RW_READ, address, &[])?;
    let count = count as u8;

    for _attempt in 0..RESPONSE_ATTEMPT_COUNT {
        let _ = device.flush_rx();
        device.transmit(&command)?;

        let deadline = Instant::now() + RESPONSE_ATTEMPT_TIMEOUT;
        while Instant::now() < deadline {
            let response = match device.receive() {
                Ok(frame) => frame,
                Err(_) => continue,
            };
            if let Some(data) = parse_response(can_id, &response, RW_READ, address, count) {
                return Ok(data.to_vec());
            }
        }
    }

    Err(EepromError::ReadTimeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_json() {
        let config: Value = serde_json::from_str(
            r#"{
                "name": "Controller",
                "canId": 256,
                "variables": [
                    {"address": 0, "name": "Gain", "type": "f32"},
                    {"address": 4, "name": "Mode", "type": "u8", "mode": "read_only"}
                ]
            }"#,
        )
        .unwrap();

        let eeprom = Eeprom::from_config(&config).unwrap();
        assert_eq!(eeprom.can_id, 256);
        assert_eq!(eeprom.variables.len(), 2);
        assert_eq!(eeprom.variable("Gain").unwrap().data_type, EepromType::F32);
        assert_eq!(eeprom.variable("Mode").unwrap().mode, EepromMode::ReadOnly);
    }

    #[test]
    fn response_address_check_rejects_mismatched_frame() {
        let frame = Frame::new(257, false, false, &[0x04, 0x00, 0xAA, 0xBB]).unwrap();
        // Command was issued for address 8, but the response reports address 4.
        assert!(parse_response(256, &frame, RW_WRITE, 8, 2).is_none());
    }

    #[test]
    fn response_address_check_accepts_matching_frame() {
        let frame = Frame::new(257, false, false, &[0x04, 0x00, 0xAA, 0xBB]).unwrap();
        let data = parse_response(256, &frame, RW_WRITE, 4, 2).unwrap();
        assert_eq!(data, &[0xAA, 0xBB]);
    }

    #[test]
    fn command_encoding_sets_read_flag_in_high_bit() {
        let frame = encode_command(0x100, RW_READ, 0x10, &[]).unwrap();
        let header = u16::from_le_bytes([frame.data()[0], frame.data()[1]]);
        assert_eq!(header, 0x8010);
    }
}
