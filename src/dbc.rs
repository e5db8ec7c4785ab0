//! DBC file parser: turns CAN database text into pools of [`Message`]s and
//! [`Signal`]s.
//!
//! Grounded in `lib/can_database/can_dbc.c` (`stringSplit`, `parseMessage`,
//! `parseSignal`, `loadDbc`, `canDbcsLoad`). Per Design Notes §9, the
//! source's interior-pointer pools (frozen once via `linkDbc` to fix up
//! pointers that would otherwise dangle across a `realloc`) are replaced
//! here with an arena-and-index layout: a message stores
//! `first_signal_index`/`signal_count` into the signal pool, and a signal
//! stores its `message_index`. Because Rust's `Vec` indices stay valid
//! across reallocation (unlike the raw pointers the source held), no
//! separate freeze pass is needed — pools are built directly in one pass.

use crate::signal::Signal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("I/O error reading DBC file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {0}: signal declared before any message")]
    SignalBeforeMessage(usize),
    #[error("line {0}: missing field in {1} line")]
    MissingField(usize, &'static str),
    #[error("line {0}: invalid integer '{1}'")]
    InvalidInteger(usize, String),
    #[error("line {0}: invalid endianness/sign token '{1}'")]
    InvalidEndianOrSign(usize, String),
    #[error("line {0}: DLC {1} exceeds 8")]
    DlcOutOfRange(usize, u64),
    #[error("line too long (> {0} bytes)")]
    LineTooLong(usize),
}

/// A named CAN frame with an owned, ordered run of signals referenced as a
/// contiguous slice into the database's signal pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: u32,
    pub name: String,
    pub extended: bool,
    pub dlc: u8,
    pub first_signal_index: usize,
    pub signal_count: usize,
}

impl Message {
    pub fn signal_indices(&self) -> std::ops::Range<usize> {
        self.first_signal_index..self.first_signal_index + self.signal_count
    }
}

/// Maximum accepted input line length, guarding against unbounded-allocation
/// inputs (§7 "Parse: ... line length overflow").
const MAX_LINE_LENGTH: usize = 4096;

/// One parsed DBC file's message and signal pools.
#[derive(Debug, Default, Clone)]
pub struct DbcFile {
    pub messages: Vec<Message>,
    pub signals: Vec<Signal>,
}

impl DbcFile {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut file = DbcFile::default();
        let mut current_message: Option<usize> = None;

        for (line_no, raw_line) in text.lines().enumerate() {
            let line_no = line_no + 1;
            if raw_line.len() > MAX_LINE_LENGTH {
                return Err(ParseError::LineTooLong(line_no));
            }
            let line = raw_line.trim_start();
            if line.is_empty() {
                continue;
            }

            let (keyword, rest) = split_first_token(line);
            match keyword {
                "BO_" => {
                    let message = parse_message_line(rest, line_no)?;
                    file.messages.push(message);
                    current_message = Some(file.messages.len() - 1);
                }
                "SG_" => {
                    let message_index = current_message
                        .ok_or(ParseError::SignalBeforeMessage(line_no))?;
                    let mut signal = parse_signal_line(rest, line_no)?;
                    signal.message_index = message_index;

                    file.signals.push(signal);
                    let message = &mut file.messages[message_index];
                    if message.signal_count == 0 {
                        message.first_signal_index = file.signals.len() - 1;
                    }
                    message.signal_count += 1;
                }
                "BU_:" | "BS_:" | "EV_" | "SIG_GROUP_" | "VAL_TABLE_" | "VERSION" | "CM_"
                | "NS_" => {}
                other => {
                    log::warn!("line {}: skipping unrecognised keyword '{}'", line_no, other);
                }
            }
        }

        Ok(file)
    }

    pub fn load(path: &str) -> Result<Self, ParseError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

/// Concatenated pools from several DBC files, recording each file's first
/// message index so a caller can trace a merged-pool message back to its
/// source file. Grounded in `canDbcsLoad`'s `dbcMessageIndices`.
#[derive(Debug, Default, Clone)]
pub struct DbcSet {
    pub messages: Vec<Message>,
    pub signals: Vec<Signal>,
    pub file_offsets: Vec<usize>,
}

impl DbcSet {
    pub fn load_paths(paths: &[String]) -> Result<Self, ParseError> {
        let texts = paths
            .iter()
            .map(|p| std::fs::read_to_string(p))
            .collect::<Result<Vec<_>, _>>()?;
        Self::load_texts(&texts)
    }

    pub fn load_texts(sources: &[String]) -> Result<Self, ParseError> {
        let mut set = DbcSet::default();

        for source in sources {
            let file = DbcFile::parse(source)?;
            let message_base = set.messages.len();
            let signal_base = set.signals.len();

            set.file_offsets.push(message_base);

            for mut message in file.messages {
                message.first_signal_index += signal_base;
                set.messages.push(message);
            }
            for mut signal in file.signals {
                signal.message_index += message_base;
                set.signals.push(signal);
            }
        }

        Ok(set)
    }
}

fn split_first_token(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

/// `strtoul(s, NULL, 0)`-style integer parsing: `0x`/`0X` prefix selects
/// hex, a leading `0` with more digits selects octal, otherwise decimal.
///
/// Shared with [`crate::eeprom`], which parses bulk-programming values the
/// same way the original source's `strtol(string, NULL, 0)` does.
pub(crate) fn parse_uint_base0(s: &str) -> Option<u64> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if s.len() > 1 && s.starts_with('0') && s[1..].chars().all(|c| c.is_digit(8)) {
        u64::from_str_radix(&s[1..], 8)
    } else {
        s.parse::<u64>()
    };
    parsed.ok()
}

fn parse_int_base0(s: &str, line_no: usize) -> Result<u64, ParseError> {
    parse_uint_base0(s).ok_or_else(|| ParseError::InvalidInteger(line_no, s.trim().to_string()))
}

const ID_MASK: u32 = 0x1fff_ffff;
const IDE_BIT: u32 = 0x8000_0000;

fn parse_message_line(rest: &str, line_no: usize) -> Result<Message, ParseError> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(ParseError::MissingField(line_no, "BO_"));
    }

    let raw_id = parse_int_base0(tokens[0], line_no)? as u32;
    let extended = raw_id & IDE_BIT != 0;
    let id = raw_id & ID_MASK;

    let name = tokens[1].trim_end_matches(':').to_string();

    let dlc_raw = parse_int_base0(tokens[2], line_no)?;
    if dlc_raw > 8 {
        return Err(ParseError::DlcOutOfRange(line_no, dlc_raw));
    }

    Ok(Message {
        id,
        name,
        extended,
        dlc: dlc_raw as u8,
        first_signal_index: 0,
        signal_count: 0,
    })
}

/// Normalises a big-endian DBC bit position to the LSB-relative form the
/// codec (§4.1) operates on.
///
/// The source (`can_dbc.c`) expresses this as two branches rather than the
/// single closed form the specification's prose quotes; this reproduces the
/// source's actual branches, which agree with the closed form only when
/// `bit_length == 8`.
pub fn normalize_big_endian_position(bit_position: u8, bit_length: u8) -> u8 {
    let pos = bit_position as i32;
    let len = bit_length as i32;
    let normalized = if bit_length >= 8 { pos - 7 } else { pos - (len - 1) };
    normalized.max(0) as u8
}

fn parse_signal_line(rest: &str, line_no: usize) -> Result<Signal, ParseError> {
    const DELIMS: &[char] = &[' ', ':', '@', '|', ',', '(', ')', '[', ']'];

    let quote_start = rest
        .find('"')
        .ok_or(ParseError::MissingField(line_no, "SG_ unit"))?;
    let quote_end = rest[quote_start + 1..]
        .find('"')
        .map(|i| i + quote_start + 1)
        .ok_or(ParseError::MissingField(line_no, "SG_ unit"))?;
    let unit = rest[quote_start + 1..quote_end].to_string();

    let without_unit = format!("{} {}", &rest[..quote_start], &rest[quote_end + 1..]);
    let tokens: Vec<&str> = without_unit
        .split(|c: char| DELIMS.contains(&c))
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.len() < 6 {
        return Err(ParseError::MissingField(line_no, "SG_"));
    }

    let name = tokens[0].to_string();
    let pos_raw: u64 = parse_int_base0(tokens[1], line_no)?;
    let len_raw: u64 = parse_int_base0(tokens[2], line_no)?;
    if pos_raw >= 64 || len_raw >= 64 {
        return Err(ParseError::InvalidInteger(line_no, tokens[1].to_string()));
    }

    let endian_sign = tokens[3];
    let mut chars = endian_sign.chars();
    let endian_char = chars
        .next()
        .ok_or_else(|| ParseError::InvalidEndianOrSign(line_no, endian_sign.to_string()))?;
    let sign_char = chars
        .next()
        .ok_or_else(|| ParseError::InvalidEndianOrSign(line_no, endian_sign.to_string()))?;

    let little_endian = match endian_char {
        '1' => true,
        '0' => false,
        _ => return Err(ParseError::InvalidEndianOrSign(line_no, endian_sign.to_string())),
    };
    let signed = match sign_char {
        '-' => true,
        '+' => false,
        _ => return Err(ParseError::InvalidEndianOrSign(line_no, endian_sign.to_string())),
    };

    let scale: f64 = tokens[4]
        .parse()
        .map_err(|_| ParseError::InvalidInteger(line_no, tokens[4].to_string()))?;
    let offset: f64 = tokens[5]
        .parse()
        .map_err(|_| ParseError::InvalidInteger(line_no, tokens[5].to_string()))?;

    let bit_position = if little_endian {
        pos_raw as u8
    } else {
        normalize_big_endian_position(pos_raw as u8, len_raw as u8)
    };

    Ok(Signal {
        name,
        bit_position,
        bit_length: len_raw as u8,
        little_endian,
        signed,
        scale,
        offset,
        unit,
        message_index: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_dbc_round_trip() {
        let text = "BO_ 291 Example: 8 Vector__XXX\n SG_ Voltage : 0|16@1+ (0.01,0) [0|655.35] \"V\" Vector__XXX\n";
        let file = DbcFile::parse(text).unwrap();

        assert_eq!(file.messages.len(), 1);
        let message = &file.messages[0];
        assert_eq!(message.id, 0x123);
        assert!(!message.extended);
        assert_eq!(message.dlc, 8);

        assert_eq!(file.signals.len(), 1);
        let signal = &file.signals[0];
        assert_eq!(signal.name, "Voltage");
        assert_eq!(signal.bit_position, 0);
        assert_eq!(signal.bit_length, 16);
        assert_eq!(signal.scale, 0.01);
        assert!(!signal.signed);
    }

    #[test]
    fn rejects_signal_before_message() {
        let text = " SG_ Voltage : 0|16@1+ (0.01,0) [0|655.35] \"V\" Vector__XXX\n";
        assert!(matches!(
            DbcFile::parse(text),
            Err(ParseError::SignalBeforeMessage(_))
        ));
    }

    #[test]
    fn skips_unknown_keywords() {
        let text = "VERSION \"\"\nBO_ 1 A: 1 Vector__XXX\n";
        let file = DbcFile::parse(text).unwrap();
        assert_eq!(file.messages.len(), 1);
    }

    #[test]
    fn big_endian_normalization_matches_two_branch_source() {
        assert_eq!(normalize_big_endian_position(7, 8), 0);
        assert_eq!(normalize_big_endian_position(15, 16), 8);
        assert_eq!(normalize_big_endian_position(3, 4), 0);
    }

    #[test]
    fn multi_file_merge_records_offsets() {
        let a = "BO_ 1 A: 1 Vector__XXX\n SG_ S1 : 0|8@1+ (1,0) [0|0] \"\" X\n".to_string();
        let b = "BO_ 2 B: 1 Vector__XXX\n SG_ S2 : 0|8@1+ (1,0) [0|0] \"\" X\n".to_string();
        let set = DbcSet::load_texts(&[a, b]).unwrap();

        assert_eq!(set.file_offsets, vec![0, 1]);
        assert_eq!(set.messages.len(), 2);
        assert_eq!(set.signals[1].message_index, 1);
    }
}
