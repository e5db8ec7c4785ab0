//! Concrete MDF v4.11 block builders: the 64-byte file identification
//! block and the data-section/link-list layouts for HD, FH, MD, TX, DG,
//! CG, CN, CC, SI, and DT blocks.
//!
//! Field layouts are grounded in
//! `original_source/lib/mdf/mdf_block_types.h`; byte packing follows
//! `byteorder`'s little-endian convention as used elsewhere in this crate.

use byteorder::{ByteOrder, LittleEndian};

use super::block::assemble_block;

pub const MDF_VERSION_STRING: &[u8; 8] = b"4.11    ";
pub const MDF_VERSION_NUMBER: u16 = 411;
/// Standard flag bit 0: file is unfinalized (written with placeholder
/// lengths/links still pending a finalization pass this crate does not
/// perform — logs are written start-to-finish in one session).
pub const MDF_FILE_IDENTIFICATION_UNFINALIZED: u16 = 0;

/// Builds the 64-byte file identification block that must be the first
/// thing in every MDF file (it precedes the first aligned block and is
/// never itself 8-byte padded).
pub fn file_identification_block(program_id: &str) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[0..8].copy_from_slice(b"MDF     ");
    out[8..16].copy_from_slice(MDF_VERSION_STRING);

    let mut program_field = [0u8; 8];
    let truncated = &program_id.as_bytes()[..program_id.len().min(7)];
    program_field[..truncated.len()].copy_from_slice(truncated);
    out[16..24].copy_from_slice(&program_field);

    LittleEndian::write_u16(&mut out[28..30], MDF_FILE_IDENTIFICATION_UNFINALIZED);
    LittleEndian::write_u16(&mut out[32..34], MDF_VERSION_NUMBER);
    out
}

/// HD (header) block. Links: `[DG, FH, CH(unused=0), AT(unused=0),
/// EV(unused=0), MD(comment, unused=0)]`.
pub fn hd_block(unix_time_ns: u64, first_dg: u64, first_fh: u64) -> Vec<u8> {
    let mut data = [0u8; 31].to_vec();
    LittleEndian::write_u64(&mut data[0..8], unix_time_ns);
    assemble_block(b"##HD", &[first_dg, first_fh, 0, 0, 0, 0], &data)
}

/// FH (file history) block: records when this log was written. Links:
/// `[next_fh(0), comment]`.
pub fn fh_block(unix_time_ns: u64, comment_addr: u64) -> Vec<u8> {
    let mut data = [0u8; 8 + 8].to_vec(); // timestamp + 8 reserved bytes
    LittleEndian::write_u64(&mut data[0..8], unix_time_ns);
    assemble_block(b"##FH", &[0, comment_addr], &data)
}

/// TX (plain text) block: a NUL-terminated string, padded so the whole
/// block remains a multiple of 8 bytes at the caller's discretion (the
/// writer itself pads between blocks, not within them, so callers may
/// leave the data section unpadded).
pub fn tx_block(text: &str) -> Vec<u8> {
    let mut data = text.as_bytes().to_vec();
    data.push(0);
    assemble_block(b"##TX", &[], &data)
}

/// MD (metadata / XML) block: same shape as TX, different id.
pub fn md_block(xml: &str) -> Vec<u8> {
    let mut data = xml.as_bytes().to_vec();
    data.push(0);
    assemble_block(b"##MD", &[], &data)
}

/// DG (data group) block. Links: `[next_dg(0), first_cg, data(DT), comment(0)]`.
/// `record_id_size` is 1 whenever the data block multiplexes more than one
/// channel group (each record is then prefixed by that many bytes of
/// record id); 0 means records carry no id prefix at all.
pub fn dg_block(first_cg: u64, data_block: u64, record_id_size: u8) -> Vec<u8> {
    let mut data = [0u8; 8];
    data[0] = record_id_size;
    assemble_block(b"##DG", &[0, first_cg, data_block, 0], &data)
}

pub const CG_FLAGS_NONE: u16 = 0x0000;
pub const CG_FLAGS_BUS_EVENT: u16 = 0x0002;
pub const CG_FLAGS_PLAIN_BUS_EVENT: u16 = 0x0004;

/// CG (channel group) block. Links:
/// `[next_cg(0), first_cn, acquisition_name, acquisition_source, sample_reduction(0), comment(0)]`.
pub fn cg_block(
    record_id: u64,
    flags: u16,
    record_byte_length: u32,
    first_cn: u64,
    acquisition_name: u64,
    acquisition_source: u64,
) -> Vec<u8> {
    let mut data = [0u8; 24].to_vec();
    LittleEndian::write_u64(&mut data[0..8], record_id);
    LittleEndian::write_u64(&mut data[8..16], 0); // cycle count, unused at write time
    LittleEndian::write_u16(&mut data[16..18], flags);
    LittleEndian::write_u32(&mut data[20..24], record_byte_length);
    assemble_block(
        b"##CG",
        &[0, first_cn, acquisition_name, acquisition_source, 0, 0],
        &data,
    )
}

pub const CHANNEL_TYPE_VALUE: u8 = 0x00;
pub const SYNC_TYPE_NONE: u8 = 0x00;
pub const DATA_TYPE_UNSIGNED_INTEL: u8 = 0x00;
pub const DATA_TYPE_BYTE_ARRAY: u8 = 0x0A;
pub const CN_FLAGS_NONE: u16 = 0x0000;
pub const CN_FLAGS_BUS_EVENT: u16 = 0x0400;

/// CN (channel) block, describing one component field of a record. Links:
/// `[next_cn, component(0), name, source(0), conversion(0), data(0), unit(0), comment(0)]`.
pub fn cn_block(
    name_addr: u64,
    next_cn: u64,
    data_type: u8,
    bit_offset: u8,
    byte_offset: u32,
    bit_length: u32,
    flags: u16,
) -> Vec<u8> {
    let mut data = [0u8; 40].to_vec();
    data[0] = CHANNEL_TYPE_VALUE;
    data[1] = SYNC_TYPE_NONE;
    data[2] = data_type;
    data[3] = bit_offset;
    LittleEndian::write_u32(&mut data[4..8], byte_offset);
    LittleEndian::write_u32(&mut data[8..12], bit_length);
    LittleEndian::write_u16(&mut data[12..14], flags);
    assemble_block(b"##CN", &[next_cn, 0, name_addr, 0, 0, 0, 0, 0], &data)
}

pub const SOURCE_TYPE_BUS: u8 = 0x02;
pub const BUS_TYPE_CAN: u8 = 0x02;

/// SI (source information) block, identifying the CAN bus this log
/// records from. Links: `[name, path, comment(0)]`.
pub fn si_block(name_addr: u64, path_addr: u64) -> Vec<u8> {
    let data = [SOURCE_TYPE_BUS, BUS_TYPE_CAN, 0, 0, 0, 0, 0, 0];
    assemble_block(b"##SI", &[name_addr, path_addr, 0], &data)
}

/// DT (data) block header only — the raw record bytes are appended by the
/// caller as this block is filled incrementally during logging.
pub fn dt_block_header(data_len: u64) -> Vec<u8> {
    assemble_block(b"##DT", &[], &vec![0u8; data_len as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_identification_block_has_expected_layout() {
        let block = file_identification_block("cantoolkit");
        assert_eq!(&block[0..8], b"MDF     ");
        assert_eq!(&block[8..16], MDF_VERSION_STRING);
        assert_eq!(&block[16..24], b"cantool\0");
        assert_eq!(LittleEndian::read_u16(&block[32..34]), MDF_VERSION_NUMBER);
    }

    #[test]
    fn cn_block_encodes_bit_geometry() {
        let bytes = cn_block(64, 0, DATA_TYPE_BYTE_ARRAY, 0, 11, 64, CN_FLAGS_BUS_EVENT);
        // data section begins after header (24) + 8 links * 8 bytes = 64.
        let data = &bytes[88..];
        assert_eq!(data[2], DATA_TYPE_BYTE_ARRAY);
        assert_eq!(LittleEndian::read_u32(&data[4..8]), 11);
        assert_eq!(LittleEndian::read_u32(&data[8..12]), 64);
    }
}
