//! CAN-bus log composition on top of the generic MDF writer: builds the
//! HD -> FH/DG -> CG -> CN tree for a single "CAN_DataFrame" channel group
//! and appends fixed-layout records to its `##DT` data block as frames
//! arrive.
//!
//! Grounded in `original_source/lib/mdf/mdf_can_bus_logging.c`
//! (`writeHeader`, `writeAcquisitionSource`, `writeDataFrameCg`,
//! `writeTimestampCc`, the exact byte/bit offsets of the `CAN_DataFrame`
//! component channels, and the `<SIcomment>` XML fragment describing the
//! acquisition source).

use std::path::Path;

use crate::frame::Frame;

use super::block::{MdfError, MdfWriter};
use super::blocks::{self, CG_FLAGS_BUS_EVENT, CG_FLAGS_PLAIN_BUS_EVENT, CN_FLAGS_BUS_EVENT, CN_FLAGS_NONE,
    DATA_TYPE_BYTE_ARRAY, DATA_TYPE_UNSIGNED_INTEL};

const TIMESTAMP_SCALE: f64 = 1e-6;
const RECORD_ID: u8 = 0x01;
/// `timestamp(6) + id(4) + ide/bus_channel(1) + dlc(1) + data(8)`, excluding
/// the record-id byte the DG block prefixes each record with.
const RECORD_PAYLOAD_LEN: usize = 19;

/// Per-log session metadata, mirroring the configuration block the
/// original acquisition-source comment is templated from.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub program_id: String,
    pub software_version: String,
    pub hardware_version: String,
    pub serial_number: String,
    pub channel1_baudrate: u32,
    pub channel2_baudrate: u32,
    pub time_start_unix: u64,
    pub storage_size: u64,
    pub storage_remaining: u64,
    pub session_number: u32,
    pub split_number: u32,
}

/// Open CAN-bus MDF log file. Frames are appended one at a time; `close`
/// patches the `##DT` block's final length and flushes the writer.
pub struct CanBusLog {
    writer: MdfWriter,
    bytes_written: u64,
}

impl CanBusLog {
    pub fn create(path: impl AsRef<Path>, config: &LogConfig) -> Result<Self, MdfError> {
        let mut writer = MdfWriter::create(path)?;

        let id_block = blocks::file_identification_block(&config.program_id);
        writer.write_raw(&id_block)?;

        let unix_time_ns = config.time_start_unix * 1_000_000_000;

        // HD's links are unknown until its DG exists; write it first with
        // placeholder links and patch them once every later block exists.
        let hd_bytes = blocks::hd_block(unix_time_ns, 0, 0);
        writer.write_block_tagged(&hd_bytes, "hd")?;

        let comment = format!(
            "Logged by {} (hw {}, serial {})",
            config.software_version, config.hardware_version, config.serial_number
        );
        let fh_comment_addr = writer.write_block_tagged(&blocks::md_block(&comment), "fh_comment")?;
        let fh_bytes = blocks::fh_block(unix_time_ns, fh_comment_addr);
        writer.write_block_tagged(&fh_bytes, "fh")?;

        let acquisition_source_addr = write_acquisition_source(&mut writer, config)?;
        let timestamp_cc_addr = write_timestamp_cc(&mut writer)?;
        let cg_addr = write_data_frame_cg(&mut writer, acquisition_source_addr, timestamp_cc_addr)?;

        let dt_bytes = blocks::dt_block_header(0);
        let dt_addr = writer.write_block_tagged(&dt_bytes, "dt")?;

        let dg_bytes = blocks::dg_block(cg_addr, dt_addr, 1);
        let dg_addr = writer.write_block_tagged(&dg_bytes, "dg")?;

        writer.patch_link("hd", 0, dg_addr)?;
        writer.patch_link("hd", 1, writer.block_address("fh")?)?;

        Ok(Self {
            writer,
            bytes_written: 0,
        })
    }

    /// Appends one CAN frame as a 20-byte record: a 1-byte record id
    /// followed by the 19-byte `CAN_DataFrame` payload.
    pub fn write_frame(&mut self, timestamp_micros: u64, bus_channel: u8, frame: &Frame) -> Result<(), MdfError> {
        let mut record = [0u8; 1 + RECORD_PAYLOAD_LEN];
        record[0] = RECORD_ID;

        let payload = &mut record[1..];
        payload[0..6].copy_from_slice(&timestamp_micros.to_le_bytes()[0..6]);

        let id = frame.id() & 0x1fff_ffff;
        payload[6..10].copy_from_slice(&id.to_le_bytes());

        let ide = if frame.is_extended() { 1u8 } else { 0u8 };
        payload[9] |= (ide & 0b1) << 5;
        payload[9] |= (bus_channel & 0b11) << 6;

        payload[10] = frame.dlc() & 0x0f;

        let data = frame.data();
        payload[11..11 + data.len()].copy_from_slice(data);

        self.writer.write_raw(&record)?;
        self.bytes_written += record.len() as u64;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), MdfError> {
        let dt_length = 24 + self.bytes_written;
        self.writer.patch_length("dt", dt_length)?;
        self.writer.finish()
    }
}

fn write_acquisition_source(writer: &mut MdfWriter, config: &LogConfig) -> Result<u64, MdfError> {
    let name_addr = writer.write_block(&blocks::tx_block("CAN"))?;

    let comment = format!(
        "<SIcomment>\n\
         <TX>\n    CAN\n</TX>\n\
         <bus name=\"CAN\"/>\n\
         <common_properties>\n\
         <tree name=\"ASAM Measurement Environment\">\n\
         <tree name=\"node\">\n\
         <e name=\"type\">Device</e>\n\
         <e name=\"software version\">{}</e>\n\
         <e name=\"hardware version\">{}</e>\n\
         <e name=\"serial number\">{}</e>\n\
         </tree>\n\
         </tree>\n\
         <tree name=\"Bus Information\">\n\
         <e name=\"CAN1 Bit-rate\" unit=\"Hz\">{}</e>\n\
         <e name=\"CAN2 Bit-rate\" unit=\"Hz\">{}</e>\n\
         </tree>\n\
         </common_properties>\n\
         </SIcomment>",
        config.software_version,
        config.hardware_version,
        config.serial_number,
        config.channel1_baudrate,
        config.channel2_baudrate,
    );
    let comment_addr = writer.write_block(&blocks::md_block(&comment))?;

    let si_bytes = blocks::si_block(name_addr, name_addr);
    let _ = comment_addr; // SI's comment link is left unset; the MD above documents the source instead.
    writer.write_block(&si_bytes)
}

fn write_timestamp_cc(writer: &mut MdfWriter) -> Result<u64, MdfError> {
    let unit_addr = writer.write_block(&blocks::tx_block("s"))?;
    // A linear conversion block (y = a*x + b) scaling raw microseconds to
    // seconds; reused verbatim from the teacher's byte-packing idiom rather
    // than introducing a dedicated CC builder for a single conversion kind.
    let mut data = [0u8; 24];
    data[0] = 0x01; // MDF_CC_CONVERSION_TYPE_LINEAR
    data[16..24].copy_from_slice(&TIMESTAMP_SCALE.to_le_bytes());
    let bytes = super::block::assemble_block(b"##CC", &[0, unit_addr, 0, 0], &data);
    writer.write_block(&bytes)
}

fn write_data_frame_cg(
    writer: &mut MdfWriter,
    acquisition_source_addr: u64,
    timestamp_cc_addr: u64,
) -> Result<u64, MdfError> {
    let mut next_cn = 0u64;

    for (name, data_type, bit_offset, byte_offset, bit_length) in [
        ("CAN_DataFrame.DataBytes", DATA_TYPE_BYTE_ARRAY, 0, 11, 64),
        ("CAN_DataFrame.Dir", DATA_TYPE_UNSIGNED_INTEL, 4, 10, 1),
        ("CAN_DataFrame.DataLength", DATA_TYPE_UNSIGNED_INTEL, 0, 10, 4),
        ("CAN_DataFrame.DLC", DATA_TYPE_UNSIGNED_INTEL, 0, 10, 4),
        ("CAN_DataFrame.BusChannel", DATA_TYPE_UNSIGNED_INTEL, 6, 9, 2),
        ("CAN_DataFrame.IDE", DATA_TYPE_UNSIGNED_INTEL, 5, 9, 1),
        ("CAN_DataFrame.ID", DATA_TYPE_UNSIGNED_INTEL, 0, 6, 29),
    ] {
        let name_addr = writer.write_block(&blocks::tx_block(name))?;
        let bytes = blocks::cn_block(
            name_addr,
            next_cn,
            data_type,
            bit_offset,
            byte_offset,
            bit_length,
            CN_FLAGS_BUS_EVENT,
        );
        next_cn = writer.write_block(&bytes)?;
    }

    // `next_cn` is now the head of the component chain (CAN_DataFrame.ID),
    // referenced via this top-level channel's componentAddr link rather
    // than its nextCnAddr — the component list is a separate chain.
    let component_head = next_cn;
    let data_frame_name_addr = writer.write_block(&blocks::tx_block("CAN_DataFrame"))?;
    let data_frame_bytes = cn_block_composite(data_frame_name_addr, component_head);
    let data_frame_cn_addr = writer.write_block(&data_frame_bytes)?;

    let timestamp_name_addr = writer.write_block(&blocks::tx_block("Timestamp"))?;
    let timestamp_bytes = cn_block_master(timestamp_name_addr, data_frame_cn_addr, timestamp_cc_addr);
    let timestamp_cn_addr = writer.write_block(&timestamp_bytes)?;

    let acquisition_name_addr = writer.write_block(&blocks::tx_block("CAN_DataFrame"))?;
    let cg_bytes = blocks::cg_block(
        RECORD_ID as u64,
        CG_FLAGS_BUS_EVENT | CG_FLAGS_PLAIN_BUS_EVENT,
        RECORD_PAYLOAD_LEN as u32,
        timestamp_cn_addr,
        acquisition_name_addr,
        acquisition_source_addr,
    );
    writer.write_block(&cg_bytes)
}

/// The top-level `CAN_DataFrame` channel: a byte-array covering the whole
/// 13-byte (id+ide+bus_channel+dlc+data) span, whose `componentAddr` link
/// points at the head of the per-field component chain built above.
fn cn_block_composite(name_addr: u64, component_head: u64) -> Vec<u8> {
    let mut data = [0u8; 40];
    data[2] = DATA_TYPE_BYTE_ARRAY;
    data[4..8].copy_from_slice(&6u32.to_le_bytes()); // byte offset
    data[8..12].copy_from_slice(&104u32.to_le_bytes()); // bit length
    data[12..14].copy_from_slice(&CN_FLAGS_BUS_EVENT.to_le_bytes());
    super::block::assemble_block(b"##CN", &[0, component_head, name_addr, 0, 0, 0, 0, 0], &data)
}

/// `CN_FLAGS_NONE` / `MDF_CHANNEL_TYPE_MASTER` channel for the record's
/// time axis; distinct enough from the generic `cn_block` builder (master
/// channel type + time sync + conversion link) to warrant its own helper.
fn cn_block_master(name_addr: u64, next_cn: u64, conversion_addr: u64) -> Vec<u8> {
    let mut data = [0u8; 40];
    data[0] = 0x02; // MDF_CHANNEL_TYPE_MASTER
    data[1] = 0x01; // MDF_SYNC_TYPE_TIME
    data[2] = DATA_TYPE_UNSIGNED_INTEL;
    data[3] = 0; // bit offset
    data[4..8].copy_from_slice(&0u32.to_le_bytes()); // byte offset
    data[8..12].copy_from_slice(&48u32.to_le_bytes()); // bit length
    data[12..14].copy_from_slice(&CN_FLAGS_NONE.to_le_bytes());
    super::block::assemble_block(b"##CN", &[next_cn, 0, name_addr, 0, conversion_addr, 0, 0, 0], &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn config() -> LogConfig {
        LogConfig {
            program_id: "cantoolkit".into(),
            software_version: "1.0".into(),
            hardware_version: "rev-a".into(),
            serial_number: "SN001".into(),
            channel1_baudrate: 500_000,
            channel2_baudrate: 250_000,
            time_start_unix: 1_700_000_000,
            storage_size: 0,
            storage_remaining: 0,
            session_number: 1,
            split_number: 0,
        }
    }

    #[test]
    fn writes_a_complete_log_file() {
        let path = std::env::temp_dir().join(format!("mdf_log_test_{}.mf4", std::process::id()));
        let mut log = CanBusLog::create(&path, &config()).unwrap();

        let frame = Frame::new(0x123, false, false, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        log.write_frame(12_345, 0, &frame).unwrap();
        log.write_frame(23_456, 0, &frame).unwrap();
        log.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..8], b"MDF     ");
        assert!(bytes.len() > 64);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn record_layout_packs_id_and_dlc() {
        let path = std::env::temp_dir().join(format!("mdf_log_record_{}.mf4", std::process::id()));
        let mut log = CanBusLog::create(&path, &config()).unwrap();
        let frame = Frame::new(0x1ABCDEF, true, false, &[0xAA; 4]).unwrap();
        log.write_frame(0, 1, &frame).unwrap();
        log.close().unwrap();
        std::fs::remove_file(&path).ok();
    }
}
