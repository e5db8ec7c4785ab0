//! Generic MDF v4.11 block stream writer: 8-byte aligned blocks with a
//! uniform 24-byte header and a link-list of forward addresses, plus a
//! patch mechanism for links that aren't known until a later block has
//! been written.
//!
//! Grounded in `original_source/lib/mdf/mdf_writer.c`
//! (`mdfBlockWrite`'s align-then-write sequence, `mdfRewriteBlockLinkList`'s
//! seek-patch-seek-back pattern, `alignBlock`) and
//! `original_source/lib/mdf/mdf_block.h` (the header's id/length/link-count
//! layout), shaped into the `BlockHeader`/`write_block`/`update_link` split
//! used by `reneherrero-mdf4-rs`'s `blocks/common.rs` and `writer/io.rs`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MdfError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("block {0:?} was never written")]
    UnknownBlock(String),
}

/// Every MDF block header is this many bytes: a 4-byte ASCII id, 4 reserved
/// bytes, an 8-byte total block length, and an 8-byte link count.
pub const HEADER_LEN: u64 = 24;

pub struct BlockHeader {
    pub id: [u8; 4],
    pub length: u64,
    pub link_count: u64,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[0..4].copy_from_slice(&self.id);
        out[8..16].copy_from_slice(&self.length.to_le_bytes());
        out[16..24].copy_from_slice(&self.link_count.to_le_bytes());
        out
    }
}

pub const fn padding_to_align_8(size: u64) -> u64 {
    (8 - (size % 8)) % 8
}

/// Concatenates a block's header, link list, and data section into one
/// buffer ready for `MdfWriter::write_block`. `id` must be exactly 4 ASCII
/// bytes (e.g. `b"##HD"`).
pub fn assemble_block(id: &[u8; 4], links: &[u64], data: &[u8]) -> Vec<u8> {
    let link_count = links.len() as u64;
    let length = HEADER_LEN + link_count * 8 + data.len() as u64;
    let header = BlockHeader {
        id: *id,
        length,
        link_count,
    };

    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(&header.to_bytes());
    for link in links {
        out.extend_from_slice(&link.to_le_bytes());
    }
    out.extend_from_slice(data);
    out
}

/// Sequential MDF block writer. Blocks are appended in forward-reference
/// order (a block's own links are usually not yet known addresses when it
/// is first written); callers tag blocks by name and patch link fields in
/// after the fact with `patch_link`.
pub struct MdfWriter {
    writer: BufWriter<File>,
    offset: u64,
    block_positions: HashMap<String, u64>,
}

impl MdfWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, MdfError> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            offset: 0,
            block_positions: HashMap::new(),
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Writes raw, already-aligned bytes (used only for the 64-byte file
    /// identification block, which precedes the first aligned block).
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), MdfError> {
        self.writer.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Pads to the next 8-byte boundary, then writes `block_bytes`.
    /// Returns the block's start address.
    pub fn write_block(&mut self, block_bytes: &[u8]) -> Result<u64, MdfError> {
        let pad = padding_to_align_8(self.offset);
        if pad != 0 {
            self.writer.write_all(&vec![0u8; pad as usize])?;
            self.offset += pad;
        }

        let start = self.offset;
        self.writer.write_all(block_bytes)?;
        self.offset += block_bytes.len() as u64;
        Ok(start)
    }

    /// Like `write_block`, but remembers the block's address under `tag`
    /// for later `patch_link`/`block_address` lookups.
    pub fn write_block_tagged(&mut self, block_bytes: &[u8], tag: &str) -> Result<u64, MdfError> {
        let addr = self.write_block(block_bytes)?;
        self.block_positions.insert(tag.to_string(), addr);
        Ok(addr)
    }

    pub fn block_address(&self, tag: &str) -> Result<u64, MdfError> {
        self.block_positions
            .get(tag)
            .copied()
            .ok_or_else(|| MdfError::UnknownBlock(tag.to_string()))
    }

    /// Seeks to link index `link_index` of the block tagged `tag`'s link
    /// list, overwrites it with `target_address`, then seeks back to the
    /// end of the stream so appends continue normally.
    pub fn patch_link(&mut self, tag: &str, link_index: u64, target_address: u64) -> Result<(), MdfError> {
        self.patch_u64_at(tag, HEADER_LEN + link_index * 8, target_address)
    }

    /// Overwrites the 8-byte length field of the block tagged `tag` — used
    /// to finalize a `##DT` block whose record count wasn't known until
    /// logging finished.
    pub fn patch_length(&mut self, tag: &str, length: u64) -> Result<(), MdfError> {
        self.patch_u64_at(tag, 8, length)
    }

    fn patch_u64_at(&mut self, tag: &str, offset_in_block: u64, value: u64) -> Result<(), MdfError> {
        let base = self.block_address(tag)?;
        let position = base + offset_in_block;
        let cursor = self.offset;
        self.writer.seek(SeekFrom::Start(position))?;
        self.writer.write_all(&value.to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(cursor))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), MdfError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_sizes_header_correctly() {
        let bytes = assemble_block(b"##TX", &[], b"hello\0");
        assert_eq!(bytes.len(), HEADER_LEN as usize + 6);
        assert_eq!(&bytes[0..4], b"##TX");
        let length = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        assert_eq!(length, bytes.len() as u64);
    }

    #[test]
    fn padding_rounds_up_to_next_multiple_of_8() {
        assert_eq!(padding_to_align_8(0), 0);
        assert_eq!(padding_to_align_8(1), 7);
        assert_eq!(padding_to_align_8(8), 0);
        assert_eq!(padding_to_align_8(17), 7);
    }
}
