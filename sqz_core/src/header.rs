//! The per-entry binary header: little-endian fields written back-to-back,
//! followed by the path bytes and then the compressed content.
//!
//! ```text
//! version:u32 | content_size:u64 | method:u8 | level:u8
//!            | attributes:u16 | path_len:u16 | path[path_len]
//! ```

use std::borrow::Cow;
use std::io::{Read, Seek, SeekFrom, Write};

use anyhow::{bail, Context, Result};
use sqz_codecs::{CompressionMethod, CompressionParams};

use crate::entry::{EntryAttributes, SemVer};

/// Size of the fixed part of an encoded header.
pub const ENCODED_STATIC_SIZE: u64 = 4 + 8 + 1 + 1 + 2 + 2;

/// In-memory form of an entry header. Paths are opaque bytes on the wire,
/// UTF-8 by convention.
#[derive(Debug, Clone, Default)]
pub struct EntryHeader {
    /// Version of the writer that created the entry.
    pub version: SemVer,
    /// Number of content bytes following the header.
    pub content_size: u64,
    pub compression: CompressionParams,
    pub attributes: EntryAttributes,
    pub path: Vec<u8>,
}

impl EntryHeader {
    /// Encoded header size including the path.
    pub fn encoded_header_size(&self) -> u64 {
        ENCODED_STATIC_SIZE + self.path.len() as u64
    }

    /// Full encoded entry size: header plus content.
    pub fn full_encoded_size(&self) -> u64 {
        self.encoded_header_size() + self.content_size
    }

    /// Path for display purposes.
    pub fn path_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }

    /// Encode the header. Fails on over-long paths, unknown attribute type
    /// bits, and sink write errors.
    pub fn encode<W: Write>(output: &mut W, header: &EntryHeader) -> Result<()> {
        if header.path.len() > u16::MAX as usize {
            bail!("path too long");
        }
        header
            .attributes
            .entry_type()
            .context("refusing to encode an entry header")?;

        let mut fixed = [0u8; ENCODED_STATIC_SIZE as usize];
        fixed[0..4].copy_from_slice(&header.version.bits().to_le_bytes());
        fixed[4..12].copy_from_slice(&header.content_size.to_le_bytes());
        fixed[12] = header.compression.method.to_u8();
        fixed[13] = header.compression.level;
        fixed[14..16].copy_from_slice(&header.attributes.bits().to_le_bytes());
        fixed[16..18].copy_from_slice(&(header.path.len() as u16).to_le_bytes());

        output.write_all(&fixed).context("output write error")?;
        output.write_all(&header.path).context("output write error")?;
        Ok(())
    }

    /// Decode a header from the current position. Unknown compression
    /// methods and entry types reject the stream.
    pub fn decode<R: Read>(input: &mut R) -> Result<EntryHeader> {
        let mut fixed = [0u8; ENCODED_STATIC_SIZE as usize];
        input.read_exact(&mut fixed).context("input read error")?;

        let version = SemVer::from_bits(u32::from_le_bytes(fixed[0..4].try_into().unwrap()));
        let content_size = u64::from_le_bytes(fixed[4..12].try_into().unwrap());
        let method = CompressionMethod::from_u8(fixed[12])?;
        let level = fixed[13];
        let attributes =
            EntryAttributes::from_bits(u16::from_le_bytes(fixed[14..16].try_into().unwrap()));
        let path_len = u16::from_le_bytes(fixed[16..18].try_into().unwrap());

        attributes.entry_type()?;

        let mut path = vec![0u8; path_len as usize];
        input.read_exact(&mut path).context("input read error")?;

        Ok(EntryHeader {
            version,
            content_size,
            compression: CompressionParams::new(method, level),
            attributes,
            path,
        })
    }

    /// Overwrite the `content_size` field of a header previously encoded at
    /// `entry_pos`. Used by the append scheduler once the compressed size
    /// is known. Leaves the stream position at the end of the field.
    pub fn rewrite_content_size<T: Write + Seek>(
        target: &mut T,
        entry_pos: u64,
        content_size: u64,
    ) -> Result<()> {
        target
            .seek(SeekFrom::Start(entry_pos + 4))
            .context("output write error")?;
        target
            .write_all(&content_size.to_le_bytes())
            .context("output write error")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryPermissions, EntryType};
    use std::io::Cursor;

    fn sample_header() -> EntryHeader {
        EntryHeader {
            version: SemVer::new(0, 1, 0),
            content_size: 1234,
            compression: CompressionParams::new(CompressionMethod::Deflate, 3),
            attributes: EntryAttributes::new(
                EntryType::RegularFile,
                EntryPermissions::from_bits(0o644),
            ),
            path: b"dir/file.txt".to_vec(),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let header = sample_header();
        let mut buf = Vec::new();
        EntryHeader::encode(&mut buf, &header).unwrap();
        assert_eq!(buf.len() as u64, header.encoded_header_size());

        let decoded = EntryHeader::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded.version, header.version);
        assert_eq!(decoded.content_size, header.content_size);
        assert_eq!(decoded.compression, header.compression);
        assert_eq!(decoded.attributes, header.attributes);
        assert_eq!(decoded.path, header.path);
    }

    #[test]
    fn sizes_add_up() {
        let header = sample_header();
        assert_eq!(ENCODED_STATIC_SIZE, 18);
        assert_eq!(header.encoded_header_size(), 18 + 12);
        assert_eq!(header.full_encoded_size(), 18 + 12 + 1234);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let header = sample_header();
        let mut buf = Vec::new();
        EntryHeader::encode(&mut buf, &header).unwrap();
        buf[12] = 7; // no such method
        assert!(EntryHeader::decode(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let header = sample_header();
        let mut buf = Vec::new();
        EntryHeader::encode(&mut buf, &header).unwrap();
        // overwrite attribute type bits with an out-of-range value
        let bad = EntryAttributes::from_bits(0x7F << 9).bits().to_le_bytes();
        buf[14..16].copy_from_slice(&bad);
        assert!(EntryHeader::decode(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn truncated_header_is_an_error() {
        let header = sample_header();
        let mut buf = Vec::new();
        EntryHeader::encode(&mut buf, &header).unwrap();
        assert!(EntryHeader::decode(&mut &buf[..10]).is_err());
        // path cut short
        assert!(EntryHeader::decode(&mut &buf[..20]).is_err());
    }

    #[test]
    fn rewrite_content_size_patches_in_place() {
        let header = sample_header();
        let mut buf = Cursor::new(Vec::new());
        EntryHeader::encode(&mut buf, &header).unwrap();

        EntryHeader::rewrite_content_size(&mut buf, 0, 999_999).unwrap();
        buf.set_position(0);
        let decoded = EntryHeader::decode(&mut buf).unwrap();
        assert_eq!(decoded.content_size, 999_999);
        assert_eq!(decoded.path, header.path);
    }
}
