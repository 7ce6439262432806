//! Entry extraction: stream an entry's content back through the block
//! codec into an entry output.

use std::io::{Read, Seek, SeekFrom};

use anyhow::{bail, Context, Result};
use tracing::{debug, trace};

use crate::entry::EntryType;
use crate::header::EntryHeader;
use crate::output::EntryOutput;

/// Reads entries out of an archive stream. Decoding runs synchronously on
/// the caller's thread.
pub struct Extracter<'s, R: Read + Seek> {
    source: &'s mut R,
}

impl<'s, R: Read + Seek> Extracter<'s, R> {
    pub fn new(source: &'s mut R) -> Self {
        Self { source }
    }

    /// Extract the entry whose header was read at `pos` into
    /// `entry_output`.
    pub fn extract(
        &mut self,
        pos: u64,
        header: &EntryHeader,
        entry_output: &mut dyn EntryOutput,
    ) -> Result<()> {
        trace!(path = %header.path_lossy(), "extracting");
        self.source
            .seek(SeekFrom::Start(pos + header.encoded_header_size()))
            .context("stream read error")?;

        match header.attributes.entry_type()? {
            EntryType::None | EntryType::RegularFile | EntryType::Directory => {
                let result = self.extract_stream(header, entry_output);
                entry_output.deinit();
                result
            }
            EntryType::Symlink => {
                let target = self.read_symlink_target(header)?;
                debug!(target, "symlink target");
                let result = entry_output
                    .init_symlink(header, &target)
                    .and_then(|()| entry_output.finalize())
                    .context("failed extracting symlink");
                entry_output.deinit();
                result
            }
        }
    }

    fn extract_stream(
        &mut self,
        header: &EntryHeader,
        entry_output: &mut dyn EntryOutput,
    ) -> Result<()> {
        let sink = entry_output
            .init(header)
            .context("failed initializing entry output")?;
        if let Some(sink) = sink {
            let limited = (&mut *self.source).take(header.content_size);
            sqz_codecs::decompress_stream(limited, sink, header.compression)
                .context("failed decoding entry")?;
        }
        entry_output
            .finalize()
            .context("failed finalizing entry output")
    }

    /// The content of a symlink entry is the target path, byte for byte.
    /// A legacy writer appends one NUL; trim it if present.
    fn read_symlink_target(&mut self, header: &EntryHeader) -> Result<String> {
        if header.content_size == 0 {
            bail!("symlink entry with no content");
        }
        let mut bytes = vec![0u8; header.content_size as usize];
        self.source
            .read_exact(&mut bytes)
            .context("input read error")?;
        if bytes.last() == Some(&0) {
            bytes.pop();
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
