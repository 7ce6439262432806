//! Small I/O helpers the archive operations share: in-stream chunk moves
//! and target truncation.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use anyhow::{Context, Result};

const MOVE_CHUNK_SIZE: usize = 8 << 10;

/// Targets whose length can be cut back after removes or failed appends.
pub trait Truncate {
    fn truncate(&mut self, size: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.set_len(size)
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.get_mut().truncate(size as usize);
        Ok(())
    }
}

impl<T: Truncate + ?Sized> Truncate for &mut T {
    fn truncate(&mut self, size: u64) -> io::Result<()> {
        (**self).truncate(size)
    }
}

/// Fill `buf` from `reader`, short only at end of stream.
pub(crate) fn read_chunk(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Move `len` bytes within `target` from `src_pos` down to `dst_pos`
/// (`dst_pos <= src_pos`), chunk by chunk. Forward order keeps overlapping
/// ranges safe.
pub fn iosmove<T: Read + Write + Seek>(
    target: &mut T,
    dst_pos: u64,
    src_pos: u64,
    len: u64,
) -> Result<()> {
    debug_assert!(dst_pos <= src_pos);
    let mut buf = vec![0u8; MOVE_CHUNK_SIZE];
    let mut moved: u64 = 0;
    while moved < len {
        let chunk = ((len - moved) as usize).min(MOVE_CHUNK_SIZE);
        target
            .seek(SeekFrom::Start(src_pos + moved))
            .context("stream read error")?;
        target
            .read_exact(&mut buf[..chunk])
            .context("stream read error")?;
        target
            .seek(SeekFrom::Start(dst_pos + moved))
            .context("stream write error")?;
        target
            .write_all(&buf[..chunk])
            .context("stream write error")?;
        moved += chunk as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_overlapping_ranges_forward() {
        let mut data: Vec<u8> = (0..100u8).collect();
        let expected: Vec<u8> = data[40..90].to_vec();
        let mut cursor = Cursor::new(std::mem::take(&mut data));

        iosmove(&mut cursor, 10, 40, 50).unwrap();
        let out = cursor.into_inner();
        assert_eq!(&out[10..60], &expected[..]);
    }

    #[test]
    fn cursor_truncate() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3, 4, 5]);
        cursor.truncate(2).unwrap();
        assert_eq!(cursor.into_inner(), vec![1, 2]);
    }
}
