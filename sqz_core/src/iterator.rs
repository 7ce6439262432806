//! Sequential entry iteration: decode a header at the current offset,
//! yield `(position, header)`, advance by the entry's full encoded size.

use std::io::{Read, Seek, SeekFrom};

use crate::header::EntryHeader;

/// Iterator over the entries of an archive stream. Iteration ends at the
/// first offset where a header no longer decodes (normally the end of the
/// last full entry).
pub struct Entries<'s, R: Read + Seek> {
    source: &'s mut R,
    pos: u64,
    done: bool,
}

impl<'s, R: Read + Seek> Entries<'s, R> {
    /// Start iterating from the beginning of the stream.
    pub fn new(source: &'s mut R) -> Self {
        Self { source, pos: 0, done: false }
    }

    /// Start iterating from a byte offset (must be an entry boundary).
    pub fn from_position(source: &'s mut R, pos: u64) -> Self {
        Self { source, pos, done: false }
    }
}

impl<R: Read + Seek> Iterator for Entries<'_, R> {
    type Item = (u64, EntryHeader);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.source.seek(SeekFrom::Start(self.pos)).is_err() {
            self.done = true;
            return None;
        }
        let header = match EntryHeader::decode(self.source) {
            Ok(header) => header,
            Err(_) => {
                self.done = true;
                return None;
            }
        };
        let pos = self.pos;
        match pos.checked_add(header.full_encoded_size()) {
            Some(next) => self.pos = next,
            None => self.done = true,
        }
        Some((pos, header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryAttributes, EntryPermissions, EntryType};
    use std::io::{Cursor, Write};

    fn push_entry(buf: &mut Vec<u8>, path: &[u8], content: &[u8]) {
        let header = EntryHeader {
            content_size: content.len() as u64,
            attributes: EntryAttributes::new(
                EntryType::RegularFile,
                EntryPermissions::from_bits(0o644),
            ),
            path: path.to_vec(),
            ..EntryHeader::default()
        };
        EntryHeader::encode(buf, &header).unwrap();
        buf.write_all(content).unwrap();
    }

    #[test]
    fn empty_stream_yields_nothing() {
        let mut cursor = Cursor::new(Vec::new());
        assert_eq!(Entries::new(&mut cursor).count(), 0);
    }

    #[test]
    fn entries_walk_back_to_back_records() {
        let mut buf = Vec::new();
        push_entry(&mut buf, b"one", b"11");
        push_entry(&mut buf, b"two", b"2222");
        push_entry(&mut buf, b"three", b"");

        let mut cursor = Cursor::new(buf);
        let collected: Vec<_> = Entries::new(&mut cursor).collect();
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0].0, 0);
        assert_eq!(collected[0].1.path, b"one");
        assert_eq!(collected[1].0, collected[0].1.full_encoded_size());
        assert_eq!(collected[1].1.path, b"two");
        assert_eq!(collected[2].1.path, b"three");
    }

    #[test]
    fn trailing_garbage_ends_iteration() {
        let mut buf = Vec::new();
        push_entry(&mut buf, b"ok", b"data");
        buf.extend_from_slice(&[0xFFu8; 7]); // not a full header

        let mut cursor = Cursor::new(buf);
        let collected: Vec<_> = Entries::new(&mut cursor).collect();
        assert_eq!(collected.len(), 1);
    }

    #[test]
    fn iteration_is_restartable() {
        let mut buf = Vec::new();
        push_entry(&mut buf, b"a", b"x");
        push_entry(&mut buf, b"b", b"y");
        let mut cursor = Cursor::new(buf);

        let first: Vec<_> = Entries::new(&mut cursor).map(|(_, h)| h.path).collect();
        let second: Vec<_> = Entries::new(&mut cursor).map(|(_, h)| h.path).collect();
        assert_eq!(first, second);
    }
}
