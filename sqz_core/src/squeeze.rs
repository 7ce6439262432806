//! The main archive façade: listing, extraction, registered appends and
//! removes, and update-by-path, over one random-access target stream.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom, Write};

use anyhow::{Context, Result};
use tracing::{debug, trace};

use crate::append::Appender;
use crate::extract::Extracter;
use crate::header::EntryHeader;
use crate::input::EntryInput;
use crate::ioutil::Truncate;
use crate::iterator::Entries;
use crate::output::EntryOutput;
use crate::remove::Remover;
use crate::status::StatusCell;

struct PendingAppend {
    input: Box<dyn EntryInput>,
    status: StatusCell,
}

struct PendingRemove {
    pos: u64,
    len: u64,
    path: Vec<u8>,
    status: StatusCell,
}

/// An archive over a random-access stream. The stream's bytes are the
/// whole archive state; there is no separate index.
pub struct Squeeze<'t, T: Read + Write + Seek + Send + Truncate> {
    target: &'t mut T,
    pending_appends: Vec<PendingAppend>,
    pending_removes: Vec<PendingRemove>,
}

impl<'t, T: Read + Write + Seek + Send + Truncate> Squeeze<'t, T> {
    pub fn new(target: &'t mut T) -> Self {
        Self {
            target,
            pending_appends: Vec::new(),
            pending_removes: Vec::new(),
        }
    }

    /// Iterate the entries from the start of the archive.
    pub fn iter(&mut self) -> Entries<'_, T> {
        Entries::new(self.target)
    }

    /// All entries, collected.
    pub fn entries(&mut self) -> Vec<(u64, EntryHeader)> {
        self.iter().collect()
    }

    /// Find the first entry with the given path.
    pub fn find(&mut self, path: &[u8]) -> Option<(u64, EntryHeader)> {
        self.iter().find(|(_, header)| header.path == path)
    }

    /// Extract one entry into the given output.
    pub fn extract(
        &mut self,
        pos: u64,
        header: &EntryHeader,
        output: &mut dyn EntryOutput,
    ) -> Result<()> {
        Extracter::new(self.target).extract(pos, header, output)
    }

    /// Register an append; performed by the next [`write`](Self::write).
    pub fn will_append(&mut self, input: Box<dyn EntryInput>) -> StatusCell {
        let status = StatusCell::new();
        self.pending_appends.push(PendingAppend { input, status: status.clone() });
        status
    }

    /// Register a remove; performed by the next [`write`](Self::write).
    pub fn will_remove(&mut self, pos: u64, header: &EntryHeader) -> StatusCell {
        let status = StatusCell::new();
        self.pending_removes.push(PendingRemove {
            pos,
            len: header.full_encoded_size(),
            path: header.path.clone(),
            status: status.clone(),
        });
        status
    }

    /// Perform the registered operations: removes first in one pass, then
    /// appends at the new end. Returns whether everything succeeded; the
    /// status cells carry per-operation outcomes.
    pub fn write(&mut self) -> Result<bool> {
        trace!(
            nr_removes = self.pending_removes.len(),
            nr_appends = self.pending_appends.len(),
            "writing"
        );
        let mut all_ok = true;

        if !self.pending_removes.is_empty() {
            let mut remover = Remover::new(&mut *self.target);
            for remove in self.pending_removes.drain(..) {
                remover.will_remove_with_status(
                    remove.pos,
                    remove.len,
                    remove.path,
                    remove.status,
                );
            }
            all_ok &= remover.perform_removes()?;
        }

        if !self.pending_appends.is_empty() {
            self.target
                .seek(SeekFrom::End(0))
                .context("stream write error")?;
            let mut appender = Appender::new(&mut *self.target);
            for append in self.pending_appends.drain(..) {
                appender.will_append_with_status(append.input, append.status);
            }
            all_ok &= appender.perform_appends()?;

            // drop the bytes of any trailing rewound entry
            let end = self
                .target
                .stream_position()
                .context("stream write error")?;
            self.target.truncate(end).context("stream write error")?;
        }

        debug!(all_ok, "write finished");
        Ok(all_ok)
    }

    /// Like [`write`](Self::write), but entries already present under a
    /// pending append's path are removed first, so appending an existing
    /// path replaces it. Each pending append consumes at most one
    /// pre-existing entry; duplicate pending paths are all written.
    pub fn update(&mut self) -> Result<bool> {
        let mut by_path: HashMap<Vec<u8>, VecDeque<StatusCell>> = HashMap::new();
        for append in &self.pending_appends {
            by_path
                .entry(append.input.path().to_vec())
                .or_default()
                .push_back(append.status.clone());
        }

        if !by_path.is_empty() {
            let existing = self.entries();
            for (pos, header) in existing {
                let Some(queue) = by_path.get_mut(header.path.as_slice()) else {
                    continue;
                };
                let Some(status) = queue.pop_front() else {
                    continue;
                };
                trace!(path = %header.path_lossy(), "will update");
                self.pending_removes.push(PendingRemove {
                    pos,
                    len: header.full_encoded_size(),
                    path: header.path.clone(),
                    status,
                });
                if queue.is_empty() {
                    by_path.remove(header.path.as_slice());
                }
                if by_path.is_empty() {
                    break;
                }
            }
        }

        self.write()
    }
}
