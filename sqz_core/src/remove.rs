//! Multi-remove in a single pass: the stretches between removed entries
//! are shifted left in one sweep, then the archive is truncated by the
//! total removed length.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{Read, Seek, SeekFrom, Write};

use anyhow::{anyhow, Context, Result};
use tracing::{trace, warn};

use crate::header::EntryHeader;
use crate::ioutil::{iosmove, Truncate};
use crate::status::StatusCell;

struct FutureRemove {
    pos: u64,
    len: u64,
    path: Vec<u8>,
    status: StatusCell,
}

// min-heap by position
impl Ord for FutureRemove {
    fn cmp(&self, other: &Self) -> Ordering {
        other.pos.cmp(&self.pos)
    }
}

impl PartialOrd for FutureRemove {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FutureRemove {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos
    }
}

impl Eq for FutureRemove {}

/// Registers entry removals and performs them all in one pass.
pub struct Remover<'t, T: Read + Write + Seek + Truncate> {
    target: &'t mut T,
    future_removes: BinaryHeap<FutureRemove>,
}

impl<'t, T: Read + Write + Seek + Truncate> Remover<'t, T> {
    pub fn new(target: &'t mut T) -> Self {
        Self {
            target,
            future_removes: BinaryHeap::new(),
        }
    }

    /// Register removal of the entry whose header sits at `pos`. Returns
    /// the status cell recording this removal's outcome.
    pub fn will_remove(&mut self, pos: u64, header: &EntryHeader) -> StatusCell {
        trace!(path = %header.path_lossy(), pos, "will remove");
        let status = StatusCell::new();
        self.will_remove_with_status(pos, header.full_encoded_size(), header.path.clone(), status.clone());
        status
    }

    /// Register removal of `len` bytes at `pos`, reporting into an
    /// existing status cell (used by update, which shares the cell with
    /// the replacing append).
    pub fn will_remove_with_status(
        &mut self,
        pos: u64,
        len: u64,
        path: Vec<u8>,
        status: StatusCell,
    ) {
        self.future_removes.push(FutureRemove { pos, len, path, status });
    }

    pub fn nr_pending(&self) -> usize {
        self.future_removes.len()
    }

    /// Perform the registered removes. Returns false if any removal
    /// failed; the per-remove status cells carry the details. The target
    /// is truncated to its new size and the stream is left positioned at
    /// the new end.
    pub fn perform_removes(&mut self) -> Result<bool> {
        trace!(nr_removes = self.future_removes.len(), "removing entries");

        let initial_end = self
            .target
            .seek(SeekFrom::End(0))
            .context("stream read error")?;

        let mut gap_len: u64 = 0;
        while let Some(remove) = self.future_removes.pop() {
            // the same position may have been registered more than once;
            // collapse duplicates so the byte range is removed one time
            while let Some(next) = self.future_removes.peek() {
                if next.pos != remove.pos {
                    break;
                }
                warn!(
                    pos = remove.pos,
                    path = %String::from_utf8_lossy(&remove.path),
                    "duplicate remove at the same position"
                );
                let duplicate = self.future_removes.pop().unwrap();
                duplicate.status.set(Ok(()));
            }

            trace!(path = %String::from_utf8_lossy(&remove.path), "removing");

            // shift the data between this gap and the next one to the left
            let mov_pos = remove.pos + remove.len;
            let next_pos = self
                .future_removes
                .peek()
                .map(|next| next.pos)
                .unwrap_or(initial_end)
                .min(initial_end);
            let mov_len = next_pos.saturating_sub(mov_pos);

            if let Err(error) = iosmove(self.target, remove.pos - gap_len, mov_pos, mov_len) {
                let message = format!(
                    "failed removing '{}'",
                    String::from_utf8_lossy(&remove.path)
                );
                remove.status.set(Err(error.context(message.clone())));
                // the stream is in an uncertain state; fail the rest too
                while let Some(pending) = self.future_removes.pop() {
                    pending.status.set(Err(anyhow!("{message}")
                        .context("aborted by an earlier remove failure")));
                }
                return Ok(false);
            }

            gap_len += remove.len;
            remove.status.set(Ok(()));
        }

        let new_end = initial_end - gap_len;
        self.target.truncate(new_end).context("stream write error")?;
        self.target
            .seek(SeekFrom::Start(new_end))
            .context("stream write error")?;
        Ok(true)
    }
}
