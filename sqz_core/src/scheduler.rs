//! The append scheduler: serializes the output stream while compression
//! workers run in parallel.
//!
//! Scheduling is single-producer (the appender thread) and the runner is
//! single-consumer (the writer thread). The outer queue carries one task
//! per entry; each entry task owns an inner queue of block tasks the
//! runner drains in order, blocking on futures as needed. The entry
//! header is written first with the scheduled (usually zero) content size
//! and patched once the real compressed size is known.

use std::io::{Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error, trace};

use crate::encoder_pool::FutureBuffer;
use crate::header::EntryHeader;
use crate::pool::TaskQueue;
use crate::status::StatusCell;

/// One scheduled block of an entry's content.
pub enum BlockTask {
    /// Ready bytes; written as-is.
    Buffer(Vec<u8>),
    /// A compression worker's pending output; the runner blocks on it.
    Future(FutureBuffer),
    /// Symlink-target style payload; written as-is.
    String(Vec<u8>),
    /// An error met while scheduling after the entry was already opened;
    /// the runner raises it in order.
    ErrorRaise(anyhow::Error),
}

struct EntryTask {
    header: EntryHeader,
    status: Option<StatusCell>,
    blocks: Arc<TaskQueue<BlockTask>>,
}

/// See the module docs. Dropping the scheduler closes both queues.
pub struct AppendScheduler {
    entries: TaskQueue<EntryTask>,
    last_blocks: Mutex<Option<Arc<TaskQueue<BlockTask>>>>,
}

impl Default for AppendScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl AppendScheduler {
    pub fn new() -> Self {
        Self {
            entries: TaskQueue::new(),
            last_blocks: Mutex::new(None),
        }
    }

    /// Open a new entry append task (finalizing the previous one). Block
    /// tasks scheduled afterwards belong to this entry.
    pub fn schedule_entry_append(&self, header: EntryHeader, status: Option<StatusCell>) {
        trace!(path = %header.path_lossy(), "scheduling entry append");
        self.finalize_entry_append();
        let blocks = Arc::new(TaskQueue::new());
        *self.last_blocks.lock().unwrap() = Some(Arc::clone(&blocks));
        self.entries.push(EntryTask { header, status, blocks });
    }

    /// Schedule raising an error within the current entry. Valid only
    /// between `schedule_entry_append` and `finalize_entry_append`.
    pub fn schedule_error_raise(&self, error: anyhow::Error) {
        self.push_block(BlockTask::ErrorRaise(error));
    }

    pub fn schedule_buffer_append(&self, buffer: Vec<u8>) {
        self.push_block(BlockTask::Buffer(buffer));
    }

    pub fn schedule_future_buffer_append(&self, future_buffer: FutureBuffer) {
        self.push_block(BlockTask::Future(future_buffer));
    }

    pub fn schedule_string_append(&self, bytes: Vec<u8>) {
        self.push_block(BlockTask::String(bytes));
    }

    fn push_block(&self, task: BlockTask) {
        let guard = self.last_blocks.lock().unwrap();
        let blocks = guard
            .as_ref()
            .expect("no entry append scheduled");
        blocks.push(task);
    }

    /// Close the current entry's block queue; its runner finishes after
    /// the already-scheduled blocks.
    pub fn finalize_entry_append(&self) {
        if let Some(blocks) = self.last_blocks.lock().unwrap().take() {
            blocks.close();
        }
    }

    /// Close the outer queue; `run` returns once it drains.
    pub fn finalize(&self) {
        self.finalize_entry_append();
        self.entries.close();
    }

    /// Drain entry tasks into `target`. Meant to run on a dedicated
    /// writer thread in parallel with scheduling. Returns whether every
    /// entry succeeded; per-entry outcomes land in the status cells.
    pub fn run<T: Write + Seek>(&self, target: &mut T) -> bool {
        let mut succeeded = true;
        while let Some(entry) = self.entries.pop() {
            succeeded &= run_entry(target, entry);
        }
        succeeded
    }
}

impl Drop for AppendScheduler {
    fn drop(&mut self) {
        self.finalize();
    }
}

fn run_entry<T: Write + Seek>(target: &mut T, entry: EntryTask) -> bool {
    let EntryTask { header, status, blocks } = entry;
    let path = header.path_lossy().into_owned();
    trace!(path = %path, "appending");

    let result = run_entry_internal(target, header, &blocks)
        .with_context(|| format!("failed appending entry '{path}'"));
    let ok = result.is_ok();
    if let Err(error) = &result {
        error!(path = %path, error = %format!("{error:#}"), "entry append failed");
    }
    if let Some(status) = status {
        status.set(result);
    }
    ok
}

fn run_entry_internal<T: Write + Seek>(
    target: &mut T,
    mut header: EntryHeader,
    blocks: &TaskQueue<BlockTask>,
) -> Result<()> {
    let initial_pos = target.stream_position().context("stream write error")?;
    debug!(initial_pos, "entry start");

    if let Err(error) = EntryHeader::encode(target, &header) {
        rewind(target, initial_pos);
        return Err(error.context("failed encoding the entry header"));
    }
    let content_pos = target.stream_position().context("stream write error")?;

    if let Err(error) = run_blocks(target, blocks) {
        rewind(target, initial_pos);
        return Err(error.context("failed appending content"));
    }

    let final_pos = target.stream_position().context("stream write error")?;
    debug!(final_pos, "entry end");

    header.content_size = final_pos - content_pos;
    if let Err(error) = EntryHeader::rewrite_content_size(target, initial_pos, header.content_size)
    {
        rewind(target, initial_pos);
        return Err(error.context("failed encoding content size"));
    }

    target
        .seek(SeekFrom::Start(final_pos))
        .context("stream write error")?;
    Ok(())
}

fn run_blocks<T: Write + Seek>(target: &mut T, blocks: &TaskQueue<BlockTask>) -> Result<()> {
    while let Some(task) = blocks.pop() {
        match task {
            BlockTask::Buffer(buffer) => {
                trace!(len = buffer.len(), "writing buffer");
                target
                    .write_all(&buffer)
                    .context("failed appending buffer")?;
            }
            BlockTask::Future(future_buffer) => {
                trace!("waiting for an encoded buffer");
                let buffer = future_buffer
                    .recv()
                    .map_err(|_| anyhow!("encoder worker dropped its result"))
                    .and_then(|result| result)
                    .context("buffer encoding failed")?;
                trace!(len = buffer.len(), "writing encoded buffer");
                target
                    .write_all(&buffer)
                    .context("failed appending buffer")?;
            }
            BlockTask::String(bytes) => {
                trace!(len = bytes.len(), "writing string");
                target
                    .write_all(&bytes)
                    .context("failed appending string")?;
            }
            BlockTask::ErrorRaise(error) => {
                return Err(error);
            }
        }
    }
    Ok(())
}

/// Best-effort rewind so a failed entry leaves no partial record behind.
fn rewind<T: Seek>(target: &mut T, pos: u64) {
    if target.seek(SeekFrom::Start(pos)).is_err() {
        error!(pos, "failed rewinding after an append failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryAttributes, EntryPermissions, EntryType};
    use std::io::Cursor;

    fn file_header(path: &[u8]) -> EntryHeader {
        EntryHeader {
            attributes: EntryAttributes::new(
                EntryType::RegularFile,
                EntryPermissions::from_bits(0o644),
            ),
            path: path.to_vec(),
            ..EntryHeader::default()
        }
    }

    #[test]
    fn single_entry_with_buffers_gets_patched_size() {
        let scheduler = AppendScheduler::new();
        let status = StatusCell::new();
        scheduler.schedule_entry_append(file_header(b"f"), Some(status.clone()));
        scheduler.schedule_buffer_append(b"hello ".to_vec());
        scheduler.schedule_buffer_append(b"world".to_vec());
        scheduler.finalize();

        let mut target = Cursor::new(Vec::new());
        assert!(scheduler.run(&mut target));
        assert!(status.take().unwrap().is_ok());

        target.set_position(0);
        let decoded = EntryHeader::decode(&mut target).unwrap();
        assert_eq!(decoded.content_size, 11);
        let mut content = Vec::new();
        std::io::Read::read_to_end(&mut target, &mut content).unwrap();
        assert_eq!(content, b"hello world");
    }

    #[test]
    fn error_raise_aborts_entry_but_not_the_run() {
        let scheduler = AppendScheduler::new();
        let bad = StatusCell::new();
        scheduler.schedule_entry_append(file_header(b"bad"), Some(bad.clone()));
        scheduler.schedule_buffer_append(b"partial".to_vec());
        scheduler.schedule_error_raise(anyhow!("input read error"));

        let good = StatusCell::new();
        scheduler.schedule_entry_append(file_header(b"good"), Some(good.clone()));
        scheduler.schedule_buffer_append(b"ok".to_vec());
        scheduler.finalize();

        let mut target = Cursor::new(Vec::new());
        assert!(!scheduler.run(&mut target));
        assert!(bad.is_err());
        assert!(good.take().unwrap().is_ok());

        // the failed entry was rewound; the good one starts at position 0
        target.set_position(0);
        let decoded = EntryHeader::decode(&mut target).unwrap();
        assert_eq!(decoded.path, b"good");
        assert_eq!(decoded.content_size, 2);
    }

    #[test]
    fn futures_are_awaited_in_order() {
        use crate::encoder_pool::EncoderPool;
        use crate::pool::ThreadPool;
        use sqz_codecs::{CompressionMethod, CompressionParams};

        let pool = ThreadPool::new(4);
        let encoder_pool = EncoderPool::new(&pool);
        let params = CompressionParams::new(CompressionMethod::None, 0);

        let scheduler = AppendScheduler::new();
        scheduler.schedule_entry_append(file_header(b"f"), None);
        // None-method "compression" copies bytes, so order shows through
        for chunk in [b"aaa".to_vec(), b"bbb".to_vec(), b"ccc".to_vec()] {
            let future = encoder_pool.schedule_buffer_encode(chunk, params);
            scheduler.schedule_future_buffer_append(future);
        }
        scheduler.finalize();

        let mut target = Cursor::new(Vec::new());
        assert!(scheduler.run(&mut target));

        target.set_position(0);
        let decoded = EntryHeader::decode(&mut target).unwrap();
        assert_eq!(decoded.content_size, 9);
        let mut content = Vec::new();
        std::io::Read::read_to_end(&mut target, &mut content).unwrap();
        assert_eq!(content, b"aaabbbccc");
    }
}
