//! The appender: registers entry inputs and performs them all at once.
//!
//! `perform_appends` runs a writer thread that drains the append scheduler
//! while the calling thread walks the registered inputs, splitting content
//! streams into blocks and fanning compression out to the worker pool.
//! Entries land in the output in registration order regardless of which
//! worker finishes first.

use std::io::{Seek, Write};

use anyhow::{anyhow, Result};
use sqz_codecs::CompressionMethod;
use tracing::trace;

use crate::encoder_pool::EncoderPool;
use crate::input::{EntryContent, EntryInput};
use crate::ioutil::read_chunk;
use crate::pool::ThreadPool;
use crate::scheduler::AppendScheduler;
use crate::status::StatusCell;

const RAW_COPY_CHUNK_SIZE: usize = 8 << 10;

struct PendingAppend {
    input: Box<dyn EntryInput>,
    status: StatusCell,
}

/// Registers append operations and performs them with a bounded worker
/// pool. The target stream must start positioned at the archive end.
pub struct Appender<'t, T: Write + Seek + Send> {
    target: &'t mut T,
    pending: Vec<PendingAppend>,
    concurrency: usize,
}

impl<'t, T: Write + Seek + Send> Appender<'t, T> {
    pub fn new(target: &'t mut T) -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_concurrency(target, concurrency)
    }

    pub fn with_concurrency(target: &'t mut T, concurrency: usize) -> Self {
        Self {
            target,
            pending: Vec::new(),
            concurrency: concurrency.max(1),
        }
    }

    /// Register a future append. The returned status cell reports this
    /// entry's outcome after [`perform_appends`](Self::perform_appends).
    pub fn will_append(&mut self, input: Box<dyn EntryInput>) -> StatusCell {
        let status = StatusCell::new();
        self.will_append_with_status(input, status.clone());
        status
    }

    /// Register a future append reporting into an existing status cell.
    pub fn will_append_with_status(&mut self, input: Box<dyn EntryInput>, status: StatusCell) {
        trace!(path = %String::from_utf8_lossy(input.path()), "will append");
        self.pending.push(PendingAppend { input, status });
    }

    /// Append a single entry immediately.
    pub fn append(&mut self, input: Box<dyn EntryInput>) -> Result<()> {
        let status = self.will_append(input);
        self.perform_appends()?;
        status
            .take()
            .unwrap_or_else(|| Err(anyhow!("append was never performed")))
    }

    pub fn nr_pending(&self) -> usize {
        self.pending.len()
    }

    /// Perform the registered appends. Returns whether every entry
    /// succeeded; per-entry details are in the status cells. On return the
    /// stream is positioned at the end of the last successfully appended
    /// entry.
    pub fn perform_appends(&mut self) -> Result<bool> {
        if self.pending.is_empty() {
            trace!("no entry to append");
            return Ok(true);
        }

        let pending = std::mem::take(&mut self.pending);
        let scheduler = AppendScheduler::new();
        let thread_pool = ThreadPool::new(self.concurrency);
        let encoder_pool = EncoderPool::new(&thread_pool);
        let target = &mut *self.target;

        let all_ok = std::thread::scope(|scope| {
            // if scheduling unwinds, still close the queues so the writer
            // thread can finish before the scope joins it
            let guard = FinalizeGuard(&scheduler);

            let writer = scope.spawn(|| scheduler.run(target));

            let mut scheduled_ok = true;
            for mut append in pending {
                scheduled_ok &=
                    schedule_append(&scheduler, &encoder_pool, append.input.as_mut(), &append.status);
                append.input.deinit();
            }
            drop(guard); // finalize: no more entries

            let run_ok = writer.join().unwrap_or(false);
            run_ok && scheduled_ok
        });

        trace!(all_ok, "appends performed");
        Ok(all_ok)
    }
}

struct FinalizeGuard<'a>(&'a AppendScheduler);

impl Drop for FinalizeGuard<'_> {
    fn drop(&mut self) {
        self.0.finalize();
    }
}

/// Initialize one entry input and schedule its header and content.
fn schedule_append(
    scheduler: &AppendScheduler,
    encoder_pool: &EncoderPool<'_>,
    input: &mut dyn EntryInput,
    status: &StatusCell,
) -> bool {
    let (header, content) = match input.init() {
        Ok(initialized) => initialized,
        Err(error) => {
            status.set(Err(error.context("failed initializing entry input")));
            return false;
        }
    };
    if let Err(error) = sqz_codecs::validate_params(header.compression) {
        status.set(Err(error.context("failed initializing entry input")));
        return false;
    }

    let compression = header.compression;
    scheduler.schedule_entry_append(header, Some(status.clone()));

    match content {
        EntryContent::None => true,
        EntryContent::String(target) => {
            scheduler.schedule_string_append(target.into_bytes());
            true
        }
        EntryContent::Stream(stream) => {
            if compression.method == CompressionMethod::None {
                schedule_raw_buffer_appends(scheduler, stream)
            } else {
                match encoder_pool.schedule_stream_encode(stream, compression, &mut |future| {
                    scheduler.schedule_future_buffer_append(future)
                }) {
                    Ok(()) => true,
                    Err(error) => {
                        scheduler.schedule_error_raise(error);
                        false
                    }
                }
            }
        }
    }
}

/// `None`-method content goes to the writer as plain chunks.
fn schedule_raw_buffer_appends(
    scheduler: &AppendScheduler,
    stream: &mut dyn std::io::Read,
) -> bool {
    let mut buf = vec![0u8; RAW_COPY_CHUNK_SIZE];
    loop {
        match read_chunk(stream, &mut buf) {
            Ok(0) => return true,
            Ok(n) => {
                scheduler.schedule_buffer_append(buf[..n].to_vec());
                if n < RAW_COPY_CHUNK_SIZE {
                    return true;
                }
            }
            Err(error) => {
                scheduler
                    .schedule_error_raise(anyhow!(error).context("input read error"));
                return false;
            }
        }
    }
}
