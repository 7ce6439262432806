//! The encoder pool: turns (input buffer, compression params) pairs into
//! futures of compressed buffers serviced by the shared worker pool.

use std::io::Read;
use std::sync::mpsc;

use anyhow::{Context, Result};
use sqz_codecs::{block_size, compress_buffer, CompressionParams};
use tracing::trace;

use crate::ioutil::read_chunk;
use crate::pool::ThreadPool;

/// Result of one block compression task.
pub type EncodedBuffer = Result<Vec<u8>>;

/// A one-shot future: the worker sends exactly one [`EncodedBuffer`].
pub type FutureBuffer = mpsc::Receiver<EncodedBuffer>;

/// Schedules block compression on a shared [`ThreadPool`]. The pool has no
/// cancellation: once scheduled, a task always runs to completion of its
/// buffer (the owning `ThreadPool` drains its queue before joining).
pub struct EncoderPool<'p> {
    thread_pool: &'p ThreadPool,
}

impl<'p> EncoderPool<'p> {
    pub fn new(thread_pool: &'p ThreadPool) -> Self {
        Self { thread_pool }
    }

    /// Submit one buffer for compression; the returned future yields the
    /// compressed bytes (or the codec error).
    pub fn schedule_buffer_encode(
        &self,
        input: Vec<u8>,
        compression: CompressionParams,
    ) -> FutureBuffer {
        trace!(len = input.len(), "scheduling buffer encode");
        let (sender, receiver) = mpsc::channel();
        self.thread_pool.execute(move || {
            let result = compress_buffer(&input, compression);
            // the receiver may already be gone after an aborted entry
            let _ = sender.send(result);
        });
        receiver
    }

    /// Split `stream` into block-size chunks, submit each, and hand the
    /// futures to `submit` in read order (which is the output order the
    /// append scheduler preserves). The trailing partial chunk is
    /// submitted too; an empty one is omitted.
    pub fn schedule_stream_encode(
        &self,
        stream: &mut dyn Read,
        compression: CompressionParams,
        submit: &mut dyn FnMut(FutureBuffer),
    ) -> Result<()> {
        let chunk_size = block_size(compression)?;
        let mut chunk = vec![0u8; chunk_size];
        loop {
            let got = read_chunk(stream, &mut chunk).context("input read error")?;
            if got == 0 {
                break;
            }
            submit(self.schedule_buffer_encode(chunk[..got].to_vec(), compression));
            if got < chunk_size {
                break;
            }
        }
        Ok(())
    }
}
