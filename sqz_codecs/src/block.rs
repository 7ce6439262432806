//! The per-request compression façade: picks the method, chunks input into
//! fixed-size blocks, and drives the block coders over buffers or streams.
//!
//! Each block is an independently finalized bit stream, so block boundaries
//! always fall on byte boundaries and the decoder re-aligns after every
//! block.

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};

use crate::bitio::{BitDecoder, BitEncoder};
use crate::deflate;
use crate::huffman15;
use crate::lz77::{self, Lz77Decoder};

/// Compression method of an entry, as stored in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    #[default]
    None,
    Huffman,
    Deflate,
}

impl CompressionMethod {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Huffman),
            2 => Ok(CompressionMethod::Deflate),
            _ => bail!("invalid compression method"),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Huffman => 1,
            CompressionMethod::Deflate => 2,
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            CompressionMethod::None => "none",
            CompressionMethod::Huffman => "huffman",
            CompressionMethod::Deflate => "deflate",
        })
    }
}

/// Method plus level, carried in every entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionParams {
    pub method: CompressionMethod,
    pub level: u8,
}

impl CompressionParams {
    pub fn new(method: CompressionMethod, level: u8) -> Self {
        Self { method, level }
    }
}

/// Source bytes per compressed block, by level (Huffman and Deflate).
pub const BLOCK_SIZES_PER_LEVEL: [usize; 9] = [
    4 << 10,
    4 << 10,
    8 << 10,
    16 << 10,
    24 << 10,
    32 << 10,
    48 << 10,
    64 << 10,
    128 << 10,
];

/// Read/write chunk size for the `None` method.
const NONE_CHUNK_SIZE: usize = 8 << 10;

pub fn validate_params(params: CompressionParams) -> Result<()> {
    match params.method {
        CompressionMethod::None => {
            if params.level != 0 {
                bail!("compression level is out of range");
            }
        }
        CompressionMethod::Huffman | CompressionMethod::Deflate => {
            if params.level as usize >= BLOCK_SIZES_PER_LEVEL.len() {
                bail!("compression level is out of range");
            }
        }
    }
    Ok(())
}

/// Source bytes consumed per block (also the encoder pool's chunk size).
pub fn block_size(params: CompressionParams) -> Result<usize> {
    validate_params(params)?;
    Ok(match params.method {
        CompressionMethod::None => NONE_CHUNK_SIZE,
        CompressionMethod::Huffman | CompressionMethod::Deflate => {
            BLOCK_SIZES_PER_LEVEL[params.level as usize]
        }
    })
}

fn encode_one_block<W: Write>(
    sink: W,
    chunk: &[u8],
    final_block: bool,
    params: CompressionParams,
) -> Result<()> {
    let mut bit_encoder = BitEncoder::new(sink);
    match params.method {
        CompressionMethod::Huffman => huffman15::encode_block(&mut bit_encoder, chunk)?,
        CompressionMethod::Deflate => {
            let lz77_params = lz77::params_for_level(params.level)?;
            deflate::encode_block(&mut bit_encoder, chunk, final_block, &lz77_params)?;
        }
        CompressionMethod::None => unreachable!("None is a plain copy"),
    }
    bit_encoder.finalize()?;
    Ok(())
}

/// Compress a whole buffer. A trailing chunk shorter than the block size
/// carries the final-block flag; full chunks do not, and the decoder stops
/// at input exhaustion either way.
pub fn compress_buffer(input: &[u8], params: CompressionParams) -> Result<Vec<u8>> {
    validate_params(params)?;
    if params.method == CompressionMethod::None {
        return Ok(input.to_vec());
    }

    let chunk_size = block_size(params)?;
    let mut out = Vec::new();
    if input.is_empty() {
        return Ok(out);
    }
    for chunk in input.chunks(chunk_size) {
        let final_block = chunk.len() < chunk_size;
        encode_one_block(&mut out, chunk, final_block, params)?;
    }
    Ok(out)
}

/// Compress a stream, block by block. Returns the number of source bytes
/// consumed.
pub fn compress_stream<R: Read + ?Sized, W: Write>(
    reader: &mut R,
    writer: &mut W,
    params: CompressionParams,
) -> Result<u64> {
    validate_params(params)?;
    if params.method == CompressionMethod::None {
        return std::io::copy(reader, writer).context("stream read error");
    }

    let chunk_size = block_size(params)?;
    let mut chunk = vec![0u8; chunk_size];
    let mut total: u64 = 0;
    loop {
        let got = read_chunk(reader, &mut chunk).context("input read error")?;
        if got == 0 {
            break;
        }
        total += got as u64;
        let final_block = got < chunk_size;
        encode_one_block(&mut *writer, &chunk[..got], final_block, params)?;
        if final_block {
            break;
        }
    }
    Ok(total)
}

/// Decompress a stream of blocks into `writer`. The reader must be limited
/// to the entry's `content_size` (the decoder loops until the source is
/// exhausted, or for Deflate until a final block is seen).
pub fn decompress_stream<R: Read, W: Write + ?Sized>(
    reader: R,
    writer: &mut W,
    params: CompressionParams,
) -> Result<()> {
    validate_params(params)?;
    if params.method == CompressionMethod::None {
        let mut reader = reader;
        std::io::copy(&mut reader, writer).context("stream read error")?;
        return Ok(());
    }

    let mut bit_decoder = BitDecoder::new(reader);
    loop {
        if bit_decoder.is_exhausted()? {
            break;
        }
        match params.method {
            CompressionMethod::Huffman => {
                let mut block = Vec::new();
                huffman15::decode_block(&mut bit_decoder, &mut block)?;
                bit_decoder.align();
                writer.write_all(&block).context("output write error")?;
            }
            CompressionMethod::Deflate => {
                let mut block = Lz77Decoder::new();
                let final_block = deflate::decode_block(&mut bit_decoder, &mut block)?;
                bit_decoder.align();
                writer
                    .write_all(block.output())
                    .context("output write error")?;
                if final_block {
                    break;
                }
            }
            CompressionMethod::None => unreachable!(),
        }
    }
    Ok(())
}

/// Decompress a whole buffer.
pub fn decompress_buffer(content: &[u8], params: CompressionParams) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decompress_stream(content, &mut out, params)?;
    Ok(out)
}

/// Fill `buf` from `reader`, short only at end of stream.
fn read_chunk<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
