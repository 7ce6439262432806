//! Whole-stream Huffman coding for the standalone `Huffman` method: a
//! 257-symbol alphabet (256 literals plus a terminator), 15-bit-limited
//! codes, with the code-length table itself transmitted through the
//! DeflateHuffman RLE layer.

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};

use crate::bitio::{BitDecoder, BitEncoder};
use crate::deflate_huffman;
use crate::huffman::{
    self, encode_sym, find_code_lengths, gen_codes, validate_code_lens, HuffmanTree,
};

/// All possible byte values plus the terminator.
pub const ALPHABET_SIZE: usize = 257;
/// The terminator symbol ending each block.
pub const TERM_SYM: usize = 256;

/// Encode one block: code-length table, then the coded symbols, then the
/// terminator.
pub fn encode_block<W: Write>(bit_encoder: &mut BitEncoder<W>, input: &[u8]) -> Result<()> {
    let mut freqs = [0u64; ALPHABET_SIZE];
    freqs[TERM_SYM] = 1;
    for &byte in input {
        freqs[byte as usize] += 1;
    }

    let mut code_lens = [0u8; ALPHABET_SIZE];
    find_code_lengths(&freqs, huffman::CODE_LEN_LIMIT, &mut code_lens)?;
    debug_assert!(validate_code_lens(&code_lens, huffman::CODE_LEN_LIMIT));
    let codes = gen_codes(&code_lens);

    deflate_huffman::encode_code_lens(bit_encoder, &code_lens)
        .context("failed encoding code lengths")?;

    for &byte in input {
        encode_sym(bit_encoder, &codes, &code_lens, byte as usize)?;
    }
    encode_sym(bit_encoder, &codes, &code_lens, TERM_SYM)
}

/// Decode one block up to its terminator, appending the symbols to `out`.
pub fn decode_block<R: Read>(bit_decoder: &mut BitDecoder<R>, out: &mut Vec<u8>) -> Result<()> {
    let mut code_lens = [0u8; ALPHABET_SIZE];
    deflate_huffman::decode_code_lens(bit_decoder, &mut code_lens)
        .context("failed decoding code lengths")?;
    if !validate_code_lens(&code_lens, huffman::CODE_LEN_LIMIT) {
        bail!("invalid code lengths decoded");
    }

    let tree = HuffmanTree::build_from_codes(&gen_codes(&code_lens), &code_lens)
        .context("failed building a Huffman tree")?;

    loop {
        let sym = tree
            .decode_sym(bit_decoder)
            .context("failed decoding a symbol")?;
        if sym as usize == TERM_SYM {
            break;
        }
        out.push(sym as u8);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(input: &[u8]) -> usize {
        let mut enc = BitEncoder::new(Vec::new());
        encode_block(&mut enc, input).unwrap();
        enc.finalize().unwrap();
        let bytes = enc.into_inner();

        let mut dec = BitDecoder::new(bytes.as_slice());
        let mut out = Vec::new();
        decode_block(&mut dec, &mut out).unwrap();
        assert_eq!(out, input);
        bytes.len()
    }

    #[test]
    fn empty_block() {
        roundtrip(b"");
    }

    #[test]
    fn short_text() {
        roundtrip(b"squeeze me");
    }

    #[test]
    fn biased_data_compresses() {
        let input: Vec<u8> = (0..4096).map(|i| if i % 10 == 0 { b'B' } else { b'A' }).collect();
        let compressed = roundtrip(&input);
        assert!(compressed < input.len(), "biased bytes must shrink");
    }

    #[test]
    fn uniform_bytes_roundtrip() {
        let input: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        roundtrip(&input);
    }

    #[test]
    fn consecutive_blocks_share_a_stream() {
        let mut enc = BitEncoder::new(Vec::new());
        encode_block(&mut enc, b"first block").unwrap();
        enc.finalize().unwrap();
        encode_block(&mut enc, b"second block, somewhat longer").unwrap();
        enc.finalize().unwrap();
        let bytes = enc.into_inner();

        let mut dec = BitDecoder::new(bytes.as_slice());
        let mut out = Vec::new();
        decode_block(&mut dec, &mut out).unwrap();
        dec.align();
        decode_block(&mut dec, &mut out).unwrap();
        assert_eq!(out, b"first block".iter().chain(b"second block, somewhat longer").copied().collect::<Vec<u8>>());
    }
}
