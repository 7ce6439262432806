//! The RLE-over-code-lengths layer of RFC 1951: code lengths (0..15) are
//! themselves coded with a secondary 7-bit-limited Huffman code over a
//! 19-symbol alphabet, where symbols 16/17/18 denote repetitions.

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};

use crate::bitio::{BitDecoder, BitEncoder};
use crate::huffman::{
    self, encode_sym, find_code_lengths, gen_codes, validate_code_lens, HuffmanTree,
};

pub const CODE_LEN_ALPHABET_SIZE: usize = 19;

/// The code length alphabet in wire order. Symbols 16, 17 and 18 denote
/// repetitions; the rest are literal code lengths.
pub const CODE_LEN_ALPHABET: [u8; CODE_LEN_ALPHABET_SIZE] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Reverse mapping: `CODE_LEN_ALPHABET[CODE_LEN_INDICES[s]] == s`.
pub const CODE_LEN_INDICES: [u8; CODE_LEN_ALPHABET_SIZE] = [
    3, 17, 15, 13, 11, 9, 7, 5, 4, 6, 8, 10, 12, 14, 16, 18, 0, 1, 2,
];

/// At least this many secondary code lengths are always transmitted.
pub const MIN_NR_CODE_LEN_CODES: usize = 4;

/// Iterate `(value, run_length)` over consecutive equal code lengths.
fn runs(code_lens: &[u8]) -> impl Iterator<Item = (u8, usize)> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        if pos >= code_lens.len() {
            return None;
        }
        let value = code_lens[pos];
        let start = pos;
        while pos < code_lens.len() && code_lens[pos] == value {
            pos += 1;
        }
        Some((value, pos - start))
    })
}

/// Count how often each secondary symbol will be emitted for `code_lens`,
/// indexed by alphabet position.
fn count_code_len_freqs(code_lens: &[u8]) -> [u64; CODE_LEN_ALPHABET_SIZE] {
    let mut freqs = [0u64; CODE_LEN_ALPHABET_SIZE];
    let idx = |sym: u8| CODE_LEN_INDICES[sym as usize] as usize;
    for (len, nr_reps) in runs(code_lens) {
        if len == 0 {
            let rem = nr_reps % 138;
            freqs[idx(18)] += (nr_reps / 138) as u64 + u64::from(rem >= 11);
            freqs[idx(17)] += u64::from((3..11).contains(&rem));
            if rem < 3 {
                freqs[idx(0)] += rem as u64;
            }
        } else {
            freqs[idx(len)] += 1;
            let rest = nr_reps - 1;
            freqs[idx(16)] += (rest / 6) as u64 + u64::from(rest % 6 >= 3);
            if rest % 6 < 3 {
                freqs[idx(len)] += (rest % 6) as u64;
            }
        }
    }
    freqs
}

/// Encode a code length sequence: the 4-bit `HCLEN - 4` count, `HCLEN`
/// 3-bit secondary lengths in wire order, then the RLE-coded lengths.
pub fn encode_code_lens<W: Write>(
    bit_encoder: &mut BitEncoder<W>,
    code_lens: &[u8],
) -> Result<()> {
    let freqs = count_code_len_freqs(code_lens);

    let mut clcl = [0u8; CODE_LEN_ALPHABET_SIZE];
    find_code_lengths(&freqs, huffman::CODE_LEN_CODE_LEN_LIMIT, &mut clcl)
        .context("failed finding code lengths for the code length alphabet")?;
    debug_assert!(validate_code_lens(&clcl, huffman::CODE_LEN_CODE_LEN_LIMIT));
    let clc = gen_codes(&clcl);

    let mut clcl_size = CODE_LEN_ALPHABET_SIZE;
    while clcl_size > MIN_NR_CODE_LEN_CODES && clcl[clcl_size - 1] == 0 {
        clcl_size -= 1;
    }

    bit_encoder.encode_bits((clcl_size - MIN_NR_CODE_LEN_CODES) as u64, 4)?;
    for &len in &clcl[..clcl_size] {
        bit_encoder.encode_bits(u64::from(len), 3)?;
    }

    for (len, nr_reps) in runs(code_lens) {
        encode_code_len_run(bit_encoder, &clc, &clcl, len, nr_reps)?;
    }
    Ok(())
}

/// Emit one run of a code length, greedily using the longest legal repeat.
fn encode_code_len_run<W: Write>(
    bit_encoder: &mut BitEncoder<W>,
    clc: &[u16],
    clcl: &[u8],
    len: u8,
    mut nr_reps: usize,
) -> Result<()> {
    let sym = |bit_encoder: &mut BitEncoder<W>, s: u8| {
        encode_sym(bit_encoder, clc, clcl, CODE_LEN_INDICES[s as usize] as usize)
    };

    if len == 0 {
        while nr_reps >= 138 {
            sym(bit_encoder, 18)?;
            bit_encoder.encode_bits(138 - 11, 7)?;
            nr_reps -= 138;
        }
        if nr_reps >= 11 {
            sym(bit_encoder, 18)?;
            bit_encoder.encode_bits((nr_reps - 11) as u64, 7)?;
            nr_reps = 0;
        } else if nr_reps >= 3 {
            sym(bit_encoder, 17)?;
            bit_encoder.encode_bits((nr_reps - 3) as u64, 3)?;
            nr_reps = 0;
        }
    } else {
        sym(bit_encoder, len)?;
        nr_reps -= 1;
        while nr_reps >= 6 {
            sym(bit_encoder, 16)?;
            bit_encoder.encode_bits(6 - 3, 2)?;
            nr_reps -= 6;
        }
        if nr_reps >= 3 {
            sym(bit_encoder, 16)?;
            bit_encoder.encode_bits((nr_reps - 3) as u64, 2)?;
            nr_reps = 0;
        }
    }

    for _ in 0..nr_reps {
        sym(bit_encoder, len)?;
    }
    Ok(())
}

/// Decode `code_lens.len()` code lengths written by [`encode_code_lens`].
pub fn decode_code_lens<R: Read>(
    bit_decoder: &mut BitDecoder<R>,
    code_lens: &mut [u8],
) -> Result<()> {
    let clcl_size = bit_decoder
        .decode_bits(4)
        .context("failed decoding number of code length codes")? as usize
        + MIN_NR_CODE_LEN_CODES;

    let mut clcl = [0u8; CODE_LEN_ALPHABET_SIZE];
    for slot in clcl.iter_mut().take(clcl_size) {
        *slot = bit_decoder
            .decode_bits(3)
            .context("failed decoding code lengths for the code length alphabet")?
            as u8;
    }
    if !validate_code_lens(&clcl, huffman::CODE_LEN_CODE_LEN_LIMIT) {
        bail!("invalid code lengths for the code length alphabet decoded");
    }

    let clc = gen_codes(&clcl);
    let tree = HuffmanTree::build_from_codes(&clc, &clcl)
        .context("failed building the code length tree")?;

    let mut cur_len: u8 = 0;
    let mut i = 0;
    while i < code_lens.len() {
        let sym_idx = tree
            .decode_sym(bit_decoder)
            .context("failed decoding a code length symbol")?;
        let symbol = CODE_LEN_ALPHABET[sym_idx as usize];
        let nr_reps = match symbol {
            16 => bit_decoder.decode_bits(2)? as usize + 3,
            17 => {
                cur_len = 0;
                bit_decoder.decode_bits(3)? as usize + 3
            }
            18 => {
                cur_len = 0;
                bit_decoder.decode_bits(7)? as usize + 11
            }
            len => {
                cur_len = len;
                1
            }
        };
        for _ in 0..nr_reps {
            if i >= code_lens.len() {
                break;
            }
            code_lens[i] = cur_len;
            i += 1;
        }
    }
    Ok(())
}
