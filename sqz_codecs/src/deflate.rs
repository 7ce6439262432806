//! Dynamic-Huffman DEFLATE blocks (RFC 1951, `BTYPE = 10` only), built from
//! the LZ77 matcher and the canonical Huffman layer. Stored and
//! fixed-Huffman blocks are not produced or accepted.

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};

use crate::bitio::{BitDecoder, BitEncoder};
use crate::deflate_huffman;
use crate::huffman::{
    self, encode_sym, find_code_lengths, gen_codes, validate_code_lens, HuffmanTree,
};
use crate::lz77::{Lz77Decoder, Lz77Encoder, Lz77EncoderParams, Token, MIN_MATCH};

/// Literals plus the end-of-block terminator.
pub const LITERAL_TERM_ALPHABET_SIZE: usize = 257;
/// Full literal/length alphabet: literals, terminator, 29 length symbols.
pub const LITLEN_ALPHABET_SIZE: usize = 286;
/// Distance alphabet size.
pub const DIST_ALPHABET_SIZE: usize = 30;
/// The end-of-block symbol.
pub const TERM_SYM: u16 = 256;

pub const MAX_LEN_SYM: u8 = 28;
pub const MAX_DIST_SYM: u8 = 29;

// ── Length and distance symbol mapping ─────────────────────────────────────

/// Map a match length (3..=258) to its length symbol and extra bits.
pub fn encode_len(len: usize) -> (u8, u8) {
    debug_assert!((MIN_MATCH..=258).contains(&len));
    let packed = (len - MIN_MATCH) as u32;
    if packed <= 7 {
        return (packed as u8, 0);
    }
    if packed == 255 {
        return (MAX_LEN_SYM, 0);
    }
    let k = (31 - packed.leading_zeros()) - 2;
    let sym = 4 * k + (packed >> k);
    let extra = packed & ((1 << k) - 1);
    (sym as u8, extra as u8)
}

/// Number of extra bits following a length symbol.
pub fn len_extra_bits(len_sym: u8) -> Result<u32> {
    if len_sym > MAX_LEN_SYM {
        bail!("invalid length symbol");
    }
    if len_sym <= 7 || len_sym == MAX_LEN_SYM {
        Ok(0)
    } else {
        Ok(u32::from(len_sym) / 4 - 1)
    }
}

/// Map a length symbol and its extra bits back to a match length.
pub fn decode_len(len_sym: u8, len_extra: u8) -> Result<usize> {
    if len_sym > MAX_LEN_SYM {
        bail!("invalid length symbol");
    }
    if len_sym <= 7 {
        return Ok(len_sym as usize + MIN_MATCH);
    }
    if len_sym == MAX_LEN_SYM {
        return Ok(255 + MIN_MATCH);
    }
    let k = u32::from(len_sym) / 4 - 1;
    if u32::from(len_extra) >= 1 << k {
        bail!("invalid length extra bits");
    }
    let packed = ((u32::from(len_sym) % 4 + 4) << k) + u32::from(len_extra);
    Ok(packed as usize + MIN_MATCH)
}

/// Map a match distance (1..=32768) to its distance symbol and extra bits.
pub fn encode_dist(dist: usize) -> (u8, u16) {
    debug_assert!((1..=32768).contains(&dist));
    let packed = (dist - 1) as u32;
    if packed <= 3 {
        return (packed as u8, 0);
    }
    let k = (31 - packed.leading_zeros()) - 1;
    let sym = 2 * k + (packed >> k);
    let extra = packed & ((1 << k) - 1);
    (sym as u8, extra as u16)
}

/// Number of extra bits following a distance symbol.
pub fn dist_extra_bits(dist_sym: u8) -> Result<u32> {
    if dist_sym > MAX_DIST_SYM {
        bail!("invalid distance symbol");
    }
    if dist_sym <= 1 {
        Ok(0)
    } else {
        Ok(u32::from(dist_sym) / 2 - 1)
    }
}

/// Map a distance symbol and its extra bits back to a match distance.
pub fn decode_dist(dist_sym: u8, dist_extra: u16) -> Result<usize> {
    if dist_sym > MAX_DIST_SYM {
        bail!("invalid distance symbol");
    }
    if dist_sym <= 3 {
        return Ok(dist_sym as usize + 1);
    }
    let k = u32::from(dist_sym) / 2 - 1;
    if u32::from(dist_extra) >= 1 << k {
        bail!("invalid distance extra bits");
    }
    let packed = ((u32::from(dist_sym) % 2 + 2) << k) + u32::from(dist_extra);
    Ok(packed as usize + 1)
}

// ── Packed tokens ──────────────────────────────────────────────────────────

/// LZ77 token packed into 16 bits for the intermediate vector between the
/// LZ77 and Huffman passes.
///
/// | Type      | Bit arrangement                                       |
/// |-----------|-------------------------------------------------------|
/// | None      | `0x6000`                                              |
/// | Len/Dist  | `0x8000 \| len_extra << 10 \| len_sym << 5 \| dist_sym` |
/// | DistExtra | low 13 bits                                           |
/// | Literal   | low 8 bits, top 8 bits zero                           |
///
/// A len/dist pair always occupies two consecutive slots: the header token
/// followed by a dist-extra token.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PackedToken(u16);

const NONE_MARK: u16 = 0x6000;
const LEN_DIST_MARK: u16 = 0x8000;
const SYM_MASK: u16 = 0x1F;
const DIST_EXTRA_MASK: u16 = 0x1FFF;

impl PackedToken {
    pub const fn none() -> Self {
        PackedToken(NONE_MARK)
    }

    pub fn literal(literal: u8) -> Self {
        PackedToken(u16::from(literal))
    }

    pub fn len_dist(len_extra: u8, len_sym: u8, dist_sym: u8) -> Self {
        debug_assert!(len_extra < 32 && len_sym < 32 && dist_sym < 32);
        PackedToken(
            LEN_DIST_MARK
                | (u16::from(len_extra) << 10)
                | (u16::from(len_sym) << 5)
                | u16::from(dist_sym),
        )
    }

    pub fn dist_extra(dist_extra: u16) -> Self {
        PackedToken(dist_extra & DIST_EXTRA_MASK)
    }

    pub fn is_none(self) -> bool {
        self.0 == NONE_MARK
    }

    pub fn is_len_dist(self) -> bool {
        self.0 & LEN_DIST_MARK != 0
    }

    pub fn is_literal(self) -> bool {
        !self.is_len_dist()
    }

    pub fn get_literal(self) -> u8 {
        self.0 as u8
    }

    pub fn get_len_sym(self) -> u8 {
        ((self.0 >> 5) & SYM_MASK) as u8
    }

    pub fn get_len_extra(self) -> u8 {
        ((self.0 >> 10) & SYM_MASK) as u8
    }

    pub fn get_dist_sym(self) -> u8 {
        (self.0 & SYM_MASK) as u8
    }

    pub fn get_dist_extra(self) -> u16 {
        self.0 & DIST_EXTRA_MASK
    }
}

/// Run LZ77 over `input` and pack the token stream.
fn lz77_encode(params: &Lz77EncoderParams, input: &[u8]) -> Vec<PackedToken> {
    let mut encoder = Lz77Encoder::new(*params, input);
    let mut tokens = Vec::new();
    while let Some(token) = encoder.encode_once() {
        match token {
            Token::Literal(literal) => tokens.push(PackedToken::literal(literal)),
            Token::LenDist { len, dist } => {
                let (len_sym, len_extra) = encode_len(len);
                let (dist_sym, dist_extra) = encode_dist(dist);
                tokens.push(PackedToken::len_dist(len_extra, len_sym, dist_sym));
                tokens.push(PackedToken::dist_extra(dist_extra));
            }
        }
    }
    tokens
}

fn count_freqs(
    tokens: &[PackedToken],
) -> ([u64; LITLEN_ALPHABET_SIZE], [u64; DIST_ALPHABET_SIZE]) {
    let mut litlen_freq = [0u64; LITLEN_ALPHABET_SIZE];
    let mut dist_freq = [0u64; DIST_ALPHABET_SIZE];
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if token.is_len_dist() {
            litlen_freq[LITERAL_TERM_ALPHABET_SIZE + token.get_len_sym() as usize] += 1;
            dist_freq[token.get_dist_sym() as usize] += 1;
            i += 2; // skip the dist-extra slot
        } else {
            litlen_freq[token.get_literal() as usize] += 1;
            i += 1;
        }
    }
    // the terminator is always emitted once
    litlen_freq[TERM_SYM as usize] += 1;
    (litlen_freq, dist_freq)
}

fn strip_trailing_zeros(code_lens: &[u8], min_len: usize) -> usize {
    let mut size = code_lens.len();
    while size > min_len && code_lens[size - 1] == 0 {
        size -= 1;
    }
    size
}

/// Encode one dynamic-Huffman DEFLATE block from `input`.
pub fn encode_block<W: Write>(
    bit_encoder: &mut BitEncoder<W>,
    input: &[u8],
    final_block: bool,
    params: &Lz77EncoderParams,
) -> Result<()> {
    let tokens = lz77_encode(params, input);
    let (litlen_freq, dist_freq) = count_freqs(&tokens);

    let mut litlen_lens = [0u8; LITLEN_ALPHABET_SIZE];
    find_code_lengths(&litlen_freq, huffman::CODE_LEN_LIMIT, &mut litlen_lens)?;
    debug_assert!(validate_code_lens(&litlen_lens, huffman::CODE_LEN_LIMIT));

    let mut dist_lens = [0u8; DIST_ALPHABET_SIZE];
    find_code_lengths(&dist_freq, huffman::CODE_LEN_LIMIT, &mut dist_lens)?;
    debug_assert!(validate_code_lens(&dist_lens, huffman::CODE_LEN_LIMIT));

    let nr_litlen_codes = strip_trailing_zeros(&litlen_lens, LITERAL_TERM_ALPHABET_SIZE);
    let nr_dist_codes = strip_trailing_zeros(&dist_lens, 1);

    // 3-bit header: bit 0 = final-block flag, bits 1..2 = block type
    let header = (0b10 << 1) | u64::from(final_block);
    bit_encoder
        .encode_bits(header, 3)
        .context("failed encoding header bits")?;

    bit_encoder.encode_bits((nr_litlen_codes - LITERAL_TERM_ALPHABET_SIZE) as u64, 5)?;
    bit_encoder.encode_bits((nr_dist_codes - 1) as u64, 5)?;

    let mut both_code_lens = Vec::with_capacity(nr_litlen_codes + nr_dist_codes);
    both_code_lens.extend_from_slice(&litlen_lens[..nr_litlen_codes]);
    both_code_lens.extend_from_slice(&dist_lens[..nr_dist_codes]);
    deflate_huffman::encode_code_lens(bit_encoder, &both_code_lens)
        .context("failed encoding code lengths")?;

    let litlen_codes = gen_codes(&litlen_lens);
    let dist_codes = gen_codes(&dist_lens);

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if token.is_len_dist() {
            let extra = tokens[i + 1];
            let len_sym = token.get_len_sym();
            let dist_sym = token.get_dist_sym();

            encode_sym(
                bit_encoder,
                &litlen_codes,
                &litlen_lens,
                LITERAL_TERM_ALPHABET_SIZE + len_sym as usize,
            )?;
            bit_encoder.encode_bits(u64::from(token.get_len_extra()), len_extra_bits(len_sym)?)?;
            encode_sym(bit_encoder, &dist_codes, &dist_lens, dist_sym as usize)?;
            bit_encoder
                .encode_bits(u64::from(extra.get_dist_extra()), dist_extra_bits(dist_sym)?)?;
            i += 2;
        } else {
            encode_sym(bit_encoder, &litlen_codes, &litlen_lens, token.get_literal() as usize)?;
            i += 1;
        }
    }
    encode_sym(bit_encoder, &litlen_codes, &litlen_lens, TERM_SYM as usize)?;
    Ok(())
}

/// Decode one dynamic-Huffman DEFLATE block into `out`.
/// Returns whether the block carried the final-block flag.
pub fn decode_block<R: Read>(
    bit_decoder: &mut BitDecoder<R>,
    out: &mut Lz77Decoder,
) -> Result<bool> {
    let header = bit_decoder
        .decode_bits(3)
        .context("failed decoding header bits")?;
    let final_block = header & 1 != 0;
    if (header >> 1) & 0b11 != 0b10 {
        bail!("unsupported block type");
    }

    let nr_litlen_codes = bit_decoder.decode_bits(5)? as usize + LITERAL_TERM_ALPHABET_SIZE;
    let nr_dist_codes = bit_decoder.decode_bits(5)? as usize + 1;

    let mut both_code_lens = vec![0u8; nr_litlen_codes + nr_dist_codes];
    deflate_huffman::decode_code_lens(bit_decoder, &mut both_code_lens)
        .context("failed decoding code lengths")?;
    let (litlen_lens, dist_lens) = both_code_lens.split_at(nr_litlen_codes);

    if !validate_code_lens(litlen_lens, huffman::CODE_LEN_LIMIT) {
        bail!("invalid literal/length code lengths decoded");
    }
    if !validate_code_lens(dist_lens, huffman::CODE_LEN_LIMIT) {
        bail!("invalid distance code lengths decoded");
    }

    let litlen_tree = HuffmanTree::build_from_codes(&gen_codes(litlen_lens), litlen_lens)?;
    let dist_tree = HuffmanTree::build_from_codes(&gen_codes(dist_lens), dist_lens)?;

    loop {
        let litlen_sym = litlen_tree
            .decode_sym(bit_decoder)
            .context("failed decoding literal/length symbol")?;
        if litlen_sym < TERM_SYM {
            out.push_literal(litlen_sym as u8);
        } else if litlen_sym == TERM_SYM {
            break;
        } else if (litlen_sym as usize) < LITLEN_ALPHABET_SIZE {
            let len_sym = (litlen_sym as usize - LITERAL_TERM_ALPHABET_SIZE) as u8;
            let len_extra = bit_decoder
                .decode_bits(len_extra_bits(len_sym)?)
                .context("failed decoding length extra bits")? as u8;
            let len = decode_len(len_sym, len_extra)?;

            let dist_sym = dist_tree
                .decode_sym(bit_decoder)
                .context("failed decoding distance symbol")?;
            if dist_sym > u16::from(MAX_DIST_SYM) {
                bail!("invalid distance symbol decoded");
            }
            let dist_extra = bit_decoder
                .decode_bits(dist_extra_bits(dist_sym as u8)?)
                .context("failed decoding distance extra bits")?
                as u16;
            let dist = decode_dist(dist_sym as u8, dist_extra)?;

            out.copy_match(len, dist)
                .context("failed decoding LZ77 length/distance pair")?;
        } else {
            bail!("invalid literal/length symbol decoded");
        }
    }
    Ok(final_block)
}
