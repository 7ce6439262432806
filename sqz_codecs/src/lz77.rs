//! LZ77 sliding-window match finder with hash chains and lazy matching.
//!
//! The encoder works over one in-memory block at a time (blocks are at most
//! 128 KiB), so the block itself serves as the search window; candidate
//! positions are absolute indices bounded below by `pos - SEARCH_SIZE`.
//! Hash chains map a 3-byte rolling hash to the most recent position seen
//! with that hash (`head`) and each position to its predecessor on the same
//! chain (`prev`), both modulo the window size.

use anyhow::{bail, Result};

/// Search window size: matches may reach at most this far back.
pub const SEARCH_SIZE: usize = 32768;
/// Longest match emitted.
pub const LOOKAHEAD_SIZE: usize = 258;
/// Shortest match emitted.
pub const MIN_MATCH: usize = 3;

const NO_POS: usize = usize::MAX;

/// Runtime encoder parameters, tied to the compression level.
#[derive(Debug, Clone, Copy)]
pub struct Lz77EncoderParams {
    /// A first-found match at least this long is accepted outright;
    /// shorter ones defer to a lazy probe one position later.
    pub lazy_match_threshold: usize,
    /// Matches longer than this are not inserted into the hash chain.
    pub match_insert_threshold: usize,
}

/// One LZ77 token. A literal is equivalent to `len = 1, dist = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Literal(u8),
    LenDist { len: usize, dist: usize },
}

/// Token-stream encoder over a single input block.
pub struct Lz77Encoder<'a> {
    params: Lz77EncoderParams,
    input: &'a [u8],
    pos: usize,
    head: Vec<usize>,
    prev: Vec<usize>,
    /// Lazy match found one position ahead, emitted on the next call.
    cached: Option<(usize, usize)>,
}

impl<'a> Lz77Encoder<'a> {
    pub fn new(params: Lz77EncoderParams, input: &'a [u8]) -> Self {
        assert!(params.match_insert_threshold > 0, "match insert threshold is 0");
        Self {
            params,
            input,
            pos: 0,
            head: vec![NO_POS; SEARCH_SIZE],
            prev: vec![NO_POS; SEARCH_SIZE],
            cached: None,
        }
    }

    /// Produce the next token, or `None` once the input is consumed.
    pub fn encode_once(&mut self) -> Option<Token> {
        if let Some((len, dist)) = self.cached.take() {
            self.pos += len;
            return Some(Token::LenDist { len, dist });
        }

        if self.pos >= self.input.len() {
            return None;
        }

        let (len, dist) = self.find_longest_match(self.pos);
        if dist == 0 {
            let literal = self.input[self.pos];
            self.pos += 1;
            return Some(Token::Literal(literal));
        }

        if len < self.params.lazy_match_threshold && self.pos + 1 < self.input.len() {
            let (next_len, next_dist) = self.find_longest_match(self.pos + 1);
            if next_dist != 0 && next_len > len {
                // the deferred match wins; emit the first symbol alone
                let literal = self.input[self.pos];
                self.pos += 1;
                self.cached = Some((next_len, next_dist));
                return Some(Token::Literal(literal));
            }
        }

        self.pos += len;
        Some(Token::LenDist { len, dist })
    }

    /// Find the longest, nearest match for the data at `pos`.
    /// Returns `(len, dist)`, with `dist == 0` when no match of at least
    /// `MIN_MATCH` bytes exists.
    fn find_longest_match(&mut self, pos: usize) -> (usize, usize) {
        let input = self.input;
        if input.len() - pos < MIN_MATCH {
            return (0, 0);
        }

        let chain_index = Self::chain_index(&input[pos..pos + MIN_MATCH]);
        let min_pos = pos.saturating_sub(SEARCH_SIZE);
        let max_len = LOOKAHEAD_SIZE.min(input.len() - pos);

        let mut best_len = MIN_MATCH - 1;
        let mut best_dist = 0usize;

        // walk the chain, nearest candidates first; only strictly longer
        // matches replace the current best, so ties keep the nearest
        let mut cand = self.head[chain_index];
        while cand != NO_POS && cand >= min_pos && cand < pos {
            if pos + best_len < input.len()
                && input[cand + best_len] == input[pos + best_len]
            {
                let len = match_len_at(input, cand, pos, max_len);
                if len > best_len {
                    best_len = len;
                    best_dist = pos - cand;
                    if len >= max_len {
                        break;
                    }
                }
            }
            if cand == 0 {
                break;
            }
            cand = self.prev[cand % SEARCH_SIZE];
        }

        // probe distances shorter than MIN_MATCH for overlapping
        // self-matches; equal lengths switch to the smaller distance
        for dist in 1..MIN_MATCH {
            if dist > pos {
                break;
            }
            let len = match_len_at(input, pos - dist, pos, max_len);
            if len >= MIN_MATCH && (len > best_len || (len == best_len && dist < best_dist)) {
                best_len = len;
                best_dist = dist;
            }
        }

        if best_dist == 0 {
            best_len = 0;
        }

        // insert the search position unless the found match is too long to
        // be worth chaining
        let found = if best_dist == 0 { 1 } else { best_len };
        if found <= self.params.match_insert_threshold && self.head[chain_index] != pos {
            self.prev[pos % SEARCH_SIZE] = self.head[chain_index];
            self.head[chain_index] = pos;
        }

        (best_len, best_dist)
    }

    /// 3-byte rolling hash: `key = (key << 5) ^ byte`, modulo the window.
    #[inline]
    fn chain_index(bytes: &[u8]) -> usize {
        let mut key: usize = 0;
        for &byte in &bytes[..MIN_MATCH] {
            key = (key << 5) ^ byte as usize;
        }
        key % SEARCH_SIZE
    }
}

/// Length of the common run of `input[cand..]` and `input[pos..]`, up to
/// `max_len`. `cand < pos`, so the comparison naturally handles overlapping
/// matches (the RLE case `dist < len`).
#[inline]
fn match_len_at(input: &[u8], cand: usize, pos: usize, max_len: usize) -> usize {
    let mut len = 0;
    while len < max_len && input[cand + len] == input[pos + len] {
        len += 1;
    }
    len
}

/// Token-stream decoder: a copy-with-overlap engine over a growing output
/// buffer.
#[derive(Default)]
pub struct Lz77Decoder {
    out: Vec<u8>,
}

impl Lz77Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push_literal(&mut self, literal: u8) {
        self.out.push(literal);
    }

    /// Copy `len` bytes starting `dist` bytes behind the current output
    /// end. `dist` may be smaller than `len` (overlapping copy).
    pub fn copy_match(&mut self, len: usize, dist: usize) -> Result<()> {
        if dist == 0 || dist > self.out.len() {
            bail!("distance points before start of data");
        }
        if dist > SEARCH_SIZE {
            bail!("invalid distance that points further behind data");
        }
        let mut src = self.out.len() - dist;
        for _ in 0..len {
            let byte = self.out[src];
            self.out.push(byte);
            src += 1;
        }
        Ok(())
    }

    pub fn decode_once(&mut self, token: Token) -> Result<()> {
        match token {
            Token::Literal(literal) => {
                self.push_literal(literal);
                Ok(())
            }
            Token::LenDist { len, dist } => self.copy_match(len, dist),
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.out
    }

    pub fn into_output(self) -> Vec<u8> {
        self.out
    }
}

/// Per-level lazy-match thresholds (level 0 is fully greedy).
pub const LAZY_MATCH_THRESHOLD_PER_LEVEL: [usize; 9] =
    [0, 32, 64, 96, 128, 160, 192, 224, 256];

/// Per-level match-insert thresholds.
pub const MATCH_INSERT_THRESHOLD_PER_LEVEL: [usize; 9] = [1, 5, 6, 7, 8, 9, 10, 11, 12];

/// Encoder parameters for a compression level (0..=8).
pub fn params_for_level(level: u8) -> Result<Lz77EncoderParams> {
    let level = level as usize;
    if level >= LAZY_MATCH_THRESHOLD_PER_LEVEL.len() {
        bail!("compression level is out of range");
    }
    Ok(Lz77EncoderParams {
        lazy_match_threshold: LAZY_MATCH_THRESHOLD_PER_LEVEL[level],
        match_insert_threshold: MATCH_INSERT_THRESHOLD_PER_LEVEL[level],
    })
}
