//! Canonical Huffman coding: code-length generation (via package-merge),
//! length validation, canonical code assignment, and an arena-backed decode
//! tree.

use std::io::{Read, Write};

use anyhow::{bail, Result};

use crate::bitio::{BitDecoder, BitEncoder};
use crate::package_merge::package_merge;

/// A canonical code, right-aligned; pairs with a length out of band.
pub type Code = u16;
/// A code length; 0 means the symbol is absent.
pub type CodeLen = u8;

/// Code length limit for the literal/length and distance alphabets.
pub const CODE_LEN_LIMIT: u32 = 15;
/// Code length limit for the code-length alphabet itself.
pub const CODE_LEN_CODE_LEN_LIMIT: u32 = 7;

/// Find optimal code lengths for `freqs`, limited to `limit` bits.
pub fn find_code_lengths(freqs: &[u64], limit: u32, code_lens: &mut [u8]) -> Result<()> {
    package_merge(freqs, limit, code_lens)
}

/// Validate a code length set against a limit. Zero lengths are ignored.
/// A set with at most one non-zero length is valid; otherwise the lengths
/// must describe a full binary tree: sum of 2^(-len) over non-zero lengths
/// equals 1.
pub fn validate_code_lens(code_lens: &[u8], limit: u32) -> bool {
    let mut nr_nonzero = 0usize;
    let mut sum: u64 = 0;
    for &len in code_lens {
        if u32::from(len) > limit {
            return false;
        }
        if len == 0 {
            continue;
        }
        nr_nonzero += 1;
        sum += 1u64 << (limit - u32::from(len));
    }
    nr_nonzero <= 1 || sum == 1u64 << limit
}

/// Generate canonical codes from lengths: sort symbols by (length, index),
/// give the first non-zero-length symbol code 0, and derive each subsequent
/// code as `(prev + 1) << (len - prev_len)`.
pub fn gen_codes(code_lens: &[u8]) -> Vec<Code> {
    let mut codes = vec![0 as Code; code_lens.len()];

    let mut order: Vec<(u8, usize)> = code_lens
        .iter()
        .enumerate()
        .map(|(index, &len)| (len, index))
        .collect();
    order.sort_unstable();

    let mut iter = order.into_iter().skip_while(|&(len, _)| len == 0);
    let Some((mut prev_len, first_index)) = iter.next() else {
        return codes;
    };
    codes[first_index] = 0;

    let mut prev_code: Code = 0;
    for (len, index) in iter {
        let code = (prev_code + 1) << (len - prev_len);
        codes[index] = code;
        prev_code = code;
        prev_len = len;
    }
    codes
}

/// Encode one symbol through the bit encoder using its (code, length) pair.
#[inline]
pub fn encode_sym<W: Write>(
    bit_encoder: &mut BitEncoder<W>,
    codes: &[Code],
    code_lens: &[u8],
    sym: usize,
) -> Result<()> {
    bit_encoder.encode_bits(u64::from(codes[sym]), u32::from(code_lens[sym]))
}

/// Symbol of the sentinel leaf padding out a single-code tree.
pub const SENTINEL_SYMBOL: u16 = u16::MAX;

const NIL: u32 = u32::MAX;

#[derive(Clone, Copy)]
struct Node {
    left: u32,
    right: u32,
    symbol: u16,
}

impl Node {
    const fn new() -> Self {
        Node { left: NIL, right: NIL, symbol: 0 }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.left == NIL && self.right == NIL
    }
}

/// Prefix-code decode tree. Nodes live in an arena vector and refer to each
/// other by index; the tree with zero codes has no root and fails every
/// decode.
pub struct HuffmanTree {
    nodes: Vec<Node>,
    root: Option<u32>,
}

impl HuffmanTree {
    /// Build a decode tree from parallel (code, length) tables. Rejects any
    /// code set where one code is a prefix of another. A tree that ends up
    /// with exactly one code gets a sentinel leaf as the right child of the
    /// root so decoding a stray 1-bit reports an error instead of walking
    /// off the tree.
    pub fn build_from_codes(codes: &[Code], code_lens: &[u8]) -> Result<Self> {
        debug_assert_eq!(codes.len(), code_lens.len());

        let mut tree = HuffmanTree { nodes: Vec::new(), root: None };
        let nr_codes = code_lens.iter().filter(|&&len| len != 0).count();
        if nr_codes == 0 {
            return Ok(tree);
        }

        tree.nodes.push(Node::new());
        tree.root = Some(0);

        for (symbol, (&code, &len)) in codes.iter().zip(code_lens).enumerate() {
            if len != 0 {
                tree.insert(code, len, symbol as u16)?;
            }
        }

        if nr_codes == 1 {
            let root = &tree.nodes[0];
            if root.right == NIL && root.left != NIL && tree.nodes[root.left as usize].is_leaf()
            {
                tree.insert(1, 1, SENTINEL_SYMBOL)?;
            }
        }
        Ok(tree)
    }

    fn insert(&mut self, code: Code, code_len: u8, symbol: u16) -> Result<()> {
        let mut node = 0usize;
        for depth in (0..code_len).rev() {
            let go_right = code >> depth & 1 != 0;
            let child = if go_right {
                self.nodes[node].right
            } else {
                self.nodes[node].left
            };
            let next = if child == NIL {
                let created = self.nodes.len() as u32;
                self.nodes.push(Node::new());
                if go_right {
                    self.nodes[node].right = created;
                } else {
                    self.nodes[node].left = created;
                }
                created
            } else {
                if self.nodes[child as usize].is_leaf() {
                    bail!("attempt to insert a code that is a prefix of another code");
                }
                child
            };
            node = next as usize;
        }
        if !self.nodes[node].is_leaf() {
            bail!("attempt to insert a code that is a prefix of another code");
        }
        self.nodes[node].symbol = symbol;
        Ok(())
    }

    /// Decode one symbol: descend reading one bit per edge, 0 = left,
    /// 1 = right, until a leaf.
    pub fn decode_sym<R: Read>(&self, bit_decoder: &mut BitDecoder<R>) -> Result<u16> {
        let Some(root) = self.root else {
            bail!("failed decoding symbol: empty code tree");
        };
        let mut node = &self.nodes[root as usize];
        while !node.is_leaf() {
            let next = if bit_decoder.read_bit()? {
                node.right
            } else {
                node.left
            };
            if next == NIL {
                bail!("failed decoding symbol");
            }
            node = &self.nodes[next as usize];
        }
        if node.symbol == SENTINEL_SYMBOL {
            bail!("invalid symbol decoded");
        }
        Ok(node.symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}
