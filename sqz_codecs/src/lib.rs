pub mod bitio;
pub mod block;
pub mod deflate;
pub mod deflate_huffman;
pub mod huffman;
pub mod huffman15;
pub mod lz77;
pub mod package_merge;

pub use bitio::{BitDecoder, BitEncoder};
pub use block::{
    block_size, compress_buffer, compress_stream, decompress_buffer, decompress_stream,
    validate_params, CompressionMethod, CompressionParams, BLOCK_SIZES_PER_LEVEL,
};
