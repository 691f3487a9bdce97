//! JPEG 2000 core coding (Part 1, ISO/IEC 15444-1)
//!
//! The tier-1 pipeline of a tile-component, from samples to packets and back:
//!
//! - `dwt` / `wavelet` / `subband`: 1-D lifting filters (5-3 and 9-7), the
//!   multi-level 2-D transform and the subband tree it operates on.
//! - `component_transform`: DC level shift, RCT and ICT.
//! - `quantization`: Scalar quantization with exponent/mantissa step sizes.
//! - `mq_coder`: The MQ arithmetic coder and the raw (bypass) coder.
//! - `bit_plane_coder`: Context modeling and bit-plane coding of code-blocks.
//! - `codeblock`: Precinct and code-block partition.
//! - `tag_tree` / `bit_io` / `packet`: Packet header coding and progression orders.
//! - `rate_allocator`: Rate-distortion driven quality layers.
//! - `encoder` / `decoder`: Tile-level drivers.

pub mod bit_io;
pub mod bit_plane_coder;
pub mod codeblock;
pub mod component_transform;
pub mod decoder;
pub mod dwt;
pub mod encoder;
pub mod mq_coder;
pub mod packet;
pub mod quantization;
pub mod rate_allocator;
pub mod subband;
pub mod tag_tree;
pub mod tile;
pub mod wavelet;
