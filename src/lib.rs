pub mod constants;
pub mod context;
pub mod data_block;
pub mod error;
pub mod jpeg2000;
pub mod specs;

pub use context::{CodecContext, ProgressWatch};
pub use data_block::{BlockView, DataBlock};
pub use error::{J2kError, Result};
pub use jpeg2000::decoder::{decode_tile, decode_tiles};
pub use jpeg2000::encoder::{encode_tile, encode_tiles};
pub use jpeg2000::tile::{ComponentGeometry, EncodedTile, TileGeometry, TileInput};
pub use specs::{ComponentInfo, DecoderSpecs, EncoderSpecs, ModuleSpec};
