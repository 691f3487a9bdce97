//! Tile-level data exchanged with the codestream layer.

use crate::data_block::DataBlock;
use crate::error::{J2kError, Result};
use crate::jpeg2000::codeblock::{CodeBlockSize, PrecinctSizes, ResolutionLayout, partition};
use crate::jpeg2000::dwt::FilterKind;
use crate::jpeg2000::packet::Packet;
use crate::jpeg2000::quantization::QuantizationParams;
use crate::jpeg2000::rate_allocator::LayerOutcome;
use crate::jpeg2000::subband::SubbandTree;

/// Samples of one tile, one block per component. Each block's `ulx`/`uly`
/// is the tile-component's position on the component canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct TileInput {
    pub index: usize,
    pub components: Vec<DataBlock<i32>>,
}

/// Canvas rectangle of a tile-component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentGeometry {
    pub ulx: u32,
    pub uly: u32,
    pub w: u32,
    pub h: u32,
}

impl<T> From<&DataBlock<T>> for ComponentGeometry {
    fn from(block: &DataBlock<T>) -> Self {
        Self {
            ulx: block.ulx,
            uly: block.uly,
            w: block.w,
            h: block.h,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGeometry {
    pub index: usize,
    pub components: Vec<ComponentGeometry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTile {
    pub geometry: TileGeometry,
    pub layers: Vec<LayerOutcome>,
    /// Packets in progression order.
    pub packets: Vec<Packet>,
    /// Quantization table of every component, for the QCD/QCC segments.
    pub quantization: Vec<QuantizationParams>,
}

impl EncodedTile {
    /// Bytes of all packets, SOP/EPH markers included.
    pub fn total_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.bytes).sum()
    }
}

/// Subband tree and precinct partition of one tile-component.
#[derive(Debug, Clone)]
pub struct ComponentLayout {
    pub tree: SubbandTree,
    pub resolutions: Vec<ResolutionLayout>,
}

impl ComponentLayout {
    pub fn new(
        geometry: ComponentGeometry,
        filter: FilterKind,
        levels: u8,
        block_size: CodeBlockSize,
        precinct_sizes: &PrecinctSizes,
    ) -> Result<Self> {
        let tree = SubbandTree::new(geometry.ulx, geometry.uly, geometry.w, geometry.h, levels, filter);
        let resolutions = partition(&tree, block_size, precinct_sizes)?;
        Ok(Self { tree, resolutions })
    }

    /// Number of precincts of every resolution.
    pub fn precinct_counts(&self) -> Vec<u32> {
        self.resolutions
            .iter()
            .map(|r| r.precincts.len() as u32)
            .collect()
    }
}

/// Components under a multiple component transform must share their geometry.
pub fn check_same_geometry(components: &[ComponentGeometry]) -> Result<()> {
    match components {
        [a, b, c, ..] if a != b || a != c => Err(J2kError::InconsistentGeometry(
            "transformed components differ in size".to_string(),
        )),
        _ => Ok(()),
    }
}
