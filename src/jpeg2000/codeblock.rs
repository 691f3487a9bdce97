//! Precinct and code-block partition of a tile-component (ISO/IEC 15444-1 B.6, B.7).
//!
//! Precincts are laid on each resolution's canvas at multiples of `2^PP`
//! anchored at the canvas origin. In the subbands of a resolution above 0 the
//! precinct grid is halved. Code-blocks are laid on each subband's canvas at
//! multiples of the code-block size, clipped to the precinct.

use crate::constants::{
    DEFAULT_CODE_BLOCK_DIMENSION, MAX_CODE_BLOCK_AREA, MAX_CODE_BLOCK_DIMENSION,
    MAX_PRECINCT_EXPONENT, MIN_CODE_BLOCK_DIMENSION,
};
use crate::error::{J2kError, Result};
use crate::jpeg2000::subband::SubbandTree;

/// Nominal code-block dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlockSize {
    width: u32,
    height: u32,
}

impl CodeBlockSize {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let valid = |d: u32| {
            d.is_power_of_two() && (MIN_CODE_BLOCK_DIMENSION..=MAX_CODE_BLOCK_DIMENSION).contains(&d)
        };
        if !valid(width) || !valid(height) || width * height > MAX_CODE_BLOCK_AREA {
            return Err(J2kError::InvalidCodeBlockSize { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width_exponent(&self) -> u8 {
        self.width.trailing_zeros() as u8
    }

    pub fn height_exponent(&self) -> u8 {
        self.height.trailing_zeros() as u8
    }
}

impl Default for CodeBlockSize {
    fn default() -> Self {
        Self {
            width: DEFAULT_CODE_BLOCK_DIMENSION,
            height: DEFAULT_CODE_BLOCK_DIMENSION,
        }
    }
}

/// Precinct size exponents `(PPx, PPy)` per resolution, lowest resolution
/// first. Resolutions beyond the list reuse its last entry; an empty list means
/// maximal precincts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrecinctSizes {
    exponents: Vec<(u8, u8)>,
}

impl PrecinctSizes {
    pub fn new(exponents: Vec<(u8, u8)>) -> Result<Self> {
        for (r, &(ppx, ppy)) in exponents.iter().enumerate() {
            if ppx > MAX_PRECINCT_EXPONENT || ppy > MAX_PRECINCT_EXPONENT || (r > 0 && (ppx == 0 || ppy == 0)) {
                return Err(J2kError::InvalidPrecinctSize(ppx, ppy));
            }
        }
        Ok(Self { exponents })
    }

    pub fn for_resolution(&self, r: u8) -> (u8, u8) {
        self.exponents
            .get(r as usize)
            .or(self.exponents.last())
            .copied()
            .unwrap_or((MAX_PRECINCT_EXPONENT, MAX_PRECINCT_EXPONENT))
    }
}

/// A code-block's rectangle in the tile-component buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlockGeometry {
    /// Subband node the block belongs to.
    pub band: usize,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// The code-blocks of one subband inside one precinct, in raster order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecinctBand {
    pub band: usize,
    pub grid_w: u32,
    pub grid_h: u32,
    pub blocks: Vec<CodeBlockGeometry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precinct {
    pub resolution: u8,
    pub index: u32,
    pub bands: Vec<PrecinctBand>,
}

impl Precinct {
    pub fn num_blocks(&self) -> usize {
        self.bands.iter().map(|b| b.blocks.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionLayout {
    pub resolution: u8,
    pub precincts_wide: u32,
    pub precincts_high: u32,
    pub precincts: Vec<Precinct>,
}

// Grid cells of size 2^e covering [x0, x1).
fn cells(x0: u64, x1: u64, e: u8) -> std::ops::Range<u64> {
    if x1 <= x0 {
        return 0..0;
    }
    (x0 >> e)..((x1 - 1) >> e) + 1
}

/// Partitions every resolution of `tree` into precincts and code-blocks.
pub fn partition(
    tree: &SubbandTree,
    block_size: CodeBlockSize,
    precinct_sizes: &PrecinctSizes,
) -> Result<Vec<ResolutionLayout>> {
    let (xcb, ycb) = (block_size.width_exponent(), block_size.height_exponent());
    let mut layouts = Vec::with_capacity(tree.num_levels() as usize + 1);

    for r in 0..=tree.num_levels() {
        let (ppx, ppy) = precinct_sizes.for_resolution(r);
        if r > 0 && (ppx == 0 || ppy == 0) {
            return Err(J2kError::InvalidPrecinctSize(ppx, ppy));
        }
        let res = tree.resolution_node(r).ok_or_else(|| {
            J2kError::InconsistentGeometry(format!("no LL node for resolution {}", r))
        })?;
        let (rx0, ry0) = (u64::from(res.ulcx), u64::from(res.ulcy));
        let gx = cells(rx0, rx0 + u64::from(res.w), ppx);
        let gy = cells(ry0, ry0 + u64::from(res.h), ppy);
        let (bppx, bppy) = if r == 0 { (ppx, ppy) } else { (ppx - 1, ppy - 1) };
        let (bxcb, bycb) = (xcb.min(bppx), ycb.min(bppy));
        let bands = tree.resolution_subbands(r);

        let mut precincts = Vec::new();
        for py in gy.clone() {
            for px in gx.clone() {
                let index = ((py - gy.start) * (gx.end - gx.start) + (px - gx.start)) as u32;
                let mut precinct_bands = Vec::with_capacity(bands.len());
                for &b in &bands {
                    let band = tree.node(b);
                    let (bx0, by0) = (u64::from(band.ulcx), u64::from(band.ulcy));
                    let (bx1, by1) = (bx0 + u64::from(band.w), by0 + u64::from(band.h));
                    let x0 = bx0.max(px << bppx);
                    let x1 = bx1.min((px + 1) << bppx);
                    let y0 = by0.max(py << bppy);
                    let y1 = by1.min((py + 1) << bppy);
                    let cx = cells(x0, x1, bxcb);
                    let cy = cells(y0, y1, bycb);
                    let mut blocks = Vec::new();
                    for cby in cy.clone() {
                        for cbx in cx.clone() {
                            let ux0 = x0.max(cbx << bxcb);
                            let ux1 = x1.min((cbx + 1) << bxcb);
                            let uy0 = y0.max(cby << bycb);
                            let uy1 = y1.min((cby + 1) << bycb);
                            blocks.push(CodeBlockGeometry {
                                band: b,
                                x: band.ulx + (ux0 - bx0) as u32,
                                y: band.uly + (uy0 - by0) as u32,
                                w: (ux1 - ux0) as u32,
                                h: (uy1 - uy0) as u32,
                            });
                        }
                    }
                    precinct_bands.push(PrecinctBand {
                        band: b,
                        grid_w: (cx.end - cx.start) as u32,
                        grid_h: (cy.end - cy.start) as u32,
                        blocks,
                    });
                }
                precincts.push(Precinct {
                    resolution: r,
                    index,
                    bands: precinct_bands,
                });
            }
        }
        layouts.push(ResolutionLayout {
            resolution: r,
            precincts_wide: (gx.end - gx.start) as u32,
            precincts_high: (gy.end - gy.start) as u32,
            precincts,
        });
    }
    Ok(layouts)
}
