//! Subband decomposition tree of a tile-component.
//!
//! The tree is stored as an arena: nodes refer to their parent and children by
//! index. The root covers the whole tile-component. Each split produces the
//! four children LL, HL, LH and HH laid out in place (Mallat layout), so the
//! leaves partition the tile-component buffer exactly.

use crate::jpeg2000::dwt::{FilterKind, low_count};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Subband orientation. HL is high-pass horizontally and low-pass vertically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Orientation {
    LL = 0,
    HL = 1,
    LH = 2,
    HH = 3,
}

impl Orientation {
    /// log2 of the nominal range gain of the band.
    pub fn gain_bits(self) -> u8 {
        match self {
            Orientation::LL => 0,
            Orientation::HL | Orientation::LH => 1,
            Orientation::HH => 2,
        }
    }

    pub fn is_horizontal_high(self) -> bool {
        matches!(self, Orientation::HL | Orientation::HH)
    }

    pub fn is_vertical_high(self) -> bool {
        matches!(self, Orientation::LH | Orientation::HH)
    }
}

/// A node of the decomposition tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Subband {
    pub orientation: Orientation,
    /// Resolution level the band contributes to (0 is the lowest).
    pub resolution: u8,
    /// Index in the global subband numbering: a node `i` splits into
    /// `4i` (LL), `4i+1` (HL), `4i+2` (LH) and `4i+3` (HH).
    pub index: u8,
    /// Number of decomposition levels applied to obtain this band.
    pub level: u8,
    /// Position of the band in the tile-component buffer.
    pub ulx: u32,
    pub uly: u32,
    pub w: u32,
    pub h: u32,
    /// Position of the band on its own canvas; the parity picks the lifting phase.
    pub ulcx: u32,
    pub ulcy: u32,
    /// L2 norm of the 2-D synthesis basis function.
    pub l2_norm: f64,
    pub parent: Option<usize>,
    /// LL, HL, LH and HH children of a split node.
    pub children: Option<[usize; 4]>,
}

impl Subband {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn gain_bits(&self) -> u8 {
        self.orientation.gain_bits()
    }

    pub fn area(&self) -> u64 {
        u64::from(self.w) * u64::from(self.h)
    }

    #[inline]
    pub fn first_high_x(&self) -> bool {
        self.ulcx % 2 == 1
    }

    #[inline]
    pub fn first_high_y(&self) -> bool {
        self.ulcy % 2 == 1
    }
}

/// Dyadic decomposition tree in arena form.
#[derive(Debug, Clone, PartialEq)]
pub struct SubbandTree {
    nodes: Vec<Subband>,
    levels: u8,
    filter: FilterKind,
}

impl SubbandTree {
    /// Builds the tree of a `w x h` tile-component whose upper-left sample sits
    /// at canvas position `(ulcx, ulcy)`.
    pub fn new(ulcx: u32, ulcy: u32, w: u32, h: u32, levels: u8, filter: FilterKind) -> Self {
        let mut tree = Self {
            nodes: vec![Subband {
                orientation: Orientation::LL,
                resolution: levels,
                index: 0,
                level: 0,
                ulx: 0,
                uly: 0,
                w,
                h,
                ulcx,
                ulcy,
                l2_norm: 1.0,
                parent: None,
                children: None,
            }],
            levels,
            filter,
        };
        let mut current = 0;
        for _ in 0..levels {
            current = tree.split(current);
        }
        tree
    }

    // Splits node `i` and returns the index of its LL child.
    fn split(&mut self, i: usize) -> usize {
        let parent = self.nodes[i].clone();
        let w_low = low_count(parent.w as usize, parent.first_high_x()) as u32;
        let h_low = low_count(parent.h as usize, parent.first_high_y()) as u32;
        let level = parent.level + 1;
        let base = self.nodes.len();

        let mut children = [0usize; 4];
        for (k, orientation) in [
            Orientation::LL,
            Orientation::HL,
            Orientation::LH,
            Orientation::HH,
        ]
        .into_iter()
        .enumerate()
        {
            let x_high = orientation.is_horizontal_high();
            let y_high = orientation.is_vertical_high();
            let (ulx, w, ulcx) = if x_high {
                (parent.ulx + w_low, parent.w - w_low, parent.ulcx / 2)
            } else {
                (parent.ulx, w_low, parent.ulcx.div_ceil(2))
            };
            let (uly, h, ulcy) = if y_high {
                (parent.uly + h_low, parent.h - h_low, parent.ulcy / 2)
            } else {
                (parent.uly, h_low, parent.ulcy.div_ceil(2))
            };
            let resolution = if orientation == Orientation::LL {
                parent.resolution - 1
            } else {
                parent.resolution
            };
            let l2_norm = self.filter.basis_norm(level, x_high) * self.filter.basis_norm(level, y_high);
            self.nodes.push(Subband {
                orientation,
                resolution,
                index: parent.index.wrapping_mul(4) + u8::from(orientation),
                level,
                ulx,
                uly,
                w,
                h,
                ulcx,
                ulcy,
                l2_norm,
                parent: Some(i),
                children: None,
            });
            children[k] = base + k;
        }
        self.nodes[i].children = Some(children);
        base
    }

    pub fn num_levels(&self) -> u8 {
        self.levels
    }

    pub fn filter(&self) -> FilterKind {
        self.filter
    }

    pub fn root(&self) -> &Subband {
        &self.nodes[0]
    }

    pub fn node(&self, i: usize) -> &Subband {
        &self.nodes[i]
    }

    pub fn nodes(&self) -> &[Subband] {
        &self.nodes
    }

    /// Split nodes from the full resolution down to the last LL split.
    pub fn split_nodes(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| !self.nodes[i].is_leaf())
            .collect()
    }

    /// Leaf indices ordered by resolution, then LL, HL, LH, HH.
    pub fn leaves(&self) -> Vec<usize> {
        let mut leaves: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| self.nodes[i].is_leaf())
            .collect();
        leaves.sort_by_key(|&i| (self.nodes[i].resolution, u8::from(self.nodes[i].orientation)));
        leaves
    }

    /// Leaves contributing to resolution `r`: the LL band for 0, HL/LH/HH otherwise.
    pub fn resolution_subbands(&self, r: u8) -> Vec<usize> {
        self.leaves()
            .into_iter()
            .filter(|&i| self.nodes[i].resolution == r)
            .collect()
    }

    pub fn find(&self, resolution: u8, orientation: Orientation) -> Option<usize> {
        (0..self.nodes.len()).find(|&i| {
            let n = &self.nodes[i];
            n.is_leaf() && n.resolution == resolution && n.orientation == orientation
        })
    }

    /// The LL node whose area is the image reconstructed at resolution `r`.
    pub fn resolution_node(&self, r: u8) -> Option<&Subband> {
        self.nodes
            .iter()
            .find(|n| n.orientation == Orientation::LL && n.resolution == r)
    }
}
