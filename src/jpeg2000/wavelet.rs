//! Multi-level 2-D wavelet transform over a subband tree.
//!
//! Each split node is filtered rows first, then columns, with the 1-D lifting
//! routines of [`crate::jpeg2000::dwt`]. After a line is lifted in place it is
//! de-interleaved so low-pass coefficients occupy the first part of the line
//! and high-pass the rest, which is the layout the subband tree describes.

use crate::data_block::DataBlock;
use crate::jpeg2000::dwt::{Dwt53, Dwt97, FilterKind, low_count};
use crate::jpeg2000::subband::SubbandTree;

type LiftFn<T> = fn(&mut [T], usize, usize, usize, bool);

/// Coefficients of one tile-component, integer for the 5/3 filter and floating
/// point for the 9/7 filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Coefficients {
    Int(DataBlock<i32>),
    Float(DataBlock<f32>),
}

impl Coefficients {
    /// Zero-filled buffer of the representation `filter` works on.
    pub fn zeroed(filter: FilterKind, ulx: u32, uly: u32, w: u32, h: u32) -> Self {
        match filter {
            FilterKind::Reversible53 => Coefficients::Int(DataBlock::new(ulx, uly, w, h)),
            FilterKind::Irreversible97 => Coefficients::Float(DataBlock::new(ulx, uly, w, h)),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Coefficients::Int(b) => b.w,
            Coefficients::Float(b) => b.w,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Coefficients::Int(b) => b.h,
            Coefficients::Float(b) => b.h,
        }
    }
}

/// Forward transform of all levels of `tree`, in place.
pub fn forward(coeffs: &mut Coefficients, tree: &SubbandTree) {
    match coeffs {
        Coefficients::Int(block) => forward_2d(block, tree, Dwt53::analyze),
        Coefficients::Float(block) => forward_2d(block, tree, Dwt97::analyze),
    }
}

/// Inverse transform of all levels of `tree`, in place.
pub fn inverse(coeffs: &mut Coefficients, tree: &SubbandTree) {
    match coeffs {
        Coefficients::Int(block) => inverse_2d(block, tree, Dwt53::synthesize),
        Coefficients::Float(block) => inverse_2d(block, tree, Dwt97::synthesize),
    }
}

fn forward_2d<T: Copy + Default>(block: &mut DataBlock<T>, tree: &SubbandTree, analyze: LiftFn<T>) {
    let mut scratch = Vec::new();
    let scanw = block.scanw;
    for i in tree.split_nodes() {
        let node = tree.node(i);
        let (w, h) = (node.w as usize, node.h as usize);
        for y in node.uly..node.uly + node.h {
            let off = block.index(node.ulx, y);
            analyze(&mut block.data, off, w, 1, node.first_high_x());
            deinterleave(&mut block.data, off, w, 1, node.first_high_x(), &mut scratch);
        }
        for x in node.ulx..node.ulx + node.w {
            let off = block.index(x, node.uly);
            analyze(&mut block.data, off, h, scanw, node.first_high_y());
            deinterleave(&mut block.data, off, h, scanw, node.first_high_y(), &mut scratch);
        }
    }
}

fn inverse_2d<T: Copy + Default>(block: &mut DataBlock<T>, tree: &SubbandTree, synthesize: LiftFn<T>) {
    let mut scratch = Vec::new();
    let scanw = block.scanw;
    for i in tree.split_nodes().into_iter().rev() {
        let node = tree.node(i);
        let (w, h) = (node.w as usize, node.h as usize);
        for x in node.ulx..node.ulx + node.w {
            let off = block.index(x, node.uly);
            interleave(&mut block.data, off, h, scanw, node.first_high_y(), &mut scratch);
            synthesize(&mut block.data, off, h, scanw, node.first_high_y());
        }
        for y in node.uly..node.uly + node.h {
            let off = block.index(node.ulx, y);
            interleave(&mut block.data, off, w, 1, node.first_high_x(), &mut scratch);
            synthesize(&mut block.data, off, w, 1, node.first_high_x());
        }
    }
}

#[inline]
fn is_low(k: usize, first_high: bool) -> bool {
    (k % 2 == 0) != first_high
}

// Interleaved lifting output -> low coefficients first, then high.
fn deinterleave<T: Copy>(
    sig: &mut [T],
    off: usize,
    len: usize,
    step: usize,
    first_high: bool,
    scratch: &mut Vec<T>,
) {
    scratch.clear();
    scratch.extend((0..len).map(|k| sig[off + k * step]));
    let mut lo = 0;
    let mut hi = low_count(len, first_high);
    for (k, &v) in scratch.iter().enumerate() {
        if is_low(k, first_high) {
            sig[off + lo * step] = v;
            lo += 1;
        } else {
            sig[off + hi * step] = v;
            hi += 1;
        }
    }
}

fn interleave<T: Copy>(
    sig: &mut [T],
    off: usize,
    len: usize,
    step: usize,
    first_high: bool,
    scratch: &mut Vec<T>,
) {
    scratch.clear();
    scratch.extend((0..len).map(|k| sig[off + k * step]));
    let n_low = low_count(len, first_high);
    for k in 0..len {
        let src = if is_low(k, first_high) { k / 2 } else { n_low + k / 2 };
        sig[off + k * step] = scratch[src];
    }
}
