//! EBCOT tier-1: bit-plane coding of code-blocks (ISO/IEC 15444-1 Annex D).
//!
//! Each magnitude bit-plane is coded in three passes (significance propagation,
//! magnitude refinement, cleanup), except the most significant one which only
//! gets a cleanup pass. Samples are scanned in stripes of four rows, column by
//! column. The same scanning code drives the encoder and the decoder through
//! the [`SymbolCoder`] trait: an encoder codes the bit it is given, a decoder
//! ignores it and returns the decoded one.

use crate::constants::{FIRST_BYPASS_PASS_INDEX, STRIPE_HEIGHT};
use crate::data_block::BlockView;
use crate::error::{J2kError, Result};
use crate::jpeg2000::mq_coder::{
    CTX_RUN_LENGTH, CTX_UNIFORM, MqDecoder, MqEncoder, PassMark, RawDecoder, RawEncoder,
    Termination,
};
use crate::jpeg2000::subband::Orientation;

// Sample state flags
const SIG: u8 = 1;
const NEG: u8 = 1 << 1;
const VISITED: u8 = 1 << 2;
const REFINED: u8 = 1 << 3;

const SEGMENTATION_SYMBOL: [u8; 4] = [1, 0, 1, 0];

/// Code-block style options (the SPcod code-block style byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodingOptions {
    /// Raw coding of significance and refinement passes from the 5th bit-plane on.
    pub bypass: bool,
    /// Reset the MQ contexts after each pass.
    pub reset_contexts: bool,
    /// Terminate the codeword after each pass.
    pub terminate_each_pass: bool,
    /// Vertically causal context formation.
    pub causal: bool,
    /// Code the segmentation symbol after each cleanup pass.
    pub segmentation_symbols: bool,
    pub termination: Termination,
}

impl CodingOptions {
    /// Whether pass `n` is coded raw.
    pub fn is_raw_pass(&self, n: usize) -> bool {
        self.bypass && n >= FIRST_BYPASS_PASS_INDEX && PassKind::of(n) != PassKind::Cleanup
    }

    /// Whether the codeword is terminated after pass `n`. The last pass of a
    /// block is always terminated as well.
    pub fn terminates_after(&self, n: usize) -> bool {
        self.terminate_each_pass
            || (self.bypass
                && n + 1 >= FIRST_BYPASS_PASS_INDEX
                && PassKind::of(n) != PassKind::Significance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Significance,
    Refinement,
    Cleanup,
}

impl PassKind {
    /// Kind of pass `n` (0 is the cleanup pass of the first bit-plane).
    pub fn of(n: usize) -> Self {
        match n % 3 {
            0 => PassKind::Cleanup,
            1 => PassKind::Significance,
            _ => PassKind::Refinement,
        }
    }
}

/// Number of coding passes of a block with `planes` non-zero bit-planes.
pub fn num_passes(planes: u8) -> usize {
    if planes == 0 {
        0
    } else {
        3 * planes as usize - 2
    }
}

fn pass_plane(planes: u8, n: usize) -> u8 {
    planes - 1 - ((n + 2) / 3) as u8
}

/// What the coder needs to know about the band a code-block belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockParams {
    pub orientation: Orientation,
    /// `M_b`, the number of magnitude bit-planes of the band.
    pub magnitude_bits: u8,
    pub options: CodingOptions,
}

/// How index-domain squared error maps to image-domain distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistortionModel {
    /// `(delta_b * l2_b)^2 * wmse`
    pub weight: f64,
    /// Reversible reconstruction is exact once the last plane is decoded.
    pub reversible: bool,
}

/// Truncation point at the end of a coding pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CodingPass {
    /// Bytes of the block's data needed to decode up to this pass.
    pub length: usize,
    /// Cumulative distortion reduction.
    pub distortion: f64,
    /// The codeword segment ends with this pass.
    pub terminated: bool,
}

/// A point on the convex hull of the rate-distortion curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HullPoint {
    /// Number of passes included.
    pub passes: usize,
    pub length: usize,
    pub slope: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncodedCodeBlock {
    pub w: u32,
    pub h: u32,
    pub data: Vec<u8>,
    pub passes: Vec<CodingPass>,
    /// Missing most significant bit-planes, `M_b - K`.
    pub zero_bitplanes: u8,
}

impl EncodedCodeBlock {
    /// Truncation points on the lower convex hull, with strictly decreasing slopes.
    pub fn hull(&self) -> Vec<HullPoint> {
        let mut hull: Vec<HullPoint> = Vec::new();
        let point = |k: usize| -> (usize, f64) {
            if k == 0 {
                (0, 0.0)
            } else {
                (self.passes[k - 1].length, self.passes[k - 1].distortion)
            }
        };
        for k in 1..=self.passes.len() {
            let (length, distortion) = point(k);
            let last_distortion = hull.last().map_or(0.0, |h| point(h.passes).1);
            if distortion <= last_distortion {
                continue;
            }
            let slope = loop {
                let (base_len, base_dist) = point(hull.last().map_or(0, |h| h.passes));
                let dl = length - base_len;
                let slope = if dl == 0 {
                    f64::INFINITY
                } else {
                    (distortion - base_dist) / dl as f64
                };
                match hull.last() {
                    Some(top) if slope >= top.slope => {
                        hull.pop();
                    }
                    _ => break slope,
                }
            };
            hull.push(HullPoint {
                passes: k,
                length,
                slope,
            });
        }
        hull
    }
}

/// Coded data of one code-block as delivered by the packet layer.
#[derive(Debug, Clone, Copy)]
pub struct CodedBlock<'a> {
    pub w: u32,
    pub h: u32,
    pub zero_bitplanes: u8,
    pub num_passes: usize,
    pub data: &'a [u8],
    /// Length of every codeword segment present in `data`.
    pub segment_lengths: &'a [usize],
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedCodeBlock {
    pub w: u32,
    pub h: u32,
    /// Quantization indices with their decoded most significant bits.
    pub coefficients: Vec<i32>,
    /// Bit-planes left undecoded per sample.
    pub undecoded: Vec<u8>,
}

trait SymbolCoder {
    fn mq(&mut self, bit: u8, cx: usize) -> u8;
    fn raw(&mut self, bit: u8) -> u8;
}

struct Encoders {
    mq: MqEncoder,
    raw: RawEncoder,
}

impl SymbolCoder for Encoders {
    #[inline]
    fn mq(&mut self, bit: u8, cx: usize) -> u8 {
        self.mq.encode(bit, cx);
        bit
    }

    #[inline]
    fn raw(&mut self, bit: u8) -> u8 {
        self.raw.put_bit(bit);
        bit
    }
}

struct Decoders<'a> {
    mq: MqDecoder<'a>,
    raw: RawDecoder<'a>,
}

impl SymbolCoder for Decoders<'_> {
    #[inline]
    fn mq(&mut self, _bit: u8, cx: usize) -> u8 {
        self.mq.decode(cx)
    }

    #[inline]
    fn raw(&mut self, _bit: u8) -> u8 {
        self.raw.read_bit()
    }
}

/// Zero coding context (Table D.1).
fn zero_coding_context(orientation: Orientation, h: u32, v: u32, d: u32) -> usize {
    match orientation {
        Orientation::HH => {
            let hv = (h + v).min(2) as usize;
            match d {
                0 => hv,
                1 => 3 + hv,
                2 => {
                    if hv == 0 {
                        6
                    } else {
                        7
                    }
                }
                _ => 8,
            }
        }
        _ => {
            let (h, v) = if orientation == Orientation::HL {
                (v, h)
            } else {
                (h, v)
            };
            match h {
                0 => match v {
                    0 => d.min(2) as usize,
                    1 => 3,
                    _ => 4,
                },
                1 => {
                    if v > 0 {
                        7
                    } else if d > 0 {
                        6
                    } else {
                        5
                    }
                }
                _ => 8,
            }
        }
    }
}

/// Sign coding context and XOR bit (Table D.3).
fn sign_coding_context(h: i32, v: i32) -> (usize, u8) {
    match (h, v) {
        (1, 1) => (13, 0),
        (1, 0) => (12, 0),
        (1, _) => (11, 0),
        (0, 1) => (10, 0),
        (0, 0) => (9, 0),
        (0, _) => (10, 1),
        (_, 1) => (11, 1),
        (_, 0) => (12, 1),
        _ => (13, 1),
    }
}

struct BlockState {
    w: usize,
    h: usize,
    stride: usize,
    orientation: Orientation,
    causal: bool,
    // Padded by one sample on every side
    flags: Vec<u8>,
    mag: Vec<u32>,
    low_plane: Vec<u8>,
    model: Option<DistortionModel>,
    distortion: f64,
}

impl BlockState {
    fn new(w: usize, h: usize, orientation: Orientation, causal: bool) -> Self {
        let size = (w + 2) * (h + 2);
        Self {
            w,
            h,
            stride: w + 2,
            orientation,
            causal,
            flags: vec![0; size],
            mag: vec![0; size],
            low_plane: vec![0; size],
            model: None,
            distortion: 0.0,
        }
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        (y + 1) * self.stride + x + 1
    }

    #[inline]
    fn sees_below(&self, y: usize) -> bool {
        !(self.causal && y % STRIPE_HEIGHT == STRIPE_HEIGHT - 1)
    }

    #[inline]
    fn sig(&self, i: usize) -> u32 {
        u32::from(self.flags[i] & SIG)
    }

    // Significant horizontal, vertical and diagonal neighbours.
    fn neighbors(&self, s: usize, y: usize) -> (u32, u32, u32) {
        let up = s - self.stride;
        let h = self.sig(s - 1) + self.sig(s + 1);
        let mut v = self.sig(up);
        let mut d = self.sig(up - 1) + self.sig(up + 1);
        if self.sees_below(y) {
            let down = s + self.stride;
            v += self.sig(down);
            d += self.sig(down - 1) + self.sig(down + 1);
        }
        (h, v, d)
    }

    fn zc_context(&self, s: usize, y: usize) -> usize {
        let (h, v, d) = self.neighbors(s, y);
        zero_coding_context(self.orientation, h, v, d)
    }

    fn sc_context(&self, s: usize, y: usize) -> (usize, u8) {
        let contribution = |i: usize| -> i32 {
            match self.flags[i] & (SIG | NEG) {
                SIG => 1,
                f if f == SIG | NEG => -1,
                _ => 0,
            }
        };
        let h = (contribution(s - 1) + contribution(s + 1)).clamp(-1, 1);
        let mut v = contribution(s - self.stride);
        if self.sees_below(y) {
            v += contribution(s + self.stride);
        }
        sign_coding_context(h, v.clamp(-1, 1))
    }

    fn mr_context(&self, s: usize, y: usize) -> usize {
        if self.flags[s] & REFINED != 0 {
            16
        } else {
            let (h, v, d) = self.neighbors(s, y);
            if h + v + d > 0 { 15 } else { 14 }
        }
    }

    #[inline]
    fn bit(&self, s: usize, p: u8) -> u8 {
        ((self.mag[s] >> p) & 1) as u8
    }

    fn reconstruction(&self, known: u32, p: u8, reversible: bool) -> f64 {
        let base = f64::from(known);
        if p > 0 {
            base + f64::from(1u32 << (p - 1))
        } else if reversible {
            base
        } else {
            base + 0.5
        }
    }

    fn account(&mut self, s: usize, p: u8, was_significant: bool) {
        let Some(model) = self.model else {
            return;
        };
        let v = self.mag[s];
        let truth = f64::from(v) + if model.reversible { 0.0 } else { 0.5 };
        let before = if was_significant {
            let q = p + 1;
            truth - self.reconstruction(v >> q << q, q, model.reversible)
        } else {
            truth
        };
        let after = truth - self.reconstruction(v >> p << p, p, model.reversible);
        self.distortion += before * before - after * after;
    }

    fn become_significant<C: SymbolCoder>(&mut self, coder: &mut C, s: usize, y: usize, p: u8, raw: bool) {
        let sign = u8::from(self.flags[s] & NEG != 0);
        let coded = if raw {
            coder.raw(sign)
        } else {
            let (cx, xor) = self.sc_context(s, y);
            coder.mq(sign ^ xor, cx) ^ xor
        };
        self.flags[s] |= SIG;
        if coded == 1 {
            self.flags[s] |= NEG;
        }
        self.mag[s] |= 1 << p;
        self.low_plane[s] = p;
        self.account(s, p, false);
    }

    fn significance_pass<C: SymbolCoder>(&mut self, coder: &mut C, p: u8, raw: bool) {
        for y0 in (0..self.h).step_by(STRIPE_HEIGHT) {
            let y_end = (y0 + STRIPE_HEIGHT).min(self.h);
            for x in 0..self.w {
                for y in y0..y_end {
                    let s = self.index(x, y);
                    if self.flags[s] & SIG != 0 {
                        continue;
                    }
                    let cx = self.zc_context(s, y);
                    if cx == 0 {
                        continue;
                    }
                    let bit = self.bit(s, p);
                    let coded = if raw { coder.raw(bit) } else { coder.mq(bit, cx) };
                    self.flags[s] |= VISITED;
                    if coded == 1 {
                        self.become_significant(coder, s, y, p, raw);
                    }
                }
            }
        }
    }

    fn refinement_pass<C: SymbolCoder>(&mut self, coder: &mut C, p: u8, raw: bool) {
        for y0 in (0..self.h).step_by(STRIPE_HEIGHT) {
            let y_end = (y0 + STRIPE_HEIGHT).min(self.h);
            for x in 0..self.w {
                for y in y0..y_end {
                    let s = self.index(x, y);
                    if self.flags[s] & (SIG | VISITED) != SIG {
                        continue;
                    }
                    let bit = self.bit(s, p);
                    let coded = if raw {
                        coder.raw(bit)
                    } else {
                        let cx = self.mr_context(s, y);
                        coder.mq(bit, cx)
                    };
                    if coded == 1 {
                        self.mag[s] |= 1 << p;
                    }
                    self.flags[s] |= REFINED;
                    self.low_plane[s] = p;
                    self.account(s, p, true);
                }
            }
        }
    }

    fn cleanup_pass<C: SymbolCoder>(&mut self, coder: &mut C, p: u8) {
        for y0 in (0..self.h).step_by(STRIPE_HEIGHT) {
            let y_end = (y0 + STRIPE_HEIGHT).min(self.h);
            for x in 0..self.w {
                let mut y = y0;
                if y_end - y0 == STRIPE_HEIGHT && self.run_length_eligible(x, y0) {
                    let first = (0..STRIPE_HEIGHT)
                        .find(|&k| self.bit(self.index(x, y0 + k), p) == 1)
                        .unwrap_or(STRIPE_HEIGHT);
                    let hit = coder.mq(u8::from(first < STRIPE_HEIGHT), CTX_RUN_LENGTH);
                    if hit == 0 {
                        continue;
                    }
                    let hi = coder.mq(((first >> 1) & 1) as u8, CTX_UNIFORM);
                    let lo = coder.mq((first & 1) as u8, CTX_UNIFORM);
                    let r = usize::from(hi << 1 | lo);
                    let s = self.index(x, y0 + r);
                    self.become_significant(coder, s, y0 + r, p, false);
                    y = y0 + r + 1;
                }
                for y in y..y_end {
                    let s = self.index(x, y);
                    if self.flags[s] & (SIG | VISITED) != 0 {
                        continue;
                    }
                    let cx = self.zc_context(s, y);
                    if coder.mq(self.bit(s, p), cx) == 1 {
                        self.become_significant(coder, s, y, p, false);
                    }
                }
            }
        }
        self.flags.iter_mut().for_each(|f| *f &= !VISITED);
    }

    fn run_length_eligible(&self, x: usize, y0: usize) -> bool {
        (y0..y0 + STRIPE_HEIGHT).all(|y| {
            let s = self.index(x, y);
            self.flags[s] & (SIG | VISITED) == 0 && self.zc_context(s, y) == 0
        })
    }
}

/// Codes a block of quantization indices into an embedded bitstream.
pub fn encode_code_block(
    block: &BlockView<'_, i32>,
    params: &BlockParams,
    model: DistortionModel,
) -> Result<EncodedCodeBlock> {
    let (w, h) = (block.w as usize, block.h as usize);
    let options = params.options;
    let mut state = BlockState::new(w, h, params.orientation, options.causal);
    let mut max = 0u32;
    for y in 0..h {
        for x in 0..w {
            let v = block.get(x as u32, y as u32);
            let s = state.index(x, y);
            state.mag[s] = v.unsigned_abs();
            if v < 0 {
                state.flags[s] |= NEG;
            }
            max = max.max(v.unsigned_abs());
        }
    }
    let planes = (32 - max.leading_zeros()) as u8;
    if planes > params.magnitude_bits {
        return Err(J2kError::InvalidArgument(
            "quantization index exceeds the band's magnitude bit-planes",
        ));
    }
    state.model = Some(model);

    let total = num_passes(planes);
    let mut coder = Encoders {
        mq: MqEncoder::new(options.termination),
        raw: RawEncoder::new(),
    };
    let mut data = Vec::new();
    let mut passes: Vec<CodingPass> = Vec::with_capacity(total);
    let mut pending_mq: Vec<(usize, PassMark)> = Vec::new();
    let mut pending_raw: Vec<(usize, usize)> = Vec::new();

    for n in 0..total {
        let p = pass_plane(planes, n);
        let raw = options.is_raw_pass(n);
        match PassKind::of(n) {
            PassKind::Significance => state.significance_pass(&mut coder, p, raw),
            PassKind::Refinement => state.refinement_pass(&mut coder, p, raw),
            PassKind::Cleanup => {
                state.cleanup_pass(&mut coder, p);
                if options.segmentation_symbols {
                    for bit in SEGMENTATION_SYMBOL {
                        coder.mq(bit, CTX_UNIFORM);
                    }
                }
            }
        }
        passes.push(CodingPass {
            length: 0,
            distortion: state.distortion * model.weight,
            terminated: false,
        });
        if raw {
            pending_raw.push((n, coder.raw.len()));
        } else {
            pending_mq.push((n, coder.mq.mark()));
        }

        if n + 1 == total || options.terminates_after(n) {
            let base = data.len();
            if raw {
                let bytes = coder.raw.terminate();
                for (k, len) in pending_raw.drain(..) {
                    passes[k].length = base + len.min(bytes.len());
                }
                data.extend_from_slice(&bytes);
            } else {
                let marks: Vec<PassMark> = pending_mq.iter().map(|&(_, m)| m).collect();
                let codeword = coder.mq.terminate(&marks[..marks.len() - 1]);
                for (&(k, _), len) in pending_mq.iter().zip(codeword.truncation_lengths) {
                    passes[k].length = base + len;
                }
                pending_mq.clear();
                data.extend_from_slice(&codeword.bytes);
            }
            passes[n].length = data.len();
            passes[n].terminated = true;
        }
        if options.reset_contexts {
            coder.mq.reset_contexts();
        }
    }

    Ok(EncodedCodeBlock {
        w: block.w,
        h: block.h,
        data,
        passes,
        zero_bitplanes: params.magnitude_bits - planes,
    })
}

/// Decodes the first `num_passes` passes of a code-block.
pub fn decode_code_block(coded: &CodedBlock<'_>, params: &BlockParams) -> Result<DecodedCodeBlock> {
    let options = params.options;
    let planes = params
        .magnitude_bits
        .checked_sub(coded.zero_bitplanes)
        .ok_or(J2kError::CorruptCodeBlock(
            "more missing bit-planes than magnitude bit-planes",
        ))?;
    let total = num_passes(planes);
    if coded.num_passes > total {
        return Err(J2kError::CorruptCodeBlock("too many coding passes"));
    }
    if coded.segment_lengths.iter().sum::<usize>() > coded.data.len() {
        return Err(J2kError::CorruptCodeBlock(
            "segment lengths exceed the code-block data",
        ));
    }

    let (w, h) = (coded.w as usize, coded.h as usize);
    let mut state = BlockState::new(w, h, params.orientation, options.causal);
    let mut coder = Decoders {
        mq: MqDecoder::new(&[]),
        raw: RawDecoder::new(&[]),
    };
    let mut segments = coded.segment_lengths.iter();
    let mut offset = 0;
    let mut new_segment = true;

    for n in 0..coded.num_passes {
        let p = pass_plane(planes, n);
        let raw = options.is_raw_pass(n);
        if new_segment {
            let len = *segments
                .next()
                .ok_or(J2kError::CorruptCodeBlock("missing codeword segment length"))?;
            let segment = &coded.data[offset..offset + len];
            offset += len;
            if raw {
                coder.raw = RawDecoder::new(segment);
            } else {
                coder.mq.restart(segment);
            }
        }
        match PassKind::of(n) {
            PassKind::Significance => state.significance_pass(&mut coder, p, raw),
            PassKind::Refinement => state.refinement_pass(&mut coder, p, raw),
            PassKind::Cleanup => {
                state.cleanup_pass(&mut coder, p);
                if options.segmentation_symbols {
                    let mut symbol = [0u8; 4];
                    for s in symbol.iter_mut() {
                        *s = coder.mq.decode(CTX_UNIFORM);
                    }
                    if symbol != SEGMENTATION_SYMBOL {
                        return Err(J2kError::CorruptCodeBlock("segmentation symbol mismatch"));
                    }
                }
            }
        }
        new_segment = n + 1 == total || options.terminates_after(n);
        if new_segment && !raw && options.termination == Termination::Predict {
            coder.mq.check_predictable_termination()?;
        }
        if options.reset_contexts {
            coder.mq.reset_contexts();
        }
    }

    let mut coefficients = Vec::with_capacity(w * h);
    let mut undecoded = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let s = state.index(x, y);
            let mag = state.mag[s] as i32;
            let value = if state.flags[s] & SIG == 0 {
                0
            } else if state.flags[s] & NEG != 0 {
                -mag
            } else {
                mag
            };
            coefficients.push(value);
            undecoded.push(state.low_plane[s]);
        }
    }
    Ok(DecodedCodeBlock {
        w: coded.w,
        h: coded.h,
        coefficients,
        undecoded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_block::DataBlock;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_block(seed: u64, w: u32, h: u32, bits: u32) -> DataBlock<i32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let max = (1i32 << bits) - 1;
        let data = (0..w * h)
            .map(|_| {
                // Mostly small values, like real wavelet coefficients.
                let v = if rng.random_bool(0.2) {
                    rng.random_range(-max..=max)
                } else {
                    rng.random_range(-3..=3)
                };
                v
            })
            .collect();
        DataBlock::from_vec(0, 0, w, h, data).unwrap()
    }

    fn all_options() -> Vec<CodingOptions> {
        let mut out = Vec::new();
        for flags in 0..32u32 {
            for termination in [
                Termination::NearOptimal,
                Termination::Easy,
                Termination::Predict,
                Termination::Full,
            ] {
                out.push(CodingOptions {
                    bypass: flags & 1 != 0,
                    reset_contexts: flags & 2 != 0,
                    terminate_each_pass: flags & 4 != 0,
                    causal: flags & 8 != 0,
                    segmentation_symbols: flags & 16 != 0,
                    termination,
                });
            }
        }
        out
    }

    // Segment lengths a decoder receives when the first `n` passes are kept.
    fn segments_for(enc: &EncodedCodeBlock, n: usize) -> Vec<usize> {
        let mut lengths = Vec::new();
        let mut start = 0;
        for (k, pass) in enc.passes[..n].iter().enumerate() {
            if pass.terminated || k + 1 == n {
                lengths.push(pass.length - start);
                start = pass.length;
            }
        }
        lengths
    }

    fn decode_prefix(enc: &EncodedCodeBlock, params: &BlockParams, n: usize) -> DecodedCodeBlock {
        let segments = segments_for(enc, n);
        let len = if n == 0 { 0 } else { enc.passes[n - 1].length };
        let coded = CodedBlock {
            w: enc.w,
            h: enc.h,
            zero_bitplanes: enc.zero_bitplanes,
            num_passes: n,
            data: &enc.data[..len],
            segment_lengths: &segments,
        };
        decode_code_block(&coded, params).unwrap()
    }

    const MODEL: DistortionModel = DistortionModel {
        weight: 1.0,
        reversible: true,
    };

    #[test]
    fn test_zero_coding_tables() {
        assert_eq!(zero_coding_context(Orientation::LL, 2, 0, 0), 8);
        assert_eq!(zero_coding_context(Orientation::LH, 1, 1, 0), 7);
        assert_eq!(zero_coding_context(Orientation::LL, 0, 0, 3), 2);
        // HL swaps the roles of h and v.
        assert_eq!(zero_coding_context(Orientation::HL, 0, 2, 0), 8);
        assert_eq!(zero_coding_context(Orientation::HL, 2, 0, 0), 4);
        assert_eq!(zero_coding_context(Orientation::HH, 0, 0, 3), 8);
        assert_eq!(zero_coding_context(Orientation::HH, 1, 1, 1), 5);
        assert_eq!(zero_coding_context(Orientation::HH, 0, 0, 0), 0);
        assert_eq!(sign_coding_context(-1, -1), (13, 1));
        assert_eq!(sign_coding_context(0, -1), (10, 1));
    }

    #[test]
    fn test_pass_count_and_zero_planes() {
        let block = DataBlock::from_vec(0, 0, 4, 4, vec![0, 5, 0, 0, 0, 0, -3, 0, 0, 0, 0, 0, 1, 0, 0, 0]).unwrap();
        let params = BlockParams {
            orientation: Orientation::LL,
            magnitude_bits: 9,
            options: CodingOptions::default(),
        };
        let enc = encode_code_block(&block.view(0, 0, 4, 4), &params, MODEL).unwrap();
        assert_eq!(enc.passes.len(), 3 * 3 - 2);
        assert_eq!(enc.zero_bitplanes, 6);
        assert!(enc.passes.last().unwrap().terminated);
        let dec = decode_prefix(&enc, &params, enc.passes.len());
        assert_eq!(dec.coefficients, block.data);
    }

    #[test]
    fn test_all_zero_block_has_no_passes() {
        let block = DataBlock::<i32>::new(0, 0, 8, 8);
        let params = BlockParams {
            orientation: Orientation::HH,
            magnitude_bits: 10,
            options: CodingOptions::default(),
        };
        let enc = encode_code_block(&block.view(0, 0, 8, 8), &params, MODEL).unwrap();
        assert!(enc.passes.is_empty());
        assert!(enc.data.is_empty());
        assert_eq!(enc.zero_bitplanes, 10);
    }

    #[test]
    fn test_roundtrip_all_options() {
        let orientations = [Orientation::LL, Orientation::HL, Orientation::LH, Orientation::HH];
        for (i, options) in all_options().into_iter().enumerate() {
            let (w, h) = [(16, 16), (7, 13), (32, 5), (1, 1)][i % 4];
            let block = random_block(i as u64, w, h, 7);
            let params = BlockParams {
                orientation: orientations[i % 4],
                magnitude_bits: 8,
                options,
            };
            let enc = encode_code_block(&block.view(0, 0, w, h), &params, MODEL).unwrap();
            let dec = decode_prefix(&enc, &params, enc.passes.len());
            assert_eq!(dec.coefficients, block.data, "{:?}", options);
            assert!(dec.undecoded.iter().zip(&dec.coefficients).all(|(&u, &c)| c == 0 || u == 0));
        }
    }

    #[test]
    fn test_truncated_decoding_matches_known_bits() {
        for (i, options) in all_options().into_iter().enumerate().step_by(3) {
            let block = random_block(100 + i as u64, 16, 12, 9);
            let params = BlockParams {
                orientation: Orientation::HL,
                magnitude_bits: 10,
                options,
            };
            let enc = encode_code_block(&block.view(0, 0, 16, 12), &params, MODEL).unwrap();
            assert!(enc.passes.windows(2).all(|p| p[0].length <= p[1].length));
            for n in 1..=enc.passes.len() {
                let dec = decode_prefix(&enc, &params, n);
                for ((&orig, &got), &u) in block.data.iter().zip(&dec.coefficients).zip(&dec.undecoded) {
                    if got != 0 {
                        assert_eq!(orig.signum(), got.signum());
                        assert_eq!(orig.unsigned_abs() >> u, got.unsigned_abs() >> u, "{:?} pass {}", options, n);
                    } else {
                        // Insignificant samples are below the last cleanup plane.
                        let plane = pass_plane(10 - enc.zero_bitplanes, n - 1);
                        assert!(orig.unsigned_abs() < 1 << (plane + 1));
                    }
                }
            }
        }
    }

    #[test]
    fn test_corrupt_predictable_codeword_is_rejected() {
        let mut flips = 0;
        let mut caught = 0;
        for seed in 0..12u64 {
            let options = CodingOptions {
                termination: Termination::Predict,
                terminate_each_pass: seed % 2 == 1,
                ..CodingOptions::default()
            };
            let params = BlockParams {
                orientation: Orientation::HH,
                magnitude_bits: 8,
                options,
            };
            let block = random_block(200 + seed, 16, 16, 7);
            let enc = encode_code_block(&block.view(0, 0, 16, 16), &params, MODEL).unwrap();
            let n = enc.passes.len();
            let decode = |data: &[u8], segments: &[usize]| {
                let coded = CodedBlock {
                    w: enc.w,
                    h: enc.h,
                    zero_bitplanes: enc.zero_bitplanes,
                    num_passes: n,
                    data,
                    segment_lengths: segments,
                };
                decode_code_block(&coded, &params)
            };
            let segments = segments_for(&enc, n);
            assert_eq!(decode(&enc.data, &segments).unwrap().coefficients, block.data);

            // A trailing byte appended to the last codeword.
            let mut longer = enc.data.clone();
            longer.push(0);
            let mut longer_segments = segments.clone();
            *longer_segments.last_mut().unwrap() += 1;
            assert!(matches!(
                decode(&longer, &longer_segments),
                Err(J2kError::TerminationMismatch(_))
            ));

            let last = enc.data.len() - 1;
            for bit in 0..8 {
                let mut corrupt = enc.data.clone();
                corrupt[last] ^= 1 << bit;
                flips += 1;
                match decode(&corrupt, &segments) {
                    Err(J2kError::TerminationMismatch(_)) => caught += 1,
                    Err(e) => panic!("unexpected error {:?}", e),
                    Ok(_) => {}
                }
            }
        }
        assert!(caught * 100 >= flips * 90, "{} of {} corruptions caught", caught, flips);
    }

    #[test]
    fn test_hull_slopes_strictly_decrease() {
        for seed in 0..10u64 {
            let block = random_block(seed, 32, 32, 10);
            let params = BlockParams {
                orientation: Orientation::LH,
                magnitude_bits: 11,
                options: CodingOptions::default(),
            };
            let enc = encode_code_block(&block.view(0, 0, 32, 32), &params, MODEL).unwrap();
            let hull = enc.hull();
            assert!(!hull.is_empty());
            assert!(hull.windows(2).all(|p| p[0].slope > p[1].slope));
            assert!(hull.windows(2).all(|p| p[0].passes < p[1].passes && p[0].length <= p[1].length));
            // Every pass is needed to reach the lossless point.
            assert_eq!(hull.last().unwrap().passes, enc.passes.len());
        }
    }

    #[test]
    fn test_oversized_index_is_rejected() {
        let block = DataBlock::from_vec(0, 0, 2, 2, vec![0, 300, 0, 0]).unwrap();
        let params = BlockParams {
            orientation: Orientation::LL,
            magnitude_bits: 8,
            options: CodingOptions::default(),
        };
        assert!(encode_code_block(&block.view(0, 0, 2, 2), &params, MODEL).is_err());
    }

    #[test]
    fn test_corrupt_pass_count() {
        let params = BlockParams {
            orientation: Orientation::LL,
            magnitude_bits: 3,
            options: CodingOptions::default(),
        };
        let coded = CodedBlock {
            w: 4,
            h: 4,
            zero_bitplanes: 1,
            num_passes: 5,
            data: &[],
            segment_lengths: &[0],
        };
        assert_eq!(
            decode_code_block(&coded, &params),
            Err(J2kError::CorruptCodeBlock("too many coding passes"))
        );
    }

    #[test]
    fn test_bypass_segments() {
        let options = CodingOptions {
            bypass: true,
            ..Default::default()
        };
        assert!(!options.is_raw_pass(9));
        assert!(options.is_raw_pass(10));
        assert!(options.is_raw_pass(11));
        assert!(!options.is_raw_pass(12));
        let ends: Vec<usize> = (0..16).filter(|&n| options.terminates_after(n)).collect();
        assert_eq!(ends, vec![9, 11, 12, 14, 15]);
    }
}
