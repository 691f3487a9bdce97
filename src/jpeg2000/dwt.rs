//! Lifting filters for the JPEG 2000 wavelet transform.
//!
//! Every routine works in place on a strided 1-D signal `(sig, off, len, step)`,
//! so rows (`step = 1`) and columns (`step = scanw`) of a 2-D buffer go through
//! the same code. After analysis the samples are interleaved: low-pass
//! coefficients sit on the low-pass phase positions, high-pass on the others.
//! `first_high` is true when the signal starts on an odd canvas coordinate, in
//! which case the first sample belongs to the high-pass band.
//!
//! Boundaries use whole-sample symmetric extension (ISO/IEC 15444-1 F.3.7).

use std::ops::{Add, Mul};

// 9/7 lifting coefficients and scaling factors (ISO/IEC 15444-1 Table F.4).
pub const ALPHA: f32 = -1.586_134_3;
pub const BETA: f32 = -0.052_980_12;
pub const GAMMA: f32 = 0.882_911_1;
pub const DELTA: f32 = 0.443_506_87;
pub const K: f32 = 1.230_174_1;
/// Low-pass scaling after analysis.
pub const KL: f32 = 1.0 / K;
/// High-pass scaling after analysis.
pub const KH: f32 = K;

/// Wavelet filter selected for a tile-component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterKind {
    /// Integer 5/3 filter, exactly invertible.
    #[default]
    Reversible53,
    /// Floating point 9/7 filter.
    Irreversible97,
}

impl FilterKind {
    pub fn is_reversible(self) -> bool {
        matches!(self, FilterKind::Reversible53)
    }

    pub fn analysis_low_neg_support(self) -> u32 {
        match self {
            FilterKind::Reversible53 => 2,
            FilterKind::Irreversible97 => 4,
        }
    }

    pub fn analysis_low_pos_support(self) -> u32 {
        self.analysis_low_neg_support()
    }

    pub fn analysis_high_neg_support(self) -> u32 {
        match self {
            FilterKind::Reversible53 => 1,
            FilterKind::Irreversible97 => 3,
        }
    }

    pub fn analysis_high_pos_support(self) -> u32 {
        self.analysis_high_neg_support()
    }

    pub fn synthesis_low_neg_support(self) -> u32 {
        match self {
            FilterKind::Reversible53 => 1,
            FilterKind::Irreversible97 => 3,
        }
    }

    pub fn synthesis_low_pos_support(self) -> u32 {
        self.synthesis_low_neg_support()
    }

    pub fn synthesis_high_neg_support(self) -> u32 {
        match self {
            FilterKind::Reversible53 => 2,
            FilterKind::Irreversible97 => 4,
        }
    }

    pub fn synthesis_high_pos_support(self) -> u32 {
        self.synthesis_high_neg_support()
    }

    /// Whether filtering a window with `tail_ovrlp` samples before and
    /// `head_ovrlp` samples after a segment of `in_len` samples gives the same
    /// coefficients as transforming the full signal.
    pub fn is_same_as_full_wt(self, tail_ovrlp: u32, head_ovrlp: u32, in_len: u32) -> bool {
        let (tail, head_even, head_odd) = match self {
            FilterKind::Reversible53 => (2, 1, 2),
            FilterKind::Irreversible97 => (4, 3, 4),
        };
        if in_len % 2 == 0 {
            tail_ovrlp >= tail && head_ovrlp >= head_even
        } else {
            tail_ovrlp >= tail && head_ovrlp >= head_odd
        }
    }

    /// L2 norm of the 1-D synthesis basis function of a band obtained after
    /// `levels` analysis steps, the last of which selected the high-pass band
    /// when `high` is set.
    pub fn basis_norm(self, levels: u8, high: bool) -> f64 {
        const MAX_SIMULATED: u8 = 10;
        if levels == 0 {
            return 1.0;
        }
        if levels <= MAX_SIMULATED {
            return self.simulated_norm(levels, high);
        }
        let top = self.simulated_norm(MAX_SIMULATED, high);
        let ratio = top / self.simulated_norm(MAX_SIMULATED - 1, high);
        top * ratio.powi(i32::from(levels - MAX_SIMULATED))
    }

    fn simulated_norm(self, levels: u8, high: bool) -> f64 {
        let n = 32usize << levels;
        let mut sig = vec![0f64; n];
        let band_len = n >> levels;
        let band_start = if high { band_len } else { 0 };
        sig[band_start + band_len / 2] = 1.0;

        let mut tmp = vec![0f64; n];
        for lvl in (1..=levels).rev() {
            let len = n >> (lvl - 1);
            let half = len / 2;
            for k in 0..half {
                tmp[2 * k] = sig[k];
                tmp[2 * k + 1] = sig[half + k];
            }
            self.synthesize_linear(&mut tmp[..len]);
            sig[..len].copy_from_slice(&tmp[..len]);
        }
        sig.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    // Synthesis without integer rounding, used to measure basis norms.
    fn synthesize_linear(self, sig: &mut [f64]) {
        let len = sig.len();
        match self {
            FilterKind::Reversible53 => {
                lift(sig, 0, len, 1, 0, -0.25);
                lift(sig, 0, len, 1, 1, 0.5);
            }
            FilterKind::Irreversible97 => {
                scale(sig, 0, len, 1, 0, 1.0 / f64::from(KL));
                scale(sig, 0, len, 1, 1, 1.0 / f64::from(KH));
                lift(sig, 0, len, 1, 0, -f64::from(DELTA));
                lift(sig, 0, len, 1, 1, -f64::from(GAMMA));
                lift(sig, 0, len, 1, 0, -f64::from(BETA));
                lift(sig, 0, len, 1, 1, -f64::from(ALPHA));
            }
        }
    }
}

/// Number of low-pass samples of a `len` sample signal.
#[inline]
pub fn low_count(len: usize, first_high: bool) -> usize {
    if first_high { len / 2 } else { len.div_ceil(2) }
}

// Symmetric extension of index `i` into [0, len), valid for len >= 2 and -1 <= i <= len.
#[inline]
fn mirror(i: isize, len: usize) -> usize {
    let n = len as isize;
    let m = if i < 0 {
        -i
    } else if i >= n {
        2 * (n - 1) - i
    } else {
        i
    };
    m as usize
}

// sig[k] += coeff * (sig[k - 1] + sig[k + 1]) for k = start, start + 2, ...
fn lift<T>(sig: &mut [T], off: usize, len: usize, step: usize, start: usize, coeff: T)
where
    T: Copy + Add<Output = T> + Mul<Output = T>,
{
    let mut k = start;
    while k < len {
        let l = sig[off + mirror(k as isize - 1, len) * step];
        let r = sig[off + mirror(k as isize + 1, len) * step];
        let i = off + k * step;
        sig[i] = sig[i] + coeff * (l + r);
        k += 2;
    }
}

fn scale<T>(sig: &mut [T], off: usize, len: usize, step: usize, start: usize, factor: T)
where
    T: Copy + Mul<Output = T>,
{
    let mut k = start;
    while k < len {
        let i = off + k * step;
        sig[i] = sig[i] * factor;
        k += 2;
    }
}

/// Reversible integer 5/3 lifting.
pub struct Dwt53;

impl Dwt53 {
    /// Forward 5/3 lifting, in place.
    pub fn analyze(sig: &mut [i32], off: usize, len: usize, step: usize, first_high: bool) {
        if len == 0 {
            return;
        }
        if len == 1 {
            if first_high {
                sig[off] *= 2;
            }
            return;
        }
        let (low_start, high_start) = phase_starts(first_high);

        // Predict: y[2n+1] = x[2n+1] - floor((x[2n] + x[2n+2]) / 2)
        let mut k = high_start;
        while k < len {
            let l = sig[off + mirror(k as isize - 1, len) * step];
            let r = sig[off + mirror(k as isize + 1, len) * step];
            sig[off + k * step] -= (l + r) >> 1;
            k += 2;
        }

        // Update: y[2n] = x[2n] + floor((y[2n-1] + y[2n+1] + 2) / 4)
        let mut k = low_start;
        while k < len {
            let l = sig[off + mirror(k as isize - 1, len) * step];
            let r = sig[off + mirror(k as isize + 1, len) * step];
            sig[off + k * step] += (l + r + 2) >> 2;
            k += 2;
        }
    }

    /// Inverse 5/3 lifting, in place. Undoes `analyze` exactly.
    pub fn synthesize(sig: &mut [i32], off: usize, len: usize, step: usize, first_high: bool) {
        if len == 0 {
            return;
        }
        if len == 1 {
            if first_high {
                sig[off] >>= 1;
            }
            return;
        }
        let (low_start, high_start) = phase_starts(first_high);

        let mut k = low_start;
        while k < len {
            let l = sig[off + mirror(k as isize - 1, len) * step];
            let r = sig[off + mirror(k as isize + 1, len) * step];
            sig[off + k * step] -= (l + r + 2) >> 2;
            k += 2;
        }

        let mut k = high_start;
        while k < len {
            let l = sig[off + mirror(k as isize - 1, len) * step];
            let r = sig[off + mirror(k as isize + 1, len) * step];
            sig[off + k * step] += (l + r) >> 1;
            k += 2;
        }
    }
}

/// Irreversible floating point 9/7 lifting.
pub struct Dwt97;

impl Dwt97 {
    /// Forward 9/7 lifting, in place.
    pub fn analyze(sig: &mut [f32], off: usize, len: usize, step: usize, first_high: bool) {
        if len == 0 {
            return;
        }
        if len == 1 {
            if first_high {
                sig[off] *= 2.0;
            }
            return;
        }
        let (low_start, high_start) = phase_starts(first_high);
        lift(sig, off, len, step, high_start, ALPHA);
        lift(sig, off, len, step, low_start, BETA);
        lift(sig, off, len, step, high_start, GAMMA);
        lift(sig, off, len, step, low_start, DELTA);
        scale(sig, off, len, step, low_start, KL);
        scale(sig, off, len, step, high_start, KH);
    }

    /// Inverse 9/7 lifting, in place.
    pub fn synthesize(sig: &mut [f32], off: usize, len: usize, step: usize, first_high: bool) {
        if len == 0 {
            return;
        }
        if len == 1 {
            if first_high {
                sig[off] *= 0.5;
            }
            return;
        }
        let (low_start, high_start) = phase_starts(first_high);
        scale(sig, off, len, step, low_start, 1.0 / KL);
        scale(sig, off, len, step, high_start, 1.0 / KH);
        lift(sig, off, len, step, low_start, -DELTA);
        lift(sig, off, len, step, high_start, -GAMMA);
        lift(sig, off, len, step, low_start, -BETA);
        lift(sig, off, len, step, high_start, -ALPHA);
    }
}

#[inline]
fn phase_starts(first_high: bool) -> (usize, usize) {
    if first_high { (1, 0) } else { (0, 1) }
}
