//! Scalar quantization (ISO/IEC 15444-1 Annex E).
//!
//! Step sizes are carried as a 5 bit exponent and an 11 bit mantissa relative to
//! the nominal dynamic range `R_b` of each subband:
//! `delta_b = 2^(R_b - exponent) * (1 + mantissa / 2^11)`.

use crate::constants::{QSTEP_MANTISSA_BITS, QSTEP_MAX_EXPONENT, QSTEP_MAX_MANTISSA};
use crate::error::{J2kError, Result};
use crate::jpeg2000::subband::{Subband, SubbandTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuantizationType {
    /// No quantization; only the dynamic range is signaled.
    #[default]
    Reversible,
    /// Only the LL step is signaled; the others derive from it.
    Derived,
    /// Every subband step is signaled.
    Expounded,
}

/// Exponent/mantissa pair of a subband step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSize {
    pub exponent: u8,
    pub mantissa: u16,
}

impl StepSize {
    pub fn new(exponent: u8, mantissa: u16) -> Result<Self> {
        if exponent > QSTEP_MAX_EXPONENT || mantissa > QSTEP_MAX_MANTISSA {
            return Err(J2kError::InvalidQuantizationStep { exponent, mantissa });
        }
        Ok(Self { exponent, mantissa })
    }

    /// Converts a step normalized to the nominal range into exponent/mantissa form.
    pub fn from_normalized(step: f32) -> Result<Self> {
        if !(step.is_finite() && step > 0.0) {
            return Err(J2kError::InvalidBaseStep(step));
        }
        let step = f64::from(step);
        let mut exponent = (-step.log2()).ceil() as i32;
        let scale = 1u32 << QSTEP_MANTISSA_BITS;
        let mut mantissa = ((step * 2f64.powi(exponent) - 1.0) * f64::from(scale)).round() as i64;
        if mantissa >= i64::from(scale) {
            mantissa = 0;
            exponent -= 1;
        }
        if !(0..=i32::from(QSTEP_MAX_EXPONENT)).contains(&exponent) {
            return Err(J2kError::InvalidBaseStep(step as f32));
        }
        Self::new(exponent as u8, mantissa.max(0) as u16)
    }

    /// Step relative to the nominal range: `2^-exponent * (1 + mantissa / 2^11)`.
    pub fn normalized(&self) -> f64 {
        2f64.powi(-i32::from(self.exponent))
            * (1.0 + f64::from(self.mantissa) / f64::from(1u32 << QSTEP_MANTISSA_BITS))
    }
}

/// Quantization of one subband, resolved from the tile-component table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandQuantization {
    pub step: StepSize,
    /// Number of magnitude bit-planes `M_b = G + exponent - 1`.
    pub magnitude_bits: u8,
    /// Actual step in coefficient units (1 for reversible).
    pub delta: f32,
    pub reversible: bool,
}

/// Per tile-component quantization table, indexed `[resolution][subband index]`.
///
/// Subband indices keep their global numbering: resolution 0 holds index 0 and
/// every other resolution holds 1 (HL), 2 (LH) and 3 (HH).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuantizationParams {
    pub quant_type: QuantizationType,
    pub guard_bits: u8,
    pub steps: Vec<Vec<Option<StepSize>>>,
}

impl QuantizationParams {
    /// Computes the table an encoder signals for `tree`. `bit_depth` is the
    /// nominal range of the component samples entering the transform.
    pub fn for_encoder(
        quant_type: QuantizationType,
        base_step: f32,
        guard_bits: u8,
        bit_depth: u8,
        tree: &SubbandTree,
    ) -> Result<Self> {
        let mut params = Self {
            quant_type,
            guard_bits,
            steps: Vec::new(),
        };
        for i in tree.leaves() {
            let band = tree.node(i);
            let step = match quant_type {
                QuantizationType::Reversible => {
                    StepSize::new(bit_depth + band.gain_bits(), 0)?
                }
                QuantizationType::Expounded => StepSize::from_normalized(
                    base_step / (band.l2_norm as f32 * f32::from(1u16 << band.gain_bits())),
                )?,
                QuantizationType::Derived => {
                    if band.resolution != 0 {
                        continue;
                    }
                    StepSize::from_normalized(base_step / band.l2_norm as f32)?
                }
            };
            params.set(band.resolution, band.index, step);
        }
        Ok(params)
    }

    pub fn set(&mut self, resolution: u8, index: u8, step: StepSize) {
        let r = resolution as usize;
        if self.steps.len() <= r {
            self.steps.resize(r + 1, Vec::new());
        }
        let row = &mut self.steps[r];
        if row.len() <= index as usize {
            row.resize(index as usize + 1, None);
        }
        row[index as usize] = Some(step);
    }

    pub fn get(&self, resolution: u8, index: u8) -> Option<StepSize> {
        self.steps
            .get(resolution as usize)
            .and_then(|row| row.get(index as usize))
            .copied()
            .flatten()
    }

    /// Step of `band` in a decomposition with `levels` levels.
    pub fn step_size(&self, band: &Subband, levels: u8) -> Result<StepSize> {
        match self.quant_type {
            QuantizationType::Derived => {
                let base = self.get(0, 0).ok_or(J2kError::MissingQuantizationStep {
                    resolution: 0,
                    index: 0,
                })?;
                let exponent = i32::from(base.exponent) - i32::from(levels) + i32::from(band.level);
                if !(0..=i32::from(QSTEP_MAX_EXPONENT)).contains(&exponent) {
                    return Err(J2kError::InvalidQuantizationStep {
                        exponent: exponent.clamp(0, 255) as u8,
                        mantissa: base.mantissa,
                    });
                }
                StepSize::new(exponent as u8, base.mantissa)
            }
            _ => self
                .get(band.resolution, band.index)
                .ok_or(J2kError::MissingQuantizationStep {
                    resolution: band.resolution,
                    index: band.index,
                }),
        }
    }

    /// Everything the coder needs about `band`. `bit_depth` is the nominal range
    /// of the samples entering the transform.
    pub fn band(&self, band: &Subband, levels: u8, bit_depth: u8) -> Result<BandQuantization> {
        let step = self.step_size(band, levels)?;
        let magnitude_bits = (i32::from(self.guard_bits) + i32::from(step.exponent) - 1).clamp(0, 31) as u8;
        let reversible = self.quant_type == QuantizationType::Reversible;
        let delta = if reversible {
            1.0
        } else {
            let range = i32::from(bit_depth) + i32::from(band.gain_bits());
            (2f64.powi(range) * step.normalized()) as f32
        };
        Ok(BandQuantization {
            step,
            magnitude_bits,
            delta,
            reversible,
        })
    }
}

/// Dead-zone scalar quantization: `q = sign(y) * floor(|y| / delta)`.
pub fn quantize_scalar(coeff: f32, delta: f32) -> i32 {
    let q = (coeff.abs() / delta).floor() as i32;
    if coeff < 0.0 { -q } else { q }
}

/// Reconstructs an irreversible coefficient from index `q` whose `undecoded`
/// least significant bit-planes are unknown, at the middle of the interval.
pub fn dequantize_scalar(q: i32, delta: f32, undecoded: u8) -> f32 {
    if q == 0 {
        return 0.0;
    }
    let mag = q.unsigned_abs() as f32 + 0.5 * (1u64 << undecoded) as f32;
    let value = mag * delta;
    if q < 0 { -value } else { value }
}

/// Reversible counterpart of [`dequantize_scalar`]: exact when every bit-plane
/// was decoded, midpoint otherwise.
pub fn dequantize_reversible(q: i32, undecoded: u8) -> i32 {
    if q == 0 || undecoded == 0 {
        return q;
    }
    let mag = q.unsigned_abs() as i64 + (1i64 << (undecoded - 1));
    let mag = mag.min(i64::from(i32::MAX)) as i32;
    if q < 0 { -mag } else { mag }
}

/// Clamps `q` to `bits` magnitude bits. Returns the value and whether it changed.
pub fn clamp_magnitude(q: i32, bits: u8) -> (i32, bool) {
    let max = if bits >= 31 { i32::MAX } else { (1i32 << bits) - 1 };
    if q > max {
        (max, true)
    } else if q < -max {
        (-max, true)
    } else {
        (q, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::dwt::FilterKind;
    use crate::jpeg2000::subband::Orientation;

    #[test]
    fn test_quantization_roundtrip() {
        let val = 10.5;
        let step = 2.0;
        let q = quantize_scalar(val, step);
        // 10.5 / 2.0 = 5.25 -> 5
        assert_eq!(q, 5);

        let recon = dequantize_scalar(q, step, 0);
        // (5 + 0.5) * 2.0 = 11.0
        assert!((val - recon).abs() <= step);
        assert_eq!(quantize_scalar(-10.5, step), -5);
        assert_eq!(quantize_scalar(0.9, step), 0);
    }

    #[test]
    fn test_irreversible_within_one_step() {
        for &delta in &[0.37f32, 1.0, 2.5, 13.0] {
            for i in -200..200 {
                let x = i as f32 * 0.77;
                let r = dequantize_scalar(quantize_scalar(x, delta), delta, 0);
                assert!((x - r).abs() <= delta, "x {} delta {} r {}", x, delta, r);
            }
        }
    }

    #[test]
    fn test_reversible_identity() {
        for q in -300..300 {
            assert_eq!(dequantize_reversible(q, 0), q);
        }
        // Two planes missing: 8 -> 8 + 2
        assert_eq!(dequantize_reversible(8, 2), 10);
        assert_eq!(dequantize_reversible(-8, 2), -10);
    }

    #[test]
    fn test_step_from_normalized() {
        let s = StepSize::from_normalized(0.0078125).unwrap();
        assert_eq!((s.exponent, s.mantissa), (7, 0));
        let s = StepSize::from_normalized(0.01).unwrap();
        assert_eq!(s.exponent, 7);
        assert!((s.normalized() - 0.01).abs() < 1e-5);
        // Rounds up to the next power of two.
        let s = StepSize::from_normalized(0.0156249).unwrap();
        assert_eq!((s.exponent, s.mantissa), (6, 0));
        assert!(StepSize::from_normalized(0.0).is_err());
        assert!(StepSize::new(32, 0).is_err());
        assert!(StepSize::new(5, 2048).is_err());
    }

    #[test]
    fn test_reversible_table_uses_global_indices() {
        let tree = SubbandTree::new(0, 0, 32, 32, 2, FilterKind::Reversible53);
        let params =
            QuantizationParams::for_encoder(QuantizationType::Reversible, 1.0, 2, 8, &tree).unwrap();
        assert_eq!(params.steps.len(), 3);
        assert_eq!(params.steps[0].len(), 1);
        assert_eq!(params.steps[1].len(), 4);
        assert_eq!(params.steps[1][0], None);
        let hh = tree.node(tree.find(2, Orientation::HH).unwrap());
        let bq = params.band(hh, 2, 8).unwrap();
        assert_eq!(bq.step.exponent, 10);
        assert_eq!(bq.magnitude_bits, 11);
        assert_eq!(bq.delta, 1.0);
    }

    #[test]
    fn test_derived_exponents() {
        let tree = SubbandTree::new(0, 0, 64, 64, 3, FilterKind::Irreversible97);
        let params =
            QuantizationParams::for_encoder(QuantizationType::Derived, 1.0 / 128.0, 2, 8, &tree).unwrap();
        assert_eq!(params.steps.len(), 1);
        let ll = tree.node(tree.find(0, Orientation::LL).unwrap());
        let e0 = params.step_size(ll, 3).unwrap().exponent;
        let hl1 = tree.node(tree.find(3, Orientation::HL).unwrap());
        let s = params.step_size(hl1, 3).unwrap();
        assert_eq!(i32::from(s.exponent), i32::from(e0) - 3 + 1);
        assert_eq!(s.mantissa, params.get(0, 0).unwrap().mantissa);
    }

    #[test]
    fn test_missing_entry_is_error() {
        let tree = SubbandTree::new(0, 0, 16, 16, 1, FilterKind::Irreversible97);
        let params = QuantizationParams {
            quant_type: QuantizationType::Expounded,
            guard_bits: 2,
            steps: vec![vec![StepSize::new(8, 0).ok()]],
        };
        let hh = tree.node(tree.find(1, Orientation::HH).unwrap());
        assert_eq!(
            params.band(hh, 1, 8),
            Err(J2kError::MissingQuantizationStep {
                resolution: 1,
                index: 3
            })
        );
    }

    #[test]
    fn test_clamp_magnitude() {
        assert_eq!(clamp_magnitude(9, 3), (7, true));
        assert_eq!(clamp_magnitude(-9, 3), (-7, true));
        assert_eq!(clamp_magnitude(5, 3), (5, false));
    }
}
