//! Multiple component transforms (ISO/IEC 15444-1 Annex G) and DC level shift.

/// Decorrelating transform applied to the first three components of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComponentTransform {
    #[default]
    None,
    /// Reversible component transform, used with the 5/3 filter.
    Reversible,
    /// Irreversible component transform (YCbCr), used with the 9/7 filter.
    Irreversible,
}

impl ComponentTransform {
    /// Extra bits of nominal range the transform adds to component `c`.
    pub fn extra_bits(self, c: usize) -> u8 {
        match self {
            ComponentTransform::Reversible if c == 1 || c == 2 => 1,
            _ => 0,
        }
    }
}

/// RCT: Y = floor((R + 2G + B) / 4), Cb = B - G, Cr = R - G
pub fn forward_rct(r: &mut [i32], g: &mut [i32], b: &mut [i32]) {
    for ((r, g), b) in r.iter_mut().zip(g.iter_mut()).zip(b.iter_mut()) {
        let y = (*r + 2 * *g + *b) >> 2;
        let cb = *b - *g;
        let cr = *r - *g;
        *r = y;
        *g = cb;
        *b = cr;
    }
}

pub fn inverse_rct(y: &mut [i32], cb: &mut [i32], cr: &mut [i32]) {
    for ((y, cb), cr) in y.iter_mut().zip(cb.iter_mut()).zip(cr.iter_mut()) {
        let g = *y - ((*cb + *cr) >> 2);
        let r = *cr + g;
        let b = *cb + g;
        *y = r;
        *cb = g;
        *cr = b;
    }
}

pub fn forward_ict(r: &mut [f32], g: &mut [f32], b: &mut [f32]) {
    for ((r, g), b) in r.iter_mut().zip(g.iter_mut()).zip(b.iter_mut()) {
        let (rv, gv, bv) = (*r, *g, *b);
        *r = 0.299 * rv + 0.587 * gv + 0.114 * bv;
        *g = -0.168_736 * rv - 0.331_264 * gv + 0.5 * bv;
        *b = 0.5 * rv - 0.418_688 * gv - 0.081_312 * bv;
    }
}

pub fn inverse_ict(y: &mut [f32], cb: &mut [f32], cr: &mut [f32]) {
    for ((y, cb), cr) in y.iter_mut().zip(cb.iter_mut()).zip(cr.iter_mut()) {
        let (yv, cbv, crv) = (*y, *cb, *cr);
        *y = yv + 1.402 * crv;
        *cb = yv - 0.344_136 * cbv - 0.714_136 * crv;
        *cr = yv + 1.772 * cbv;
    }
}

/// Mutable access to the first three elements of a slice.
pub fn split3<T>(v: &mut [T]) -> Option<(&mut T, &mut T, &mut T)> {
    match v {
        [a, b, c, ..] => Some((a, b, c)),
        _ => None,
    }
}

/// Subtracts `2^(bit_depth - 1)` from unsigned samples.
pub fn level_shift_forward(samples: &mut [i32], bit_depth: u8, signed: bool) {
    if signed {
        return;
    }
    let shift = 1i32 << (bit_depth - 1);
    samples.iter_mut().for_each(|s| *s -= shift);
}

/// Undoes the level shift and clamps to the component's range.
pub fn level_shift_inverse(samples: &mut [i32], bit_depth: u8, signed: bool) {
    let (min, max) = sample_range(bit_depth, signed);
    let shift = if signed { 0 } else { 1i32 << (bit_depth - 1) };
    samples
        .iter_mut()
        .for_each(|s| *s = (*s + shift).clamp(min, max));
}

/// Inclusive sample range of a component.
pub fn sample_range(bit_depth: u8, signed: bool) -> (i32, i32) {
    if signed {
        (-(1i32 << (bit_depth - 1)), (1i32 << (bit_depth - 1)) - 1)
    } else {
        (0, ((1i64 << bit_depth) - 1) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rct_roundtrip() {
        let mut r = vec![0, 255, -128, 17, 100];
        let mut g = vec![0, 0, 127, 18, 200];
        let mut b = vec![0, 255, -1, 19, 50];
        let orig = (r.clone(), g.clone(), b.clone());
        forward_rct(&mut r, &mut g, &mut b);
        assert_eq!(r[1], (255 + 255) >> 2);
        inverse_rct(&mut r, &mut g, &mut b);
        assert_eq!((r, g, b), orig);
    }

    #[test]
    fn test_ict_roundtrip() {
        let mut r = vec![10.0f32, -50.0, 127.0];
        let mut g = vec![20.0f32, 0.0, -128.0];
        let mut b = vec![30.0f32, 50.0, 5.0];
        let orig = (r.clone(), g.clone(), b.clone());
        forward_ict(&mut r, &mut g, &mut b);
        inverse_ict(&mut r, &mut g, &mut b);
        for (x, y) in r.iter().chain(g.iter()).chain(b.iter()).zip(
            orig.0.iter().chain(orig.1.iter()).chain(orig.2.iter()),
        ) {
            assert!((x - y).abs() < 0.05, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_level_shift() {
        let mut s = vec![0, 128, 255];
        level_shift_forward(&mut s, 8, false);
        assert_eq!(s, vec![-128, 0, 127]);
        s[2] = 300;
        level_shift_inverse(&mut s, 8, false);
        assert_eq!(s, vec![0, 128, 255]);
        assert_eq!(sample_range(12, true), (-2048, 2047));
    }

    #[test]
    fn test_split3() {
        let mut v = vec![1, 2, 3, 4];
        let (a, b, c) = split3(&mut v).unwrap();
        std::mem::swap(a, c);
        *b = 9;
        assert_eq!(v, vec![3, 9, 1, 4]);
        assert!(split3(&mut [1, 2]).is_none());
    }
}
