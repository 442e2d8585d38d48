//! Inverse discrete wavelet transforms (ISO/IEC 15444-1 Annex F).
//!
//! Implements 2D_SR over interleaved subband planes with periodic symmetric
//! extension at the boundaries. The 5/3 path is exact integer lifting; the
//! 9/7 path is floating-point lifting with the standard filter constants.

use crate::image::Rect;

/// Extension margin large enough for both filters' 1D_EXTR reach.
const PADDING: usize = 4;

fn floor2(v: u32) -> u32 {
    v / 2
}

fn ceil2(v: u32) -> u32 {
    v.div_ceil(2)
}

/// Periodic symmetric extension index (Equation F-4).
fn pse(i: isize, i0: isize, i1: isize) -> usize {
    let span = 2 * (i1 - i0 - 1);
    let m = (i - i0).rem_euclid(span);
    (i0 + m.min(span - m)) as usize
}

/// Fill `[i0 - left, i0)` and `[i1, i1 + right)` with mirrored samples.
fn extend<T: Copy>(buf: &mut [T], i0: usize, i1: usize, left: usize, right: usize) {
    let (s0, s1) = (i0 as isize, i1 as isize);
    for i in (i0 - left)..i0 {
        buf[i] = buf[pse(i as isize, s0, s1)];
    }
    for i in i1..(i1 + right) {
        buf[i] = buf[pse(i as isize, s0, s1)];
    }
}

/// Interleave the four subband planes of one resolution level into a single
/// plane covering `rect` (2D_INTERLEAVE, F.3.3). The generic parameter lets
/// the reversible path stay in integers.
fn interleave<T: Copy + Default>(
    ll: &[T],
    hl: &[T],
    lh: &[T],
    hh: &[T],
    rect: Rect,
) -> Vec<T> {
    let w = rect.width() as usize;
    let h = rect.height() as usize;
    let low_w = (ceil2(rect.x1) - ceil2(rect.x0)) as usize;
    let high_w = (floor2(rect.x1) - floor2(rect.x0)) as usize;

    let mut out = vec![T::default(); w * h];
    for v in 0..h {
        let gy = rect.y0 + v as u32;
        for u in 0..w {
            let gx = rect.x0 + u as u32;
            let value = match (gx % 2, gy % 2) {
                (0, 0) => {
                    let col = (gx / 2 - ceil2(rect.x0)) as usize;
                    let row = (gy / 2 - ceil2(rect.y0)) as usize;
                    ll.get(row * low_w + col).copied()
                }
                (1, 0) => {
                    let col = (gx / 2 - floor2(rect.x0)) as usize;
                    let row = (gy / 2 - ceil2(rect.y0)) as usize;
                    hl.get(row * high_w + col).copied()
                }
                (0, 1) => {
                    let col = (gx / 2 - ceil2(rect.x0)) as usize;
                    let row = (gy / 2 - floor2(rect.y0)) as usize;
                    lh.get(row * low_w + col).copied()
                }
                _ => {
                    let col = (gx / 2 - floor2(rect.x0)) as usize;
                    let row = (gy / 2 - floor2(rect.y0)) as usize;
                    hh.get(row * high_w + col).copied()
                }
            };
            out[v * w + u] = value.unwrap_or_default();
        }
    }
    out
}

/// Run `filter` over every row, then every column of the interleaved plane.
/// The buffer passed to the filter places sample `i` at a position with the
/// same parity as its coordinate on the reference grid, which is what the
/// lifting index arithmetic assumes.
fn separable_inverse<T: Copy + Default>(
    a: &mut [T],
    rect: Rect,
    filter: &dyn Fn(&mut [T], usize, usize),
) {
    let w = rect.width() as usize;
    let h = rect.height() as usize;

    // HOR_SR (F.3.4)
    let shift = PADDING + (rect.x0 % 2) as usize;
    let mut buf = vec![T::default(); w + 2 * (PADDING + 1)];
    for v in 0..h {
        buf.clear();
        buf.extend(std::iter::repeat_n(T::default(), shift));
        buf.extend_from_slice(&a[v * w..(v + 1) * w]);
        buf.extend(std::iter::repeat_n(T::default(), PADDING + 1));
        filter(&mut buf, shift, shift + w);
        a[v * w..(v + 1) * w].copy_from_slice(&buf[shift..shift + w]);
    }

    // VER_SR (F.3.5)
    let shift = PADDING + (rect.y0 % 2) as usize;
    for u in 0..w {
        buf.clear();
        buf.extend(std::iter::repeat_n(T::default(), shift));
        for v in 0..h {
            buf.push(a[v * w + u]);
        }
        buf.extend(std::iter::repeat_n(T::default(), PADDING + 1));
        filter(&mut buf, shift, shift + h);
        for v in 0..h {
            a[v * w + u] = buf[shift + v];
        }
    }
}

/// The reversible 5/3 filter.
pub struct Dwt53;

impl Dwt53 {
    /// 1D_SR + 1D_FILTER_5-3R (F.3.6, F.3.8.1) on a padded buffer holding
    /// samples `[i0, i1)`.
    fn filter(y: &mut [i32], i0: usize, i1: usize) {
        if i1 - i0 == 1 {
            if i0 % 2 != 0 {
                y[i0] >>= 1;
            }
            return;
        }

        let left = if i0 % 2 == 0 { 1 } else { 2 };
        let right = if i1 % 2 == 0 { 2 } else { 1 };
        extend(y, i0, i1, left, right);

        // (F-5)
        for n in i0 / 2..=i1 / 2 {
            let i = 2 * n;
            y[i] -= (y[i - 1] + y[i + 1] + 2) >> 2;
        }
        // (F-6)
        for n in i0 / 2..i1 / 2 {
            let i = 2 * n + 1;
            y[i] += (y[i - 1] + y[i + 1]) >> 1;
        }
    }

    /// Synthesize one resolution level: LL + HL/LH/HH -> the next LL,
    /// covering `rect`.
    pub fn inverse_2d(
        ll: &[i32],
        hl: &[i32],
        lh: &[i32],
        hh: &[i32],
        rect: Rect,
        output: &mut [i32],
    ) {
        let mut plane = interleave(ll, hl, lh, hh, rect);
        separable_inverse(&mut plane, rect, &Self::filter);
        output.copy_from_slice(&plane);
    }
}

/// The irreversible 9/7 filter.
pub struct Dwt97;

impl Dwt97 {
    const ALPHA: f32 = -1.586_134_3;
    const BETA: f32 = -0.052_980_118;
    const GAMMA: f32 = 0.882_911_1;
    const DELTA: f32 = 0.443_506_85;
    const K: f32 = 1.230_174_1;
    const INV_K: f32 = 1.0 / 1.230_174_1;

    fn lift_even(y: &mut [f32], start: usize, end: usize, coefficient: f32) {
        let mut i = start + (start % 2);
        while i < end {
            y[i] -= coefficient * (y[i - 1] + y[i + 1]);
            i += 2;
        }
    }

    fn lift_odd(y: &mut [f32], start: usize, end: usize, coefficient: f32) {
        let mut i = start + (1 - start % 2);
        while i < end {
            y[i] -= coefficient * (y[i - 1] + y[i + 1]);
            i += 2;
        }
    }

    /// 1D_SR + 1D_FILTER_9-7I (F.3.6, F.3.8.2).
    fn filter(y: &mut [f32], i0: usize, i1: usize) {
        if i1 - i0 == 1 {
            return;
        }

        let left = if i0 % 2 == 0 { 3 } else { 4 };
        let right = if i1 % 2 == 0 { 4 } else { 3 };
        extend(y, i0, i1, left, right);

        // Undo the scaling step across the extended range, then run the four
        // lifting steps in reverse order over shrinking windows.
        for (i, value) in y.iter_mut().enumerate().take(i1 + 4).skip(i0 - 4) {
            if i % 2 == 0 {
                *value *= Self::K;
            } else {
                *value *= Self::INV_K;
            }
        }
        Self::lift_even(y, i0 - 3, i1 + 3, Self::DELTA);
        Self::lift_odd(y, i0 - 2, i1 + 2, Self::GAMMA);
        Self::lift_even(y, i0 - 1, i1 + 1, Self::BETA);
        Self::lift_odd(y, i0, i1, Self::ALPHA);
    }

    /// Synthesize one resolution level covering `rect`.
    pub fn inverse_2d(
        ll: &[f32],
        hl: &[f32],
        lh: &[f32],
        hh: &[f32],
        rect: Rect,
        output: &mut [f32],
    ) {
        let mut plane = interleave(ll, hl, lh, hh, rect);
        separable_inverse(&mut plane, rect, &Self::filter);
        output.copy_from_slice(&plane);
    }
}
