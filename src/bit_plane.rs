//! EBCOT Tier-1 code-block decoding (ISO/IEC 15444-1 Annex D).
//!
//! Each code-block's bit-planes are coded most significant first with three
//! passes per plane: significance propagation, magnitude refinement, and
//! cleanup. The first coded plane carries only a cleanup pass. Context
//! modeling follows Tables D.1 through D.4; the binary decisions come from
//! the MQ decoder in [`crate::mq`].

use crate::error::J2kError;
use crate::image::{CodeBlockStyle, SubbandOrientation};
use crate::mq::{MqContext, MqDecoder};
use log::warn;

/// Context labels: zero coding 0..=8, sign coding 9..=13, magnitude
/// refinement 14..=16, run-length 17, uniform 18.
const CTX_RUN: u8 = 17;
const CTX_UNIFORM: u8 = 18;
const CTX_COUNT: usize = 19;

/// Synthetic renormalization fills tolerated before a pass boundary declares
/// the block corrupt. A correctly terminated segment consumes at most a
/// couple while flushing its final decisions.
const MAX_SYNTHETIC_FILLS: u32 = 2;

/// Magnitude bits of one coefficient, accumulated plane by plane.
#[derive(Debug, Clone, Copy, Default)]
struct Magnitude {
    bits: u32,
    count: u8,
}

impl Magnitude {
    fn push(&mut self, bit: u32) {
        self.bits = (self.bits << 1) | bit;
        self.count += 1;
    }
}

/// Result of decoding one code-block.
#[derive(Debug)]
pub struct DecodeOutcome {
    /// Signed quantization indices in raster order, width x height.
    pub coefficients: Vec<i32>,
    /// True if lenient mode zero-filled the tail of a corrupt block.
    pub recovered: bool,
}

/// Reusable per-decode scratch state. One instance lives in each tile
/// decoder; nothing here survives between code-blocks except allocations.
pub struct BlockContext {
    width: u32,
    height: u32,
    band: SubbandOrientation,
    vertically_causal: bool,
    signs: Vec<u8>,
    significant: Vec<u8>,
    refined: Vec<u8>,
    /// Coefficients already coded in the current plane's significance pass.
    visited: Vec<u8>,
    magnitudes: Vec<Magnitude>,
    contexts: [MqContext; CTX_COUNT],
}

impl Default for BlockContext {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            band: SubbandOrientation::LL,
            vertically_causal: false,
            signs: Vec::new(),
            significant: Vec::new(),
            refined: Vec::new(),
            visited: Vec::new(),
            magnitudes: Vec::new(),
            contexts: [MqContext::default(); CTX_COUNT],
        }
    }
}

impl BlockContext {
    fn reset(
        &mut self,
        width: u32,
        height: u32,
        band: SubbandOrientation,
        style: &CodeBlockStyle,
        missing_bit_planes: u8,
    ) {
        let size = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.band = band;
        self.vertically_causal = style.vertically_causal;
        for state in [
            &mut self.signs,
            &mut self.significant,
            &mut self.refined,
            &mut self.visited,
        ] {
            state.clear();
            state.resize(size, 0);
        }
        self.magnitudes.clear();
        self.magnitudes.resize(
            size,
            Magnitude {
                bits: 0,
                count: missing_bit_planes,
            },
        );
        self.reset_contexts();
    }

    /// Initial context states from Table D.7.
    fn reset_contexts(&mut self) {
        self.contexts = [MqContext::default(); CTX_COUNT];
        self.contexts[0] = MqContext::new(4, 0);
        self.contexts[CTX_RUN as usize] = MqContext::new(3, 0);
        self.contexts[CTX_UNIFORM as usize] = MqContext::new(46, 0);
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    fn significance(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            0
        } else {
            self.significant[x as usize + y as usize * self.width as usize]
        }
    }

    #[inline]
    fn sign_at(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            0
        } else {
            self.signs[x as usize + y as usize * self.width as usize]
        }
    }

    /// With vertically causal contexts, neighbors in the stripe below do not
    /// contribute (D.3.1 note).
    #[inline]
    fn next_stripe_suppressed(&self, y: u32) -> bool {
        self.vertically_causal && y + 1 < self.height && ((y + 1) >> 2) > (y >> 2)
    }

    #[inline]
    fn horizontal(&self, x: u32, y: u32) -> u8 {
        self.significance(x as i64 - 1, y as i64) + self.significance(x as i64 + 1, y as i64)
    }

    #[inline]
    fn vertical(&self, x: u32, y: u32) -> u8 {
        let below = if self.next_stripe_suppressed(y) {
            0
        } else {
            self.significance(x as i64, y as i64 + 1)
        };
        self.significance(x as i64, y as i64 - 1) + below
    }

    #[inline]
    fn diagonal(&self, x: u32, y: u32) -> u8 {
        let suppressed = self.next_stripe_suppressed(y);
        let mut sum = self.significance(x as i64 - 1, y as i64 - 1)
            + self.significance(x as i64 + 1, y as i64 - 1);
        if !suppressed {
            sum += self.significance(x as i64 - 1, y as i64 + 1)
                + self.significance(x as i64 + 1, y as i64 + 1);
        }
        sum
    }

    #[inline]
    fn neighborhood(&self, x: u32, y: u32) -> u8 {
        self.horizontal(x, y) + self.vertical(x, y) + self.diagonal(x, y)
    }

    /// Zero-coding context label (Table D.1).
    fn zero_coding_context(&self, x: u32, y: u32) -> u8 {
        let mut h = self.horizontal(x, y);
        let mut v = self.vertical(x, y);
        let d = self.diagonal(x, y);

        match self.band {
            SubbandOrientation::LL | SubbandOrientation::LH | SubbandOrientation::HL => {
                // HL transposes the roles of horizontal and vertical.
                if self.band == SubbandOrientation::HL {
                    std::mem::swap(&mut h, &mut v);
                }
                match (h, v, d) {
                    (2, _, _) => 8,
                    (1, v, _) if v >= 1 => 7,
                    (1, 0, d) if d >= 1 => 6,
                    (1, 0, 0) => 5,
                    (0, 2, _) => 4,
                    (0, 1, _) => 3,
                    (0, 0, d) if d >= 2 => 2,
                    (0, 0, 1) => 1,
                    _ => 0,
                }
            }
            SubbandOrientation::HH => {
                let hv = h + v;
                if d >= 3 {
                    8
                } else if d == 2 {
                    if hv >= 1 { 7 } else { 6 }
                } else if d == 1 {
                    match hv {
                        0 => 3,
                        1 => 4,
                        _ => 5,
                    }
                } else if hv >= 2 {
                    2
                } else {
                    hv
                }
            }
        }
    }

    /// Sign-coding context label and XOR bit (Table D.2).
    fn sign_context(&self, x: u32, y: u32) -> (u8, u32) {
        let contribution = |sx: i64, sy: i64| -> i32 {
            let sigma = self.significance(sx, sy) as i32;
            if self.sign_at(sx, sy) == 0 { sigma } else { -sigma }
        };

        let h = (contribution(x as i64 - 1, y as i64) + contribution(x as i64 + 1, y as i64))
            .clamp(-1, 1);
        let below = if self.next_stripe_suppressed(y) {
            0
        } else {
            contribution(x as i64, y as i64 + 1)
        };
        let v = (contribution(x as i64, y as i64 - 1) + below).clamp(-1, 1);

        match (h, v) {
            (1, 1) => (13, 0),
            (1, 0) => (12, 0),
            (1, -1) => (11, 0),
            (0, 1) => (10, 0),
            (0, 0) => (9, 0),
            (0, -1) => (10, 1),
            (-1, 1) => (11, 1),
            (-1, 0) => (12, 1),
            (-1, -1) => (13, 1),
            _ => unreachable!(),
        }
    }

    /// Magnitude-refinement context label (Table D.4).
    fn refinement_context(&self, x: u32, y: u32) -> u8 {
        if self.refined[self.index(x, y)] != 0 {
            16
        } else if self.neighborhood(x, y) >= 1 {
            15
        } else {
            14
        }
    }
}

/// Decode one code-block's coding passes into signed quantization indices.
///
/// `magnitude_bits` is Mb for the subband (E-2); `missing_bit_planes` comes
/// from the packet header. In lenient mode a corrupt block is zero-filled
/// from the point of failure instead of failing the decode.
#[allow(clippy::too_many_arguments)]
pub fn decode_codeblock(
    data: &[u8],
    width: u32,
    height: u32,
    band: SubbandOrientation,
    coding_passes: u32,
    missing_bit_planes: u8,
    magnitude_bits: u8,
    style: &CodeBlockStyle,
    lenient: bool,
    ctx: &mut BlockContext,
) -> Result<DecodeOutcome, J2kError> {
    if magnitude_bits > 31 {
        return Err(J2kError::UnsupportedFeature(
            "more than 31 magnitude bit-planes",
        ));
    }
    if missing_bit_planes > magnitude_bits {
        return Err(J2kError::InvalidMarker);
    }
    let planes = (magnitude_bits - missing_bit_planes) as u32;
    let max_passes = if planes == 0 { 0 } else { 3 * planes - 2 };
    if coding_passes > max_passes {
        return Err(J2kError::InvalidMarker);
    }

    ctx.reset(width, height, band, style, missing_bit_planes);

    let mut decoder = MqDecoder::new(data);
    let mut recovered = false;

    for pass in 0..coding_passes {
        if decoder.synthetic_fills() > MAX_SYNTHETIC_FILLS {
            if !lenient {
                return Err(J2kError::CorruptCodeblock);
            }
            warn!("code-block data exhausted after pass {pass}; zero-filling remainder");
            recovered = true;
            break;
        }

        // Pass order per plane: the first plane starts at cleanup, every
        // later plane runs significance propagation, refinement, cleanup.
        match pass % 3 {
            0 => {
                cleanup_pass(ctx, &mut decoder).ok_or(J2kError::CorruptCodeblock)?;
                if style.segmentation_symbols && !verify_segmentation_symbol(ctx, &mut decoder) {
                    if !lenient {
                        return Err(J2kError::CorruptCodeblock);
                    }
                    warn!("segmentation symbol mismatch; zero-filling remainder");
                    recovered = true;
                    break;
                }
                ctx.visited.iter_mut().for_each(|v| *v = 0);
            }
            1 => significance_pass(ctx, &mut decoder),
            _ => refinement_pass(ctx, &mut decoder),
        }

        if style.reset_probabilities {
            ctx.reset_contexts();
        }
    }

    // Planes never reached decode as zero (quality truncation semantics).
    for magnitude in &mut ctx.magnitudes {
        while magnitude.count < magnitude_bits {
            magnitude.push(0);
        }
    }

    let coefficients = ctx
        .magnitudes
        .iter()
        .zip(ctx.signs.iter())
        .map(|(m, &sign)| {
            let value = m.bits as i32;
            if sign != 0 { -value } else { value }
        })
        .collect();

    Ok(DecodeOutcome {
        coefficients,
        recovered,
    })
}

/// Segmentation symbol: four bits 1010 in the uniform context (D.5).
fn verify_segmentation_symbol(ctx: &mut BlockContext, decoder: &mut MqDecoder) -> bool {
    let mut symbol = 0u32;
    for _ in 0..4 {
        symbol = (symbol << 1) | decoder.decode(&mut ctx.contexts[CTX_UNIFORM as usize]);
    }
    symbol == 0b1010
}

/// Significance propagation pass (D.3.1): insignificant coefficients with a
/// significant neighborhood.
fn significance_pass(ctx: &mut BlockContext, decoder: &mut MqDecoder) {
    for (x, y) in StripeIter::new(ctx.width, ctx.height) {
        let index = ctx.index(x, y);
        if ctx.significant[index] == 0 && ctx.neighborhood(x, y) != 0 {
            let label = ctx.zero_coding_context(x, y);
            let bit = decoder.decode(&mut ctx.contexts[label as usize]);
            ctx.magnitudes[index].push(bit);
            ctx.visited[index] = 1;
            if bit == 1 {
                decode_sign(ctx, decoder, x, y);
                ctx.significant[index] = 1;
            }
        }
    }
}

/// Magnitude refinement pass (D.3.3): coefficients already significant
/// before this plane.
fn refinement_pass(ctx: &mut BlockContext, decoder: &mut MqDecoder) {
    for (x, y) in StripeIter::new(ctx.width, ctx.height) {
        let index = ctx.index(x, y);
        if ctx.significant[index] != 0 && ctx.visited[index] == 0 {
            let label = ctx.refinement_context(x, y);
            let bit = decoder.decode(&mut ctx.contexts[label as usize]);
            ctx.magnitudes[index].push(bit);
            ctx.refined[index] = 1;
        }
    }
}

/// Cleanup pass (D.3.4) with run-length coding of all-clear columns.
fn cleanup_pass(ctx: &mut BlockContext, decoder: &mut MqDecoder) -> Option<()> {
    let mut positions = StripeIter::new(ctx.width, ctx.height);

    while let Some((mut x, mut y)) = positions.next() {
        let index = ctx.index(x, y);
        if ctx.significant[index] != 0 || ctx.visited[index] != 0 {
            continue;
        }

        // Run-length mode: a full stripe column whose members all have
        // clear neighborhoods.
        let run_length_eligible = y % 4 == 0
            && ctx.height - y >= 4
            && (0..4).all(|dy| ctx.neighborhood(x, y + dy) == 0);

        let bit = if run_length_eligible {
            if decoder.decode(&mut ctx.contexts[CTX_RUN as usize]) == 0 {
                // The whole column stays insignificant.
                let mut i = ctx.index(x, y);
                ctx.magnitudes[i].push(0);
                for _ in 0..3 {
                    (x, y) = positions.next()?;
                    i = ctx.index(x, y);
                    ctx.magnitudes[i].push(0);
                }
                continue;
            }
            // Two uniform-context bits give the row of the first
            // significant coefficient.
            let mut zeros = decoder.decode(&mut ctx.contexts[CTX_UNIFORM as usize]);
            zeros = (zeros << 1) | decoder.decode(&mut ctx.contexts[CTX_UNIFORM as usize]);
            for _ in 0..zeros {
                let i = ctx.index(x, y);
                ctx.magnitudes[i].push(0);
                (x, y) = positions.next()?;
            }
            1
        } else {
            let label = ctx.zero_coding_context(x, y);
            decoder.decode(&mut ctx.contexts[label as usize])
        };

        let index = ctx.index(x, y);
        ctx.magnitudes[index].push(bit);
        if bit == 1 {
            decode_sign(ctx, decoder, x, y);
            ctx.significant[index] = 1;
        }
    }

    Some(())
}

/// Sign decoding (D.3.2).
fn decode_sign(ctx: &mut BlockContext, decoder: &mut MqDecoder, x: u32, y: u32) {
    let (label, xor) = ctx.sign_context(x, y);
    let bit = decoder.decode(&mut ctx.contexts[label as usize]) ^ xor;
    let index = ctx.index(x, y);
    ctx.signs[index] = bit as u8;
}

/// Stripe-oriented scan (D.2): columns of four rows, left to right, then the
/// next stripe of four rows.
struct StripeIter {
    width: u32,
    height: u32,
    stripe_top: u32,
    x: u32,
    y: u32,
}

impl StripeIter {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stripe_top: 0,
            x: 0,
            y: 0,
        }
    }
}

impl Iterator for StripeIter {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<Self::Item> {
        if self.y >= self.height || self.y == self.stripe_top + 4 {
            self.x += 1;
            self.y = self.stripe_top;
        }
        if self.x >= self.width {
            self.x = 0;
            self.stripe_top += 4;
            self.y = self.stripe_top;
        }
        if self.y >= self.height {
            return None;
        }
        let pos = (self.x, self.y);
        self.y += 1;
        Some(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_simple(
        data: &[u8],
        width: u32,
        height: u32,
        band: SubbandOrientation,
        passes: u32,
        missing: u8,
        magnitude_bits: u8,
    ) -> Vec<i32> {
        let mut ctx = BlockContext::default();
        decode_codeblock(
            data,
            width,
            height,
            band,
            passes,
            missing,
            magnitude_bits,
            &CodeBlockStyle::default(),
            false,
            &mut ctx,
        )
        .unwrap()
        .coefficients
    }

    #[test]
    fn stripe_scan_order() {
        let produced: Vec<_> = StripeIter::new(5, 10).collect();
        #[rustfmt::skip]
        let expected = [
            (0, 0), (0, 1), (0, 2), (0, 3),
            (1, 0), (1, 1), (1, 2), (1, 3),
            (2, 0), (2, 1), (2, 2), (2, 3),
            (3, 0), (3, 1), (3, 2), (3, 3),
            (4, 0), (4, 1), (4, 2), (4, 3),
            (0, 4), (0, 5), (0, 6), (0, 7),
            (1, 4), (1, 5), (1, 6), (1, 7),
            (2, 4), (2, 5), (2, 6), (2, 7),
            (3, 4), (3, 5), (3, 6), (3, 7),
            (4, 4), (4, 5), (4, 6), (4, 7),
            (0, 8), (0, 9), (1, 8), (1, 9),
            (2, 8), (2, 9), (3, 8), (3, 9),
            (4, 8), (4, 9),
        ];
        assert_eq!(produced, expected);
    }

    // Worked example from ISO/IEC 15444-1 Section J.10.4, first packet:
    // a 1x5 LL code-block with 16 coding passes over 6 magnitude bits.
    #[test]
    fn annex_j_example_first_block() {
        let data = [0x01, 0x8F, 0x0D, 0xC8, 0x75, 0x5D];
        let coefficients = decode_simple(&data, 1, 5, SubbandOrientation::LL, 16, 0, 6);
        assert_eq!(coefficients, vec![-26, -22, -30, -32, -19]);
    }

    // Second packet from the same example: 1x4 LH block, 7 passes, 3 bits.
    #[test]
    fn annex_j_example_second_block() {
        let data = [0x0F, 0xB1, 0x76];
        let coefficients = decode_simple(&data, 1, 4, SubbandOrientation::LH, 7, 0, 3);
        assert_eq!(coefficients, vec![1, 5, 1, 0]);
    }

    #[test]
    fn zero_passes_decode_to_zero() {
        let coefficients = decode_simple(&[], 4, 4, SubbandOrientation::HL, 0, 2, 8);
        assert_eq!(coefficients, vec![0; 16]);
    }

    #[test]
    fn pass_count_beyond_plane_capacity_is_invalid() {
        let mut ctx = BlockContext::default();
        let result = decode_codeblock(
            &[0x00],
            4,
            4,
            SubbandOrientation::LL,
            30,
            0,
            6,
            &CodeBlockStyle::default(),
            false,
            &mut ctx,
        );
        assert_eq!(result.unwrap_err(), J2kError::InvalidMarker);
    }

    #[test]
    fn all_zero_block_decodes_cleanly_from_no_data() {
        // A block whose every decision is the most probable symbol consumes
        // almost no coded bits, so an empty segment still decodes to zeros
        // without tripping the corruption bound.
        let coefficients = decode_simple(&[], 1, 5, SubbandOrientation::LL, 16, 0, 6);
        assert_eq!(coefficients, vec![0; 5]);
    }

    #[test]
    fn truncated_block_errors_or_recovers() {
        // Two bytes of high-entropy interval state feeding 16 passes over an
        // 8x8 block: the decoder runs far past the segment end and must
        // notice. Strict mode reports corruption, lenient mode zero-fills
        // from the failure point instead of inventing planes.
        let data = [0x00, 0x00];
        let mut ctx = BlockContext::default();
        let strict = decode_codeblock(
            &data,
            8,
            8,
            SubbandOrientation::LL,
            16,
            0,
            6,
            &CodeBlockStyle::default(),
            false,
            &mut ctx,
        );
        assert_eq!(strict.unwrap_err(), J2kError::CorruptCodeblock);

        let lenient = decode_codeblock(
            &data,
            8,
            8,
            SubbandOrientation::LL,
            16,
            0,
            6,
            &CodeBlockStyle::default(),
            true,
            &mut ctx,
        )
        .unwrap();
        assert!(lenient.recovered);
        assert_eq!(lenient.coefficients.len(), 64);
    }
}
