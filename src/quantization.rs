//! Scalar quantization (ISO/IEC 15444-1 Annex E).

use crate::error::J2kError;
use crate::image::{Quantization, QuantizationStyle, StepSize, SubbandOrientation, WaveletKind};

/// Per-subband quantization parameters resolved from the QCD marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandQuantization {
    /// Quantization step size (E-3). 1.0 on the reversible path.
    pub delta: f32,
    /// Number of magnitude bit-planes, Mb (E-2).
    pub magnitude_bits: u8,
}

/// Index of a subband's signalled step size: LL first, then HL/LH/HH triplets
/// per resolution.
fn step_index(resolution: usize, orientation: SubbandOrientation) -> usize {
    if resolution == 0 {
        0
    } else {
        let band = match orientation {
            SubbandOrientation::HL => 0,
            SubbandOrientation::LH => 1,
            SubbandOrientation::HH => 2,
            SubbandOrientation::LL => 0,
        };
        1 + (resolution - 1) * 3 + band
    }
}

fn signalled_step(
    quantization: &Quantization,
    resolution: usize,
    orientation: SubbandOrientation,
) -> Result<StepSize, J2kError> {
    match quantization.style {
        QuantizationStyle::ScalarDerived => {
            // E.1.1: epsilon_b = epsilon_0 - N + n_b, mantissa carried over.
            let base = quantization.steps.first().ok_or(J2kError::InvalidMarker)?;
            let drop = if resolution == 0 {
                0
            } else {
                resolution as u8 - 1
            };
            Ok(StepSize {
                exponent: base.exponent.saturating_sub(drop),
                mantissa: base.mantissa,
            })
        }
        QuantizationStyle::None | QuantizationStyle::ScalarExpounded => {
            let index = step_index(resolution, orientation);
            quantization
                .steps
                .get(index)
                .copied()
                .ok_or(J2kError::InvalidMarker)
        }
    }
}

/// Resolve the step size and magnitude bit count for one subband.
pub fn band_quantization(
    quantization: &Quantization,
    transform: WaveletKind,
    component_depth: u8,
    resolution: usize,
    orientation: SubbandOrientation,
) -> Result<BandQuantization, J2kError> {
    let step = signalled_step(quantization, resolution, orientation)?;
    let magnitude_bits = quantization.guard_bits + step.exponent.saturating_sub(1);
    if magnitude_bits > 31 {
        return Err(J2kError::UnsupportedFeature(
            "more than 31 magnitude bit-planes",
        ));
    }

    let delta = match transform {
        WaveletKind::Reversible53 => 1.0,
        WaveletKind::Irreversible97 => {
            // E-3 with Rb = component depth + subband gain.
            let rb = component_depth as i32 + orientation.gain_log2() as i32;
            (1.0 + step.mantissa as f32 / 2048.0) * 2.0f32.powi(rb - step.exponent as i32)
        }
    };

    Ok(BandQuantization {
        delta,
        magnitude_bits,
    })
}

/// Midpoint reconstruction of a quantized coefficient.
pub fn dequantize(q: i32, delta: f32) -> f32 {
    if q == 0 {
        return 0.0;
    }
    let sign = if q > 0 { 1.0 } else { -1.0 };
    (q.unsigned_abs() as f32 + 0.5) * delta * sign
}
