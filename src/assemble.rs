//! Tile-component reconstruction and raster assembly.
//!
//! Per tile-component: entropy-decode every code-block, dequantize into
//! subband planes, run the inverse wavelet transform per resolution level.
//! Per tile: apply the inverse multi-component transform when signalled,
//! undo the DC level shift, clamp to the declared range, and write the tile
//! rectangle into the full-image raster.

use crate::bit_plane::{self, BlockContext};
use crate::dwt::{Dwt53, Dwt97};
use crate::error::J2kError;
use crate::image::{
    CodingStyle, ComponentInfo, ImageHeader, PixelBuffer, Quantization, Rect, SampleBuffer,
    Subband, TileComponent, WaveletKind,
};
use crate::quantization::{self, BandQuantization};

/// Reconstructed spatial samples of one tile-component, before the
/// multi-component transform and level shift.
pub enum ComponentPlane {
    /// Reversible path: exact integers.
    Int(Vec<i32>),
    /// Irreversible path: dequantized floats.
    Float(Vec<f32>),
}

/// Per-tile-component decode accounting, reported up through
/// `DecodeSummary`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComponentStats {
    pub codeblocks_decoded: u32,
    pub codeblocks_recovered: u32,
}

/// Entropy-decode and inverse-transform one tile-component.
pub fn decode_tile_component(
    tc: &TileComponent,
    cod: &CodingStyle,
    qcd: &Quantization,
    info: &ComponentInfo,
    lenient: bool,
) -> Result<(ComponentPlane, ComponentStats), J2kError> {
    let mut stats = ComponentStats::default();
    let mut block_ctx = BlockContext::default();

    // Quantized coefficient planes per subband, in tile-tree order.
    let mut band_planes: Vec<Vec<Vec<i32>>> = Vec::with_capacity(tc.resolutions.len());
    let mut band_quants: Vec<Vec<BandQuantization>> = Vec::with_capacity(tc.resolutions.len());
    for (r, resolution) in tc.resolutions.iter().enumerate() {
        let mut planes = Vec::with_capacity(resolution.subbands.len());
        let mut quants = Vec::with_capacity(resolution.subbands.len());
        for band in &resolution.subbands {
            let quant =
                quantization::band_quantization(qcd, cod.transform, info.depth, r, band.orientation)?;
            planes.push(decode_subband(band, cod, quant, lenient, &mut block_ctx, &mut stats)?);
            quants.push(quant);
        }
        band_planes.push(planes);
        band_quants.push(quants);
    }

    let plane = match cod.transform {
        WaveletKind::Reversible53 => {
            let mut current = band_planes[0][0].clone();
            for r in 1..tc.resolutions.len() {
                let rect = tc.resolutions[r].rect;
                let [hl, lh, hh] = &band_planes[r][..] else {
                    return Err(J2kError::GeometryMismatch);
                };
                let mut next = vec![0i32; rect.area()];
                Dwt53::inverse_2d(&current, hl, lh, hh, rect, &mut next);
                current = next;
            }
            ComponentPlane::Int(current)
        }
        WaveletKind::Irreversible97 => {
            let dequantized = |plane: &[i32], quant: BandQuantization| -> Vec<f32> {
                plane
                    .iter()
                    .map(|&q| quantization::dequantize(q, quant.delta))
                    .collect()
            };
            let mut current = dequantized(&band_planes[0][0], band_quants[0][0]);
            for r in 1..tc.resolutions.len() {
                let rect = tc.resolutions[r].rect;
                let hl = dequantized(&band_planes[r][0], band_quants[r][0]);
                let lh = dequantized(&band_planes[r][1], band_quants[r][1]);
                let hh = dequantized(&band_planes[r][2], band_quants[r][2]);
                let mut next = vec![0f32; rect.area()];
                Dwt97::inverse_2d(&current, &hl, &lh, &hh, rect, &mut next);
                current = next;
            }
            ComponentPlane::Float(current)
        }
    };

    let samples = match &plane {
        ComponentPlane::Int(v) => v.len(),
        ComponentPlane::Float(v) => v.len(),
    };
    if samples != tc.rect.area() {
        return Err(J2kError::GeometryMismatch);
    }

    Ok((plane, stats))
}

/// Decode every code-block of one subband into its coefficient plane.
fn decode_subband(
    band: &Subband,
    cod: &CodingStyle,
    quant: BandQuantization,
    lenient: bool,
    block_ctx: &mut BlockContext,
    stats: &mut ComponentStats,
) -> Result<Vec<i32>, J2kError> {
    let mut plane = vec![0i32; band.rect.area()];
    let band_width = band.rect.width() as usize;

    for cb in &band.codeblocks {
        if !cb.included || cb.coding_passes == 0 {
            continue;
        }
        let outcome = bit_plane::decode_codeblock(
            &cb.data,
            cb.rect.width(),
            cb.rect.height(),
            band.orientation,
            cb.coding_passes,
            cb.missing_bit_planes,
            quant.magnitude_bits,
            &cod.codeblock_style,
            lenient,
            block_ctx,
        )?;
        stats.codeblocks_decoded += 1;
        if outcome.recovered {
            stats.codeblocks_recovered += 1;
        }

        let x_offset = (cb.rect.x0 - band.rect.x0) as usize;
        let y_offset = (cb.rect.y0 - band.rect.y0) as usize;
        let cb_width = cb.rect.width() as usize;
        for (row, in_row) in outcome.coefficients.chunks_exact(cb_width).enumerate() {
            let start = (y_offset + row) * band_width + x_offset;
            plane[start..start + cb_width].copy_from_slice(in_row);
        }
    }

    Ok(plane)
}

/// Inverse multi-component transform across the first three components
/// (G.2): the reversible RCT with the 5/3 path, the irreversible ICT with
/// the 9/7 path.
pub fn inverse_multi_component_transform(planes: &mut [ComponentPlane]) -> Result<(), J2kError> {
    if planes.len() < 3 {
        return Err(J2kError::InvalidMarker);
    }
    let (first, rest) = planes.split_at_mut(1);
    let (second, third) = rest.split_at_mut(1);

    match (&mut first[0], &mut second[0], &mut third[0]) {
        (ComponentPlane::Int(c0), ComponentPlane::Int(c1), ComponentPlane::Int(c2)) => {
            if c0.len() != c1.len() || c1.len() != c2.len() {
                return Err(J2kError::GeometryMismatch);
            }
            for i in 0..c0.len() {
                let (y, cb, cr) = (c0[i], c1[i], c2[i]);
                let g = y - ((cb + cr) >> 2);
                c0[i] = cr + g;
                c1[i] = g;
                c2[i] = cb + g;
            }
        }
        (ComponentPlane::Float(c0), ComponentPlane::Float(c1), ComponentPlane::Float(c2)) => {
            if c0.len() != c1.len() || c1.len() != c2.len() {
                return Err(J2kError::GeometryMismatch);
            }
            for i in 0..c0.len() {
                let (y, cb, cr) = (c0[i], c1[i], c2[i]);
                c0[i] = y + 1.402 * cr;
                c1[i] = y - 0.34413 * cb - 0.71414 * cr;
                c2[i] = y + 1.772 * cb;
            }
        }
        _ => return Err(J2kError::GeometryMismatch),
    }
    Ok(())
}

/// Full-image staging raster, one integer plane per component.
pub struct Raster {
    planes: Vec<Vec<i32>>,
    width: u32,
    height: u32,
    x0: u32,
    y0: u32,
}

impl Raster {
    pub fn new(header: &ImageHeader) -> Self {
        let (width, height) = header.component_size(0);
        let info = &header.components[0];
        Self {
            planes: vec![vec![0i32; width as usize * height as usize]; header.components.len()],
            width,
            height,
            x0: header.x_origin.div_ceil(info.dx as u32),
            y0: header.y_origin.div_ceil(info.dy as u32),
        }
    }

    /// Undo the DC level shift, clamp to the component range, and write one
    /// tile's planes at their raster offsets (G.1.2).
    pub fn write_tile(
        &mut self,
        tile_rect: Rect,
        planes: &[ComponentPlane],
        info: &ComponentInfo,
    ) -> Result<(), J2kError> {
        let shift = if info.is_signed {
            0
        } else {
            1i32 << (info.depth - 1)
        };
        let (low, high) = if info.is_signed {
            (-(1i32 << (info.depth - 1)), (1i32 << (info.depth - 1)) - 1)
        } else {
            (0, (1i32 << info.depth) - 1)
        };

        let tile_width = tile_rect.width() as usize;
        let tile_height = tile_rect.height() as usize;

        for (component, plane) in planes.iter().enumerate() {
            let length = match plane {
                ComponentPlane::Int(v) => v.len(),
                ComponentPlane::Float(v) => v.len(),
            };
            if length != tile_rect.area() {
                return Err(J2kError::GeometryMismatch);
            }

            let out = &mut self.planes[component];
            for row in 0..tile_height {
                let gy = tile_rect.y0 + row as u32;
                let out_start =
                    ((gy - self.y0) as usize) * self.width as usize + (tile_rect.x0 - self.x0) as usize;
                let in_start = row * tile_width;
                match plane {
                    ComponentPlane::Int(v) => {
                        for (o, &s) in out[out_start..out_start + tile_width]
                            .iter_mut()
                            .zip(&v[in_start..in_start + tile_width])
                        {
                            *o = (s + shift).clamp(low, high);
                        }
                    }
                    ComponentPlane::Float(v) => {
                        for (o, &s) in out[out_start..out_start + tile_width]
                            .iter_mut()
                            .zip(&v[in_start..in_start + tile_width])
                        {
                            *o = (s.round() as i32 + shift).clamp(low, high);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Interleave the component planes into the final pixel buffer.
    pub fn into_pixel_buffer(self, header: &ImageHeader) -> Result<PixelBuffer, J2kError> {
        let info = header.components[0];
        let components = header.components.len();
        let pixels = self.width as usize * self.height as usize;

        let mut interleaved = Vec::with_capacity(pixels * components);
        for i in 0..pixels {
            for plane in &self.planes {
                interleaved.push(plane[i]);
            }
        }

        let samples = match (info.is_signed, info.depth) {
            (false, depth) if depth <= 8 => {
                SampleBuffer::U8(interleaved.iter().map(|&v| v as u8).collect())
            }
            (true, depth) if depth <= 8 => {
                SampleBuffer::I8(interleaved.iter().map(|&v| v as i8).collect())
            }
            (false, _) => SampleBuffer::U16(interleaved.iter().map(|&v| v as u16).collect()),
            (true, _) => SampleBuffer::I16(interleaved.iter().map(|&v| v as i16).collect()),
        };

        let buffer = PixelBuffer {
            width: self.width,
            height: self.height,
            components: components as u32,
            bit_depth: info.depth,
            is_signed: info.is_signed,
            samples,
        };
        buffer.validate()?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rct_roundtrip_values() {
        // Forward RCT of (r, g, b) = (100, 120, 140):
        // y = floor((100 + 2*120 + 140) / 4) = 120, cb = b - g = 20,
        // cr = r - g = -20.
        let mut planes = vec![
            ComponentPlane::Int(vec![120]),
            ComponentPlane::Int(vec![20]),
            ComponentPlane::Int(vec![-20]),
        ];
        inverse_multi_component_transform(&mut planes).unwrap();
        let values: Vec<i32> = planes
            .iter()
            .map(|p| match p {
                ComponentPlane::Int(v) => v[0],
                ComponentPlane::Float(_) => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![100, 120, 140]);
    }

    #[test]
    fn ict_reconstructs_gray() {
        // Neutral chroma leaves a gray pixel untouched.
        let mut planes = vec![
            ComponentPlane::Float(vec![64.0]),
            ComponentPlane::Float(vec![0.0]),
            ComponentPlane::Float(vec![0.0]),
        ];
        inverse_multi_component_transform(&mut planes).unwrap();
        for p in &planes {
            match p {
                ComponentPlane::Float(v) => assert!((v[0] - 64.0).abs() < 1e-4),
                ComponentPlane::Int(_) => unreachable!(),
            }
        }
    }

    #[test]
    fn mct_requires_three_components() {
        let mut planes = vec![ComponentPlane::Int(vec![0])];
        assert_eq!(
            inverse_multi_component_transform(&mut planes).unwrap_err(),
            J2kError::InvalidMarker
        );
    }

    #[test]
    fn raster_level_shift_and_clamp() {
        use crate::image::{ComponentInfo, ImageHeader};
        let header = ImageHeader {
            width: 2,
            height: 1,
            tile_width: 2,
            tile_height: 1,
            components: vec![ComponentInfo {
                depth: 8,
                is_signed: false,
                dx: 1,
                dy: 1,
            }],
            ..Default::default()
        };
        let mut raster = Raster::new(&header);
        raster
            .write_tile(
                Rect::new(0, 0, 2, 1),
                &[ComponentPlane::Int(vec![0, 1000])],
                &header.components[0],
            )
            .unwrap();
        let buffer = raster.into_pixel_buffer(&header).unwrap();
        assert_eq!(buffer.samples, SampleBuffer::U8(vec![128, 255]));
    }
}
