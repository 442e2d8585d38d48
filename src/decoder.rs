//! Decode orchestration: container unwrap, parse, per-tile decoding, and
//! final assembly.

use crate::assemble::{self, ComponentPlane, Raster};
use crate::error::J2kError;
use crate::image::{PixelBuffer, Tile};
use crate::jp2;
use crate::packet;
use crate::parser::CodestreamParser;
use rayon::prelude::*;

/// Decode-time behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Recover from truncated or corrupt entropy data by zero-filling the
    /// remainder instead of failing the decode. Every recovery is counted in
    /// the [`DecodeSummary`] and logged.
    pub lenient: bool,
}

/// What a decode did, alongside the pixel buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecodeSummary {
    /// Code-blocks whose coding passes were entropy-decoded.
    pub codeblocks_decoded: u32,
    /// Code-blocks partially zero-filled by lenient recovery.
    pub codeblocks_recovered: u32,
    /// Tiles whose packet stream ended early in lenient mode.
    pub truncated_tiles: u32,
}

/// One-shot decoder over a borrowed compressed buffer. All working state is
/// scoped to a single `decode` call; instances are cheap and independent.
pub struct J2kDecoder<'a> {
    data: &'a [u8],
    options: DecodeOptions,
}

impl<'a> J2kDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            options: DecodeOptions::default(),
        }
    }

    pub fn with_options(data: &'a [u8], options: DecodeOptions) -> Self {
        Self { data, options }
    }

    /// Run the full pipeline: locate the codestream, parse its structure,
    /// decode every tile, and assemble the raster. Either a complete valid
    /// buffer is returned or an error; no partial output escapes.
    pub fn decode(&self) -> Result<(PixelBuffer, DecodeSummary), J2kError> {
        let codestream = jp2::unwrap_codestream(self.data)?;
        let parsed = CodestreamParser::new(codestream).parse()?;
        let lenient = self.options.lenient;

        let mut raster = Raster::new(&parsed.header);
        let mut summary = DecodeSummary::default();

        for plan in &parsed.tiles {
            let mut tile_data = Vec::new();
            for part in &plan.parts {
                tile_data.extend_from_slice(&codestream[part.clone()]);
            }

            let mut tile = Tile::build(&parsed.header, &parsed.cod, plan.index);
            let tier2 = packet::read_tile_packets(&mut tile, &tile_data, &parsed.cod, lenient)?;
            if tier2.truncated {
                summary.truncated_tiles += 1;
            }

            // Tile-components are independent up to assembly; decode them in
            // parallel and join before the multi-component transform.
            let results: Vec<_> = tile
                .components
                .par_iter()
                .enumerate()
                .map(|(index, tc)| {
                    assemble::decode_tile_component(
                        tc,
                        &parsed.cod,
                        &parsed.qcd,
                        &parsed.header.components[index],
                        lenient,
                    )
                })
                .collect();

            let mut planes: Vec<ComponentPlane> = Vec::with_capacity(results.len());
            for result in results {
                let (plane, stats) = result?;
                summary.codeblocks_decoded += stats.codeblocks_decoded;
                summary.codeblocks_recovered += stats.codeblocks_recovered;
                planes.push(plane);
            }

            if parsed.cod.mct {
                assemble::inverse_multi_component_transform(&mut planes)?;
            }

            raster.write_tile(
                tile.components[0].rect,
                &planes,
                &parsed.header.components[0],
            )?;
        }

        let pixels = raster.into_pixel_buffer(&parsed.header)?;
        Ok((pixels, summary))
    }
}
