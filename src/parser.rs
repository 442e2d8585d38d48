//! Codestream marker-segment parsing (ISO/IEC 15444-1 Annex A).
//!
//! Walks the main header and every tile-part header, producing the image
//! geometry, the coding parameters, and one decode plan per tile referencing
//! the byte ranges of its bitstream data.

use crate::error::J2kError;
use crate::image::{
    CodeBlockStyle, CodingStyle, ComponentInfo, ImageHeader, ProgressionOrder, Quantization,
    QuantizationStyle, StepSize, TileDecodePlan, WaveletKind,
};
use crate::marker::Marker;
use crate::reader::ByteReader;
use log::{debug, warn};

/// Everything the decode pipeline needs, extracted in one pass.
#[derive(Debug, Clone)]
pub struct ParsedCodestream {
    pub header: ImageHeader,
    pub cod: CodingStyle,
    pub qcd: Quantization,
    pub tiles: Vec<TileDecodePlan>,
}

pub struct CodestreamParser<'a> {
    reader: ByteReader<'a>,
    data: &'a [u8],
    header: Option<ImageHeader>,
    cod: Option<CodingStyle>,
    qcd: Option<Quantization>,
}

impl<'a> CodestreamParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: ByteReader::new(data),
            data,
            header: None,
            cod: None,
            qcd: None,
        }
    }

    /// Parse the complete codestream structure without decoding any
    /// entropy-coded data.
    pub fn parse(mut self) -> Result<ParsedCodestream, J2kError> {
        if self.reader.read_u16()? != Marker::StartOfCodestream as u16 {
            return Err(J2kError::InvalidMarker);
        }
        // SIZ must immediately follow SOC.
        if self.read_marker()? != Marker::ImageAndTileSize {
            return Err(J2kError::InvalidMarker);
        }
        self.parse_siz()?;

        // Main header segments until the first tile-part.
        loop {
            let marker = self.read_marker()?;
            match marker {
                Marker::CodingStyleDefault => self.parse_cod()?,
                Marker::QuantizationDefault => self.parse_qcd()?,
                Marker::Capability => self.parse_cap()?,
                Marker::Comment
                | Marker::TilePartLengths
                | Marker::PacketLengthsMain
                | Marker::ComponentRegistration => self.skip_segment(marker)?,
                Marker::CodingStyleComponent => {
                    return Err(J2kError::UnsupportedFeature(
                        "per-component coding styles (COC)",
                    ));
                }
                Marker::QuantizationComponent => {
                    return Err(J2kError::UnsupportedFeature(
                        "per-component quantization (QCC)",
                    ));
                }
                Marker::RegionOfInterest => {
                    return Err(J2kError::UnsupportedFeature("regions of interest (RGN)"));
                }
                Marker::ProgressionOrderChange => {
                    return Err(J2kError::UnsupportedFeature(
                        "progression order changes (POC)",
                    ));
                }
                Marker::PackedPacketHeadersMain | Marker::PackedPacketHeadersTile => {
                    return Err(J2kError::UnsupportedFeature("packed packet headers"));
                }
                Marker::StartOfTile => break,
                _ => return Err(J2kError::InvalidMarker),
            }
        }

        let header = self.header.take().ok_or(J2kError::InvalidMarker)?;
        let cod = self.cod.take().ok_or(J2kError::InvalidMarker)?;
        let qcd = self.qcd.take().ok_or(J2kError::InvalidMarker)?;

        // Reversible coding pairs with the no-quantization style, the
        // irreversible filter with a scalar style (Annex E).
        let styles_consistent = match cod.transform {
            WaveletKind::Reversible53 => qcd.style == QuantizationStyle::None,
            WaveletKind::Irreversible97 => qcd.style != QuantizationStyle::None,
        };
        if !styles_consistent {
            return Err(J2kError::InvalidMarker);
        }

        let mut tiles: Vec<TileDecodePlan> = (0..header.tile_count())
            .map(|index| TileDecodePlan {
                index,
                parts: Vec::new(),
            })
            .collect();

        // Tile-part loop; the SOT marker code is already consumed.
        loop {
            let finished = self.parse_tile_part(&header, &mut tiles)?;
            if finished {
                break;
            }
            match self.read_marker() {
                Ok(Marker::StartOfTile) => continue,
                Ok(Marker::EndOfCodestream) => {
                    if !self.reader.is_empty() {
                        debug!(
                            "{} trailing bytes after EOC ignored",
                            self.reader.remaining().len()
                        );
                    }
                    break;
                }
                Ok(_) => return Err(J2kError::InvalidMarker),
                Err(J2kError::TruncatedStream) => {
                    warn!("codestream ends without an EOC marker");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(ParsedCodestream {
            header,
            cod,
            qcd,
            tiles,
        })
    }

    fn read_marker(&mut self) -> Result<Marker, J2kError> {
        let code = self.reader.read_u16()?;
        if code >> 8 != 0xFF {
            return Err(J2kError::InvalidMarker);
        }
        match Marker::try_from(code) {
            Ok(marker) => Ok(marker),
            Err(_) => {
                // Reserved 0xFF30..=0xFF3F codes stand alone; other unknown
                // markers carry a segment we can skip.
                if (0xFF30..=0xFF3F).contains(&code) {
                    debug!("skipping reserved marker {code:#06X}");
                    return self.read_marker();
                }
                debug!("skipping unknown marker segment {code:#06X}");
                let len = self.reader.read_u16()?;
                if len < 2 {
                    return Err(J2kError::InvalidMarker);
                }
                self.reader.advance(len as usize - 2)?;
                self.read_marker()
            }
        }
    }

    fn skip_segment(&mut self, marker: Marker) -> Result<(), J2kError> {
        debug!("skipping {marker:?} segment");
        let len = self.reader.read_u16()?;
        if len < 2 {
            return Err(J2kError::InvalidMarker);
        }
        self.reader.advance(len as usize - 2)
    }

    fn parse_siz(&mut self) -> Result<(), J2kError> {
        let len = self.reader.read_u16()?;
        let rsiz = self.reader.read_u16()?;
        if rsiz > 2 {
            return Err(J2kError::UnsupportedFeature("capability profile (Rsiz)"));
        }

        let width = self.reader.read_u32()?;
        let height = self.reader.read_u32()?;
        let x_origin = self.reader.read_u32()?;
        let y_origin = self.reader.read_u32()?;
        let tile_width = self.reader.read_u32()?;
        let tile_height = self.reader.read_u32()?;
        let tile_x_origin = self.reader.read_u32()?;
        let tile_y_origin = self.reader.read_u32()?;
        let component_count = self.reader.read_u16()?;

        if len != 38 + 3 * component_count {
            return Err(J2kError::InvalidMarker);
        }
        if width <= x_origin
            || height <= y_origin
            || tile_width == 0
            || tile_height == 0
            || component_count == 0
        {
            return Err(J2kError::InvalidMarker);
        }
        // The first tile must cover the image origin (B.3).
        if tile_x_origin > x_origin
            || tile_y_origin > y_origin
            || tile_x_origin.saturating_add(tile_width) <= x_origin
            || tile_y_origin.saturating_add(tile_height) <= y_origin
        {
            return Err(J2kError::InvalidMarker);
        }

        let mut components = Vec::with_capacity(component_count as usize);
        for _ in 0..component_count {
            let ssiz = self.reader.read_u8()?;
            let depth = (ssiz & 0x7F) + 1;
            let is_signed = ssiz & 0x80 != 0;
            let dx = self.reader.read_u8()?;
            let dy = self.reader.read_u8()?;
            if dx == 0 || dy == 0 {
                return Err(J2kError::InvalidMarker);
            }
            if depth > 16 {
                return Err(J2kError::UnsupportedFeature("bit depth above 16"));
            }
            components.push(ComponentInfo {
                depth,
                is_signed,
                dx,
                dy,
            });
        }
        if components
            .iter()
            .any(|c| c.dx != components[0].dx || c.dy != components[0].dy)
        {
            return Err(J2kError::UnsupportedFeature("mixed component subsampling"));
        }
        // One storage dtype per image: interleaved output cannot mix sample
        // formats.
        if components
            .iter()
            .any(|c| c.depth != components[0].depth || c.is_signed != components[0].is_signed)
        {
            return Err(J2kError::UnsupportedFeature(
                "mixed component sample formats",
            ));
        }

        self.header = Some(ImageHeader {
            width,
            height,
            x_origin,
            y_origin,
            tile_width,
            tile_height,
            tile_x_origin,
            tile_y_origin,
            components,
        });
        Ok(())
    }

    fn parse_cod(&mut self) -> Result<(), J2kError> {
        let len = self.reader.read_u16()?;
        let scod = self.reader.read_u8()?;
        if scod & 0x01 != 0 {
            return Err(J2kError::UnsupportedFeature("user-defined precincts"));
        }
        let has_sop = scod & 0x02 != 0;
        let has_eph = scod & 0x04 != 0;

        let progression = ProgressionOrder::try_from(self.reader.read_u8()?)
            .map_err(|_| J2kError::InvalidMarker)?;
        if progression != ProgressionOrder::LayerResolutionComponentPosition {
            return Err(J2kError::UnsupportedFeature("progression order"));
        }
        let layers = self.reader.read_u16()?;
        if layers == 0 {
            return Err(J2kError::InvalidMarker);
        }
        let mct = match self.reader.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(J2kError::InvalidMarker),
        };

        let decomposition_levels = self.reader.read_u8()?;
        if decomposition_levels > 32 {
            return Err(J2kError::InvalidMarker);
        }
        let xcb = self.reader.read_u8()? & 0x0F;
        let ycb = self.reader.read_u8()? & 0x0F;
        if xcb > 8 || ycb > 8 || xcb + ycb > 8 {
            return Err(J2kError::InvalidMarker);
        }
        let style_flags = self.reader.read_u8()?;
        let codeblock_style = CodeBlockStyle::from_flags(style_flags);
        if codeblock_style.selective_bypass
            || codeblock_style.termination_on_each_pass
            || codeblock_style.predictable_termination
        {
            return Err(J2kError::UnsupportedFeature("code-block style"));
        }
        let transform = match self.reader.read_u8()? {
            0 => WaveletKind::Irreversible97,
            1 => WaveletKind::Reversible53,
            _ => return Err(J2kError::InvalidMarker),
        };

        if len != 12 {
            return Err(J2kError::InvalidMarker);
        }

        self.cod = Some(CodingStyle {
            has_sop,
            has_eph,
            progression,
            layers,
            mct,
            decomposition_levels,
            codeblock_width_log2: xcb + 2,
            codeblock_height_log2: ycb + 2,
            codeblock_style,
            transform,
        });
        Ok(())
    }

    fn parse_qcd(&mut self) -> Result<(), J2kError> {
        let len = self.reader.read_u16()?;
        if len < 4 {
            return Err(J2kError::InvalidMarker);
        }
        let sqcd = self.reader.read_u8()?;
        let guard_bits = sqcd >> 5;
        let payload = len as usize - 3;

        let (style, steps) = match sqcd & 0x1F {
            0 => {
                let mut steps = Vec::with_capacity(payload);
                for _ in 0..payload {
                    let b = self.reader.read_u8()?;
                    steps.push(StepSize {
                        exponent: b >> 3,
                        mantissa: 0,
                    });
                }
                (QuantizationStyle::None, steps)
            }
            1 => {
                if payload != 2 {
                    return Err(J2kError::InvalidMarker);
                }
                let v = self.reader.read_u16()?;
                (
                    QuantizationStyle::ScalarDerived,
                    vec![StepSize {
                        exponent: (v >> 11) as u8,
                        mantissa: v & 0x7FF,
                    }],
                )
            }
            2 => {
                if payload % 2 != 0 {
                    return Err(J2kError::InvalidMarker);
                }
                let mut steps = Vec::with_capacity(payload / 2);
                for _ in 0..payload / 2 {
                    let v = self.reader.read_u16()?;
                    steps.push(StepSize {
                        exponent: (v >> 11) as u8,
                        mantissa: v & 0x7FF,
                    });
                }
                (QuantizationStyle::ScalarExpounded, steps)
            }
            _ => return Err(J2kError::InvalidMarker),
        };

        self.qcd = Some(Quantization {
            style,
            guard_bits,
            steps,
        });
        Ok(())
    }

    fn parse_cap(&mut self) -> Result<(), J2kError> {
        let len = self.reader.read_u16()?;
        if len < 6 {
            return Err(J2kError::InvalidMarker);
        }
        let pcap = self.reader.read_u32()?;
        if pcap != 0 {
            // Part 2 / Part 15 extensions (including HT code-blocks).
            return Err(J2kError::UnsupportedFeature("capability extensions (CAP)"));
        }
        self.reader.advance(len as usize - 6)
    }

    /// Parse one tile-part: the SOT segment, any tile-part header segments,
    /// SOD, and the bitstream span. Returns true if this part consumed the
    /// remainder of the codestream (Psot = 0).
    fn parse_tile_part(
        &mut self,
        header: &ImageHeader,
        tiles: &mut [TileDecodePlan],
    ) -> Result<bool, J2kError> {
        // Psot counts from the first byte of the SOT marker.
        let sot_start = self.reader.position() - 2;

        let lsot = self.reader.read_u16()?;
        if lsot != 10 {
            return Err(J2kError::InvalidMarker);
        }
        let isot = self.reader.read_u16()? as u32;
        let psot = self.reader.read_u32()? as usize;
        let _tpsot = self.reader.read_u8()?;
        let _tnsot = self.reader.read_u8()?;

        if isot >= header.tile_count() {
            return Err(J2kError::InvalidMarker);
        }

        // Tile-part header segments until SOD.
        loop {
            match self.read_marker()? {
                Marker::StartOfData => break,
                Marker::PacketLengthsTile | Marker::Comment => {
                    let len = self.reader.read_u16()?;
                    if len < 2 {
                        return Err(J2kError::InvalidMarker);
                    }
                    self.reader.advance(len as usize - 2)?;
                }
                Marker::CodingStyleDefault
                | Marker::QuantizationDefault
                | Marker::CodingStyleComponent
                | Marker::QuantizationComponent
                | Marker::ProgressionOrderChange
                | Marker::PackedPacketHeadersTile => {
                    return Err(J2kError::UnsupportedFeature(
                        "tile-part coding parameter overrides",
                    ));
                }
                _ => return Err(J2kError::InvalidMarker),
            }
        }

        let data_start = self.reader.position();
        if psot == 0 {
            // Open-ended final tile-part: data runs to EOC (or stream end).
            let end = if self.data.len() >= data_start + 2
                && self.data[self.data.len() - 2..] == [0xFF, 0xD9]
            {
                self.data.len() - 2
            } else {
                warn!("final tile-part ends without an EOC marker");
                self.data.len()
            };
            tiles[isot as usize].parts.push(data_start..end);
            self.reader.advance(end - data_start)?;
            return Ok(true);
        }

        let part_end = sot_start + psot;
        if part_end < data_start || part_end > self.data.len() {
            return Err(J2kError::TruncatedStream);
        }
        tiles[isot as usize].parts.push(data_start..part_end);
        self.reader.advance(part_end - data_start)?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal well-formed main header plus one empty tile-part.
    pub(crate) fn single_tile_stream() -> Vec<u8> {
        vec![
            0xFF, 0x4F, // SOC
            0xFF, 0x51, // SIZ
            0x00, 0x29, // Lsiz = 41
            0x00, 0x00, // Rsiz
            0x00, 0x00, 0x01, 0x00, // Xsiz = 256
            0x00, 0x00, 0x01, 0x00, // Ysiz = 256
            0x00, 0x00, 0x00, 0x00, // XOsiz
            0x00, 0x00, 0x00, 0x00, // YOsiz
            0x00, 0x00, 0x01, 0x00, // XTsiz = 256
            0x00, 0x00, 0x01, 0x00, // YTsiz = 256
            0x00, 0x00, 0x00, 0x00, // XTOsiz
            0x00, 0x00, 0x00, 0x00, // YTOsiz
            0x00, 0x01, // Csiz = 1
            0x07, 0x01, 0x01, // 8-bit unsigned, no subsampling
            0xFF, 0x52, // COD
            0x00, 0x0C, // Lcod = 12
            0x00, // Scod
            0x00, // LRCP
            0x00, 0x01, // 1 layer
            0x00, // no MCT
            0x02, // 2 decomposition levels
            0x04, 0x04, // 64x64 code-blocks
            0x00, // default code-block style
            0x01, // 5/3 reversible
            0xFF, 0x5C, // QCD
            0x00, 0x0A, // Lqcd = 10: 7 reversible step exponents
            0x40, // two guard bits, style 0
            0x48, 0x48, 0x50, 0x48, 0x50, 0x50, 0x58, // exponents
            0xFF, 0x90, // SOT
            0x00, 0x0A, // Lsot
            0x00, 0x00, // Isot = 0
            0x00, 0x00, 0x00, 0x10, // Psot = 16 (SOT + segment + SOD + 2 data)
            0x00, // TPsot
            0x01, // TNsot
            0xFF, 0x93, // SOD
            0x00, 0x00, // two bytes of tile data
            0xFF, 0xD9, // EOC
        ]
    }

    #[test]
    fn parses_single_tile_stream() {
        let data = single_tile_stream();
        let parsed = CodestreamParser::new(&data).parse().unwrap();
        assert_eq!(parsed.header.width, 256);
        assert_eq!(parsed.header.height, 256);
        assert_eq!(parsed.header.components.len(), 1);
        assert_eq!(parsed.cod.decomposition_levels, 2);
        assert_eq!(parsed.cod.transform, WaveletKind::Reversible53);
        assert_eq!(parsed.qcd.guard_bits, 2);
        assert_eq!(parsed.qcd.steps.len(), 7);
        assert_eq!(parsed.tiles.len(), 1);
        assert_eq!(parsed.tiles[0].parts.len(), 1);
        assert_eq!(parsed.tiles[0].parts[0].len(), 2);
    }

    #[test]
    fn missing_soc_is_invalid() {
        let mut data = single_tile_stream();
        data[1] = 0x00;
        assert_eq!(
            CodestreamParser::new(&data).parse().unwrap_err(),
            J2kError::InvalidMarker
        );
    }

    #[test]
    fn siz_must_follow_soc() {
        let mut data = single_tile_stream();
        // Replace SIZ with COD.
        data[3] = 0x52;
        assert_eq!(
            CodestreamParser::new(&data).parse().unwrap_err(),
            J2kError::InvalidMarker
        );
    }

    #[test]
    fn unsupported_progression_order_hard_fails() {
        let mut data = single_tile_stream();
        // SGcod progression byte.
        data[50] = 0x02;
        assert_eq!(
            CodestreamParser::new(&data).parse().unwrap_err(),
            J2kError::UnsupportedFeature("progression order")
        );
    }

    #[test]
    fn truncated_siz_is_a_truncation_error() {
        let data = &single_tile_stream()[..20];
        assert_eq!(
            CodestreamParser::new(data).parse().unwrap_err(),
            J2kError::TruncatedStream
        );
    }

    #[test]
    fn comment_segments_are_skipped() {
        let mut data = single_tile_stream();
        // Insert a COM segment before COD (offset 45 is the COD marker).
        let com = [0xFF, 0x64, 0x00, 0x06, 0x00, 0x01, b'h', b'i'];
        let insert_at = 45;
        for (i, b) in com.iter().enumerate() {
            data.insert(insert_at + i, *b);
        }
        let parsed = CodestreamParser::new(&data).parse().unwrap();
        assert_eq!(parsed.tiles.len(), 1);
    }

    #[test]
    fn psot_running_past_the_end_is_truncation() {
        let mut data = single_tile_stream();
        // Psot sits 12 bytes from the end: TPsot, TNsot, SOD, data, EOC follow.
        let psot_at = data.len() - 12;
        data[psot_at] = 0x7F;
        assert_eq!(
            CodestreamParser::new(&data).parse().unwrap_err(),
            J2kError::TruncatedStream
        );
    }
}
