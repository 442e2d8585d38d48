//! Tier-2 packet decoding (ISO/IEC 15444-1 B.9/B.10).
//!
//! Walks the packet sequence of one tile in LRCP order, decoding each packet
//! header (inclusion tag trees, zero bit-plane counts, coding passes, length
//! codewords) and attaching the codeword segments to their code-blocks.

use crate::error::J2kError;
use crate::image::{CodingStyle, Tile};
use crate::marker::Marker;
use crate::reader::{ByteReader, PacketBitReader};
use crate::tag_tree::TagTree;
use log::warn;

/// Decode state of one precinct within one subband: the two tag trees shared
/// by all of its packets. With the default maximal precincts there is exactly
/// one precinct per subband.
struct PrecinctState {
    inclusion: TagTree,
    zero_planes: TagTree,
}

impl PrecinctState {
    fn new(blocks_wide: usize, blocks_high: usize) -> Self {
        Self {
            inclusion: TagTree::new(blocks_wide, blocks_high),
            zero_planes: TagTree::new(blocks_wide, blocks_high),
        }
    }
}

/// What Tier-2 saw while reading the tile's packets.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketReadSummary {
    /// True if lenient mode stopped early on truncated or malformed packet
    /// data; the remaining code-blocks decode as zero-filled.
    pub truncated: bool,
}

/// Read every packet of `tile` from its concatenated tile-part data and
/// attach codeword segments to the code-blocks.
pub fn read_tile_packets(
    tile: &mut Tile,
    data: &[u8],
    cod: &CodingStyle,
    lenient: bool,
) -> Result<PacketReadSummary, J2kError> {
    let mut reader = ByteReader::new(data);

    // One precinct state per (component, resolution, subband).
    let mut precincts: Vec<Vec<Vec<PrecinctState>>> = tile
        .components
        .iter()
        .map(|component| {
            component
                .resolutions
                .iter()
                .map(|resolution| {
                    resolution
                        .subbands
                        .iter()
                        .map(|band| {
                            PrecinctState::new(band.blocks_wide as usize, band.blocks_high as usize)
                        })
                        .collect()
                })
                .collect()
        })
        .collect();

    let mut summary = PacketReadSummary::default();

    // LRCP: layers, then resolutions, then components, one precinct each.
    'packets: for layer in 0..cod.layers as u32 {
        for resolution in 0..cod.resolutions() {
            for component in 0..tile.components.len() {
                // A resolution with no samples emits no packets (B.6).
                if tile.components[component].resolutions[resolution]
                    .rect
                    .is_empty()
                {
                    continue;
                }
                let result = read_packet(
                    &mut reader,
                    tile,
                    &mut precincts,
                    cod,
                    layer,
                    resolution,
                    component,
                );
                if let Err(error) = result {
                    if lenient {
                        warn!(
                            "tile {} packet stream ends early at layer {layer} \
                             resolution {resolution} component {component}: {error}",
                            tile.index
                        );
                        summary.truncated = true;
                        break 'packets;
                    }
                    return Err(error);
                }
            }
        }
    }

    Ok(summary)
}

fn read_packet(
    reader: &mut ByteReader,
    tile: &mut Tile,
    precincts: &mut [Vec<Vec<PrecinctState>>],
    cod: &CodingStyle,
    layer: u32,
    resolution: usize,
    component: usize,
) -> Result<(), J2kError> {
    // An SOP marker may precede each packet when signalled in Scod.
    if cod.has_sop && reader.peek_u16() == Some(Marker::StartOfPacket as u16) {
        reader.advance(6)?; // marker, Lsop, Nsop
    }

    let mut bits = PacketBitReader::new(reader.remaining());

    // B.10.3: the first bit distinguishes an empty packet.
    let mut included_blocks: Vec<(usize, usize, usize)> = Vec::new();
    if bits.read_bit()? == 1 {
        let bands = &mut tile.components[component].resolutions[resolution].subbands;
        for (band_index, band) in bands.iter_mut().enumerate() {
            let precinct = &mut precincts[component][resolution][band_index];
            for cb_index in 0..band.codeblocks.len() {
                let cb = &mut band.codeblocks[cb_index];
                let (x, y) = (cb.x_idx as usize, cb.y_idx as usize);

                // B.10.4 code-block inclusion.
                let included = if cb.included {
                    bits.read_bit()? == 1
                } else {
                    precinct.inclusion.decode(&mut bits, x, y, layer + 1)? <= layer
                };
                if !included {
                    continue;
                }

                // B.10.5 zero bit-plane count, on first inclusion only.
                if !cb.included {
                    let missing = precinct.zero_planes.decode(&mut bits, x, y, u32::MAX)?;
                    if missing > u8::MAX as u32 {
                        return Err(J2kError::InvalidMarker);
                    }
                    cb.missing_bit_planes = missing as u8;
                }
                cb.included = true;

                // B.10.6 number of coding passes.
                let added = read_pass_count(&mut bits)?;
                cb.coding_passes += added;

                // B.10.7.1 codeword segment length.
                while bits.read_bit()? == 1 {
                    cb.l_block += 1;
                }
                let length_bits = cb.l_block + added.ilog2();
                if length_bits > 32 {
                    return Err(J2kError::InvalidMarker);
                }
                let length = bits.read_bits(length_bits as u8)?;
                included_blocks.push((band_index, cb_index, length as usize));
            }
        }
    }

    bits.align()?;
    let header_len = bits.consumed();
    reader.advance(header_len)?;

    if cod.has_eph {
        if reader.read_u16()? != Marker::EndOfPacketHeader as u16 {
            return Err(J2kError::InvalidMarker);
        }
    }

    // Packet body: codeword segments in inclusion order.
    for (band_index, cb_index, length) in included_blocks {
        let segment = reader.take(length)?;
        let cb = &mut tile.components[component].resolutions[resolution].subbands[band_index]
            .codeblocks[cb_index];
        cb.data.extend_from_slice(segment);
    }

    Ok(())
}

/// Coding-pass count codewords (Table B.4).
fn read_pass_count(bits: &mut PacketBitReader) -> Result<u32, J2kError> {
    if bits.read_bit()? == 0 {
        return Ok(1);
    }
    if bits.read_bit()? == 0 {
        return Ok(2);
    }
    let two = bits.read_bits(2)?;
    if two < 3 {
        return Ok(3 + two);
    }
    let five = bits.read_bits(5)?;
    if five < 31 {
        return Ok(6 + five);
    }
    Ok(37 + bits.read_bits(7)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{
        CodeBlockStyle, CodingStyle, ComponentInfo, ImageHeader, ProgressionOrder, WaveletKind,
    };

    fn test_cod(levels: u8) -> CodingStyle {
        CodingStyle {
            has_sop: false,
            has_eph: false,
            progression: ProgressionOrder::LayerResolutionComponentPosition,
            layers: 1,
            mct: false,
            decomposition_levels: levels,
            codeblock_width_log2: 6,
            codeblock_height_log2: 6,
            codeblock_style: CodeBlockStyle::default(),
            transform: WaveletKind::Reversible53,
        }
    }

    fn test_tile(levels: u8) -> Tile {
        let header = ImageHeader {
            width: 16,
            height: 16,
            tile_width: 16,
            tile_height: 16,
            components: vec![ComponentInfo {
                depth: 8,
                is_signed: false,
                dx: 1,
                dy: 1,
            }],
            ..Default::default()
        };
        Tile::build(&header, &test_cod(levels), 0)
    }

    #[test]
    fn pass_count_codewords() {
        // 0 -> 1 pass, 10 -> 2, 1100/1101/1110 -> 3..5, 1111 00000 -> 6.
        let cases: [(&[u8], u32); 5] = [
            (&[0b0000_0000], 1),
            (&[0b1000_0000], 2),
            (&[0b1100_0000], 3),
            (&[0b1110_0000], 5),
            (&[0b1111_0000, 0b0000_0000], 6),
        ];
        for (data, expected) in cases {
            let mut bits = PacketBitReader::new(data);
            assert_eq!(read_pass_count(&mut bits).unwrap(), expected);
        }
    }

    #[test]
    fn empty_packets_leave_blocks_empty() {
        let mut tile = test_tile(1);
        // Two resolutions, one empty packet each: two 0x00 bytes.
        let data = [0x00, 0x00];
        let summary = read_tile_packets(&mut tile, &data, &test_cod(1), false).unwrap();
        assert!(!summary.truncated);
        for component in &tile.components {
            for resolution in &component.resolutions {
                for band in &resolution.subbands {
                    for cb in &band.codeblocks {
                        assert!(!cb.included);
                        assert!(cb.data.is_empty());
                    }
                }
            }
        }
    }

    #[test]
    fn missing_packets_truncate() {
        let mut tile = test_tile(1);
        let data = [0x00]; // only one of two packets present
        let strict = read_tile_packets(&mut tile, &data, &test_cod(1), false);
        assert_eq!(strict.unwrap_err(), J2kError::TruncatedStream);

        let mut tile = test_tile(1);
        let lenient = read_tile_packets(&mut tile, &data, &test_cod(1), true).unwrap();
        assert!(lenient.truncated);
    }

    #[test]
    fn single_block_inclusion_with_body() {
        // One resolution (levels = 0), one 16x16 LL band, one code-block.
        //
        // Header bits: non-empty (1), inclusion tag tree for a single-leaf
        // tree at layer 0 (1 = value 0), zero bit-planes (1 = value 0),
        // one coding pass (0), no Lblock increment (0), then a 3-bit length
        // (Lblock=3 + ilog2(1)=0) of 0b010 = 2 bytes.
        // Bits: 1 1 1 0 0 010 -> 0b1110_0010.
        let mut tile = test_tile(0);
        let data = [0b1110_0010, 0xAB, 0xCD];
        read_tile_packets(&mut tile, &data, &test_cod(0), false).unwrap();
        let cb = &tile.components[0].resolutions[0].subbands[0].codeblocks[0];
        assert!(cb.included);
        assert_eq!(cb.missing_bit_planes, 0);
        assert_eq!(cb.coding_passes, 1);
        assert_eq!(cb.data, vec![0xAB, 0xCD]);
    }
}
