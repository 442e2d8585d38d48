//! Data structures for the parsed codestream: image header, coding
//! parameters, the tile/component/resolution/subband/code-block tree, and the
//! decoded pixel buffer handed back to callers.

use crate::error::J2kError;
use num_enum::TryFromPrimitive;

/// A half-open rectangle on the reference grid: `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }
}

/// Per-component metadata from the SIZ marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentInfo {
    /// Bit depth (1..=16 supported).
    pub depth: u8,
    /// True if samples are two's-complement signed.
    pub is_signed: bool,
    /// Horizontal subsampling factor.
    pub dx: u8,
    /// Vertical subsampling factor.
    pub dy: u8,
}

/// Image and tiling geometry from the SIZ marker.
#[derive(Debug, Clone, Default)]
pub struct ImageHeader {
    /// Reference grid width (Xsiz).
    pub width: u32,
    /// Reference grid height (Ysiz).
    pub height: u32,
    /// Horizontal offset of the image area (XOsiz).
    pub x_origin: u32,
    /// Vertical offset of the image area (YOsiz).
    pub y_origin: u32,
    /// Nominal tile width (XTsiz).
    pub tile_width: u32,
    /// Nominal tile height (YTsiz).
    pub tile_height: u32,
    /// Horizontal offset of the first tile (XTOsiz).
    pub tile_x_origin: u32,
    /// Vertical offset of the first tile (YTOsiz).
    pub tile_y_origin: u32,
    /// Component metadata (depth, signedness, subsampling).
    pub components: Vec<ComponentInfo>,
}

fn ceil_div(a: u32, b: u32) -> u32 {
    a.div_ceil(b)
}

impl ImageHeader {
    pub fn tiles_across(&self) -> u32 {
        ceil_div(
            self.width.saturating_sub(self.tile_x_origin),
            self.tile_width,
        )
        .max(1)
    }

    pub fn tiles_down(&self) -> u32 {
        ceil_div(
            self.height.saturating_sub(self.tile_y_origin),
            self.tile_height,
        )
        .max(1)
    }

    pub fn tile_count(&self) -> u32 {
        self.tiles_across() * self.tiles_down()
    }

    /// Tile rectangle on the reference grid, clipped to the image area
    /// (ISO/IEC 15444-1 B.3).
    pub fn tile_rect(&self, index: u32) -> Rect {
        let p = (index % self.tiles_across()) as u64;
        let q = (index / self.tiles_across()) as u64;
        let clamp = |v: u64, limit: u32| v.min(limit as u64) as u32;
        Rect::new(
            clamp(
                (self.tile_x_origin as u64 + p * self.tile_width as u64)
                    .max(self.x_origin as u64),
                self.width,
            ),
            clamp(
                (self.tile_y_origin as u64 + q * self.tile_height as u64)
                    .max(self.y_origin as u64),
                self.height,
            ),
            clamp(
                self.tile_x_origin as u64 + (p + 1) * self.tile_width as u64,
                self.width,
            ),
            clamp(
                self.tile_y_origin as u64 + (q + 1) * self.tile_height as u64,
                self.height,
            ),
        )
    }

    /// Tile-component rectangle: the tile rectangle scaled by the component
    /// subsampling factors (B.3).
    pub fn tile_component_rect(&self, tile_rect: Rect, component: usize) -> Rect {
        let info = &self.components[component];
        let (dx, dy) = (info.dx as u32, info.dy as u32);
        Rect::new(
            ceil_div(tile_rect.x0, dx),
            ceil_div(tile_rect.y0, dy),
            ceil_div(tile_rect.x1, dx),
            ceil_div(tile_rect.y1, dy),
        )
    }

    /// Dimensions of the decoded image for one component.
    pub fn component_size(&self, component: usize) -> (u32, u32) {
        let info = &self.components[component];
        (
            ceil_div(self.width, info.dx as u32) - ceil_div(self.x_origin, info.dx as u32),
            ceil_div(self.height, info.dy as u32) - ceil_div(self.y_origin, info.dy as u32),
        )
    }
}

/// Packet interleaving order from the COD marker (SGcod).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ProgressionOrder {
    LayerResolutionComponentPosition = 0,
    ResolutionLayerComponentPosition = 1,
    ResolutionPositionComponentLayer = 2,
    PositionComponentResolutionLayer = 3,
    ComponentPositionResolutionLayer = 4,
}

/// Wavelet filter selected in the COD marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveletKind {
    /// 9/7 floating-point filter, irreversible.
    Irreversible97,
    /// 5/3 integer filter, reversible.
    Reversible53,
}

/// Code-block style flags (SPcod byte).
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeBlockStyle {
    pub selective_bypass: bool,
    pub reset_probabilities: bool,
    pub termination_on_each_pass: bool,
    pub vertically_causal: bool,
    pub predictable_termination: bool,
    pub segmentation_symbols: bool,
}

impl CodeBlockStyle {
    pub fn from_flags(flags: u8) -> Self {
        Self {
            selective_bypass: flags & 0x01 != 0,
            reset_probabilities: flags & 0x02 != 0,
            termination_on_each_pass: flags & 0x04 != 0,
            vertically_causal: flags & 0x08 != 0,
            predictable_termination: flags & 0x10 != 0,
            segmentation_symbols: flags & 0x20 != 0,
        }
    }
}

/// Coding style parameters from the COD marker.
#[derive(Debug, Clone)]
pub struct CodingStyle {
    /// SOP markers precede every packet.
    pub has_sop: bool,
    /// An EPH marker terminates every packet header.
    pub has_eph: bool,
    pub progression: ProgressionOrder,
    pub layers: u16,
    /// Multiple component transform signalled for components 0..3.
    pub mct: bool,
    /// Number of DWT decomposition levels (resolutions = levels + 1).
    pub decomposition_levels: u8,
    /// log2 of the nominal code-block width (the +2 offset already applied).
    pub codeblock_width_log2: u8,
    /// log2 of the nominal code-block height.
    pub codeblock_height_log2: u8,
    pub codeblock_style: CodeBlockStyle,
    pub transform: WaveletKind,
}

impl CodingStyle {
    pub fn resolutions(&self) -> usize {
        self.decomposition_levels as usize + 1
    }
}

/// Quantization style from the QCD marker (Sqcd low five bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationStyle {
    /// No quantization; 8-bit exponents only (reversible path).
    None,
    /// Scalar quantization, one step size derived for all subbands.
    ScalarDerived,
    /// Scalar quantization, one step size signalled per subband.
    ScalarExpounded,
}

/// One signalled quantization step (exponent/mantissa pair, E.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct StepSize {
    pub exponent: u8,
    pub mantissa: u16,
}

/// Quantization parameters from the QCD marker.
#[derive(Debug, Clone)]
pub struct Quantization {
    pub style: QuantizationStyle,
    pub guard_bits: u8,
    pub steps: Vec<StepSize>,
}

/// Orientation of a wavelet subband.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubbandOrientation {
    #[default]
    /// Low-low (base image).
    LL,
    /// High-low (horizontal details).
    HL,
    /// Low-high (vertical details).
    LH,
    /// High-high (diagonal details).
    HH,
}

impl SubbandOrientation {
    /// Horizontal/vertical high-pass offsets (xob, yob of B.5).
    pub fn band_offsets(self) -> (u32, u32) {
        match self {
            SubbandOrientation::LL => (0, 0),
            SubbandOrientation::HL => (1, 0),
            SubbandOrientation::LH => (0, 1),
            SubbandOrientation::HH => (1, 1),
        }
    }

    /// log2 of the subband gain (Table E-1).
    pub fn gain_log2(self) -> u8 {
        match self {
            SubbandOrientation::LL => 0,
            SubbandOrientation::HL | SubbandOrientation::LH => 1,
            SubbandOrientation::HH => 2,
        }
    }
}

/// The smallest entropy-coded unit within a subband.
#[derive(Debug, Clone, Default)]
pub struct Codeblock {
    /// Horizontal index in the subband code-block grid.
    pub x_idx: u32,
    /// Vertical index in the subband code-block grid.
    pub y_idx: u32,
    /// Sample rectangle in subband coordinates.
    pub rect: Rect,
    /// Compressed bytes contributed so far, in layer order.
    pub data: Vec<u8>,
    /// Whether any packet has included this block yet.
    pub included: bool,
    /// Number of missing (all-zero) most significant bit-planes.
    pub missing_bit_planes: u8,
    /// Total coding passes signalled across layers.
    pub coding_passes: u32,
    /// Code-block state variable for length decoding (B.10.7.1).
    pub l_block: u32,
}

/// A frequency subband within one resolution level of a tile-component.
#[derive(Debug, Clone, Default)]
pub struct Subband {
    pub orientation: SubbandOrientation,
    /// Coefficient rectangle in subband coordinates (B.5).
    pub rect: Rect,
    /// Code-block grid dimensions.
    pub blocks_wide: u32,
    pub blocks_high: u32,
    pub codeblocks: Vec<Codeblock>,
}

/// One resolution level of a tile-component.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Resolution rectangle (B.5): the LL plane produced after synthesis up
    /// to this level.
    pub rect: Rect,
    /// LL for resolution 0; HL, LH, HH above.
    pub subbands: Vec<Subband>,
}

/// Per-component decomposition of one tile.
#[derive(Debug, Clone, Default)]
pub struct TileComponent {
    pub rect: Rect,
    pub resolutions: Vec<Resolution>,
}

/// A rectangular region of the image, independently coded.
#[derive(Debug, Clone, Default)]
pub struct Tile {
    pub index: u32,
    pub rect: Rect,
    pub components: Vec<TileComponent>,
}

impl Tile {
    /// Build the tile decomposition tree for `index` per Annex B: resolution
    /// and subband rectangles, and the code-block grid of every subband.
    pub fn build(header: &ImageHeader, cod: &CodingStyle, index: u32) -> Self {
        let rect = header.tile_rect(index);
        let levels = cod.decomposition_levels as u32;
        let cbw_log2 = cod.codeblock_width_log2 as u32;
        let cbh_log2 = cod.codeblock_height_log2 as u32;

        let mut components = Vec::with_capacity(header.components.len());
        for c in 0..header.components.len() {
            let tc_rect = header.tile_component_rect(rect, c);
            let mut resolutions = Vec::with_capacity(cod.resolutions());
            for r in 0..=levels {
                let shift = levels - r;
                let res_rect = Rect::new(
                    ceil_shift(tc_rect.x0, shift),
                    ceil_shift(tc_rect.y0, shift),
                    ceil_shift(tc_rect.x1, shift),
                    ceil_shift(tc_rect.y1, shift),
                );

                let orientations: &[SubbandOrientation] = if r == 0 {
                    &[SubbandOrientation::LL]
                } else {
                    &[
                        SubbandOrientation::HL,
                        SubbandOrientation::LH,
                        SubbandOrientation::HH,
                    ]
                };
                // Decomposition level the bands of this resolution belong to.
                let band_level = if r == 0 { levels } else { levels - r + 1 };

                let mut subbands = Vec::with_capacity(orientations.len());
                for &orientation in orientations {
                    let band_rect = band_rect(tc_rect, band_level, orientation);
                    subbands.push(build_subband(band_rect, orientation, cbw_log2, cbh_log2));
                }
                resolutions.push(Resolution {
                    rect: res_rect,
                    subbands,
                });
            }
            components.push(TileComponent {
                rect: tc_rect,
                resolutions,
            });
        }

        Tile {
            index,
            rect,
            components,
        }
    }
}

fn ceil_shift(value: u32, shift: u32) -> u32 {
    // Up to 32 decomposition levels are representable, so divide in u64.
    (value as u64).div_ceil(1u64 << shift) as u32
}

/// Subband rectangle for a decomposition level (Equation B-15).
fn band_rect(tc_rect: Rect, level: u32, orientation: SubbandOrientation) -> Rect {
    let (xob, yob) = orientation.band_offsets();
    let half = if level == 0 { 0 } else { 1u64 << (level - 1) };
    let coord = |v: u32, o: u32| -> u32 {
        let offset = half * o as u64;
        (v as u64).saturating_sub(offset).div_ceil(1u64 << level) as u32
    };
    Rect::new(
        coord(tc_rect.x0, xob),
        coord(tc_rect.y0, yob),
        coord(tc_rect.x1, xob),
        coord(tc_rect.y1, yob),
    )
}

fn build_subband(
    rect: Rect,
    orientation: SubbandOrientation,
    cbw_log2: u32,
    cbh_log2: u32,
) -> Subband {
    if rect.is_empty() {
        return Subband {
            orientation,
            rect,
            ..Default::default()
        };
    }
    // Code-block partition is anchored at the subband origin 0 (B.7).
    let first_x = rect.x0 >> cbw_log2;
    let first_y = rect.y0 >> cbh_log2;
    let blocks_wide = rect.x1.div_ceil(1 << cbw_log2) - first_x;
    let blocks_high = rect.y1.div_ceil(1 << cbh_log2) - first_y;

    let mut codeblocks = Vec::with_capacity((blocks_wide * blocks_high) as usize);
    for by in 0..blocks_high {
        for bx in 0..blocks_wide {
            let gx = first_x + bx;
            let gy = first_y + by;
            let cb_rect = Rect::new(
                (gx << cbw_log2).max(rect.x0),
                (gy << cbh_log2).max(rect.y0),
                (((gx as u64 + 1) << cbw_log2).min(rect.x1 as u64)) as u32,
                (((gy as u64 + 1) << cbh_log2).min(rect.y1 as u64)) as u32,
            );
            codeblocks.push(Codeblock {
                x_idx: bx,
                y_idx: by,
                rect: cb_rect,
                l_block: 3,
                ..Default::default()
            });
        }
    }

    Subband {
        orientation,
        rect,
        blocks_wide,
        blocks_high,
        codeblocks,
    }
}

/// One tile's share of the codestream: the byte ranges of its tile-part
/// bitstreams, in transmission order.
#[derive(Debug, Clone, Default)]
pub struct TileDecodePlan {
    pub index: u32,
    /// Byte ranges into the codestream, one per tile-part, after each SOD.
    pub parts: Vec<std::ops::Range<usize>>,
}

/// Decoded samples in the storage width matching the declared bit depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleBuffer {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
}

impl SampleBuffer {
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::U8(v) => v.len(),
            SampleBuffer::I8(v) => v.len(),
            SampleBuffer::U16(v) => v.len(),
            SampleBuffer::I16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleBuffer::U8(_) | SampleBuffer::I8(_) => 1,
            SampleBuffer::U16(_) | SampleBuffer::I16(_) => 2,
        }
    }

    /// Samples serialized little-endian, row-major, components interleaved.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            SampleBuffer::U8(v) => v.clone(),
            SampleBuffer::I8(v) => v.iter().map(|&s| s as u8).collect(),
            SampleBuffer::U16(v) => v.iter().flat_map(|s| s.to_le_bytes()).collect(),
            SampleBuffer::I16(v) => v.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }
}

/// The decoded raster returned to callers: flat, row-major, components
/// interleaved.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub components: u32,
    pub bit_depth: u8,
    pub is_signed: bool,
    pub samples: SampleBuffer,
}

impl PixelBuffer {
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.components as usize
    }

    /// Consistency check used by the assembler before handing the buffer out.
    pub fn validate(&self) -> Result<(), J2kError> {
        if self.samples.len() != self.expected_len() {
            return Err(J2kError::GeometryMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_256() -> ImageHeader {
        ImageHeader {
            width: 256,
            height: 256,
            tile_width: 256,
            tile_height: 256,
            components: vec![ComponentInfo {
                depth: 8,
                is_signed: false,
                dx: 1,
                dy: 1,
            }],
            ..Default::default()
        }
    }

    fn cod(levels: u8) -> CodingStyle {
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

    #[test]
    fn single_tile_geometry() {
        let header = header_256();
        assert_eq!(header.tile_count(), 1);
        let rect = header.tile_rect(0);
        assert_eq!((rect.width(), rect.height()), (256, 256));
    }

    #[test]
    fn partial_edge_tiles() {
        let mut header = header_256();
        header.width = 300;
        header.height = 200;
        header.tile_width = 128;
        header.tile_height = 128;
        assert_eq!(header.tiles_across(), 3);
        assert_eq!(header.tiles_down(), 2);
        // Rightmost tile column is only 300 - 256 = 44 samples wide.
        let rect = header.tile_rect(2);
        assert_eq!(rect.width(), 44);
        // Bottom row is 200 - 128 = 72 samples high.
        let rect = header.tile_rect(5);
        assert_eq!((rect.width(), rect.height()), (44, 72));
    }

    #[test]
    fn tile_tree_resolutions_and_subbands() {
        let header = header_256();
        let tile = Tile::build(&header, &cod(2), 0);
        let comp = &tile.components[0];
        assert_eq!(comp.resolutions.len(), 3);
        // Resolution 0 carries a single 64x64 LL band.
        assert_eq!(comp.resolutions[0].subbands.len(), 1);
        assert_eq!(comp.resolutions[0].rect.width(), 64);
        // Higher resolutions carry HL/LH/HH.
        assert_eq!(comp.resolutions[1].subbands.len(), 3);
        assert_eq!(comp.resolutions[2].rect.width(), 256);
        let hl = &comp.resolutions[2].subbands[0];
        assert_eq!(hl.orientation, SubbandOrientation::HL);
        assert_eq!((hl.rect.width(), hl.rect.height()), (128, 128));
        // 128x128 band with 64x64 nominal code-blocks: 2x2 grid.
        assert_eq!((hl.blocks_wide, hl.blocks_high), (2, 2));
        assert_eq!(hl.codeblocks.len(), 4);
    }

    #[test]
    fn odd_sized_band_split() {
        let mut header = header_256();
        header.width = 17;
        header.height = 17;
        header.tile_width = 17;
        header.tile_height = 17;
        let tile = Tile::build(&header, &cod(1), 0);
        let res1 = &tile.components[0].resolutions[1];
        // 17 columns split into 9 low and 8 high.
        assert_eq!(res1.subbands[0].rect.width(), 8); // HL
        assert_eq!(res1.subbands[1].rect.width(), 9); // LH
        assert_eq!(res1.subbands[1].rect.height(), 8);
    }

    #[test]
    fn subband_gains_match_table_e1() {
        assert_eq!(SubbandOrientation::LL.gain_log2(), 0);
        assert_eq!(SubbandOrientation::HL.gain_log2(), 1);
        assert_eq!(SubbandOrientation::LH.gain_log2(), 1);
        assert_eq!(SubbandOrientation::HH.gain_log2(), 2);
    }
}
