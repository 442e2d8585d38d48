//! J2K codestream marker codes (ISO/IEC 15444-1 Annex A).

use num_enum::TryFromPrimitive;

/// Two-byte marker codes that delimit codestream segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum Marker {
    /// SOC: Start of codestream. Must be the first marker.
    StartOfCodestream = 0xFF4F,
    /// CAP: Extended capabilities (Part 2 / Part 15 signalling).
    Capability = 0xFF50,
    /// SIZ: Image and tile size. Must immediately follow SOC.
    ImageAndTileSize = 0xFF51,
    /// COD: Coding style default.
    CodingStyleDefault = 0xFF52,
    /// COC: Coding style component.
    CodingStyleComponent = 0xFF53,
    /// TLM: Tile-part lengths (informational).
    TilePartLengths = 0xFF55,
    /// PLM: Packet lengths, main header (informational).
    PacketLengthsMain = 0xFF57,
    /// PLT: Packet lengths, tile-part header (informational).
    PacketLengthsTile = 0xFF58,
    /// QCD: Quantization default.
    QuantizationDefault = 0xFF5C,
    /// QCC: Quantization component.
    QuantizationComponent = 0xFF5D,
    /// RGN: Region of interest.
    RegionOfInterest = 0xFF5E,
    /// POC: Progression order change.
    ProgressionOrderChange = 0xFF5F,
    /// PPM: Packed packet headers, main header.
    PackedPacketHeadersMain = 0xFF60,
    /// PPT: Packed packet headers, tile-part header.
    PackedPacketHeadersTile = 0xFF61,
    /// CRG: Component registration (informational).
    ComponentRegistration = 0xFF63,
    /// COM: Comment.
    Comment = 0xFF64,
    /// SOT: Start of tile-part.
    StartOfTile = 0xFF90,
    /// SOP: Start of packet.
    StartOfPacket = 0xFF91,
    /// EPH: End of packet header.
    EndOfPacketHeader = 0xFF92,
    /// SOD: Start of data. Tile-part bitstream follows.
    StartOfData = 0xFF93,
    /// EOC: End of codestream.
    EndOfCodestream = 0xFFD9,
}

impl Marker {
    /// Whether a length field (Lmar) follows the marker code.
    /// SOC, SOD, EOC and EPH are delimiting markers with no segment.
    pub fn has_segment(self) -> bool {
        !matches!(
            self,
            Marker::StartOfCodestream
                | Marker::StartOfData
                | Marker::EndOfCodestream
                | Marker::EndOfPacketHeader
        )
    }
}
