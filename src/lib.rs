//! medj2k: a pure-Rust JPEG 2000 Part 1 decoder (ISO/IEC 15444-1).
//!
//! Decode-only, aimed at medical-imaging pipelines where J2K codestreams
//! arrive embedded in DICOM transfer syntaxes. The crate is divided into
//! modules along the standard's own seams:
//!
//! - `parser`: codestream syntax (markers, headers) into structured metadata.
//! - `packet` / `tag_tree`: Tier-2 packet headers and body extraction.
//! - `mq` / `bit_plane`: Tier-1 entropy decoding (MQ coder, EBCOT passes).
//! - `dwt`: inverse 5/3 and 9/7 wavelet transforms.
//! - `quantization`: step sizes and dequantization.
//! - `assemble` / `decoder`: tile reconstruction and orchestration.
//! - `jp2`: locating the codestream inside a JP2 container.
//!
//! The public entry points mirror the two calls binding layers need:
//! [`decode`] and [`get_version`].

pub mod assemble;
pub mod bit_plane;
pub mod decoder;
pub mod dwt;
pub mod error;
pub mod image;
pub mod jp2;
pub mod marker;
pub mod mq;
pub mod packet;
pub mod parser;
pub mod quantization;
pub mod reader;
pub mod tag_tree;

pub use decoder::{DecodeOptions, DecodeSummary, J2kDecoder};
pub use error::J2kError;
pub use image::{ImageHeader, PixelBuffer, SampleBuffer};

/// Decode a raw J2K codestream or JP2 file into a pixel buffer.
///
/// `expected_byte_count` is the caller's declared length of the compressed
/// data and must match `buffer.len()` exactly; callers marshalling buffers
/// across language boundaries use it as a cheap consistency check.
pub fn decode(buffer: &[u8], expected_byte_count: usize) -> Result<PixelBuffer, J2kError> {
    if buffer.len() != expected_byte_count {
        return Err(J2kError::InvalidArgument(
            "buffer length does not match the declared byte count",
        ));
    }
    let (pixels, _) = J2kDecoder::new(buffer).decode()?;
    Ok(pixels)
}

/// [`decode`] with explicit options, also returning the decode accounting
/// (code-blocks decoded, lenient recoveries).
pub fn decode_with_options(
    buffer: &[u8],
    expected_byte_count: usize,
    options: DecodeOptions,
) -> Result<(PixelBuffer, DecodeSummary), J2kError> {
    if buffer.len() != expected_byte_count {
        return Err(J2kError::InvalidArgument(
            "buffer length does not match the declared byte count",
        ));
    }
    J2kDecoder::with_options(buffer, options).decode()
}

/// Parse image metadata without decoding any entropy data.
pub fn probe(buffer: &[u8]) -> Result<ImageHeader, J2kError> {
    let codestream = jp2::unwrap_codestream(buffer)?;
    let parsed = parser::CodestreamParser::new(codestream).parse()?;
    Ok(parsed.header)
}

/// The decoder version as a (major, minor, patch) triple. Pure accessor,
/// stable for the process lifetime.
pub fn get_version() -> (u32, u32, u32) {
    let mut parts = env!("CARGO_PKG_VERSION").split('.');
    let mut next = || {
        parts
            .next()
            .and_then(|part| part.parse().ok())
            .unwrap_or(0)
    };
    (next(), next(), next())
}
