//! End-to-end decoder tests over hand-built codestreams.
//!
//! The fixtures carry no entropy-coded data: every packet is empty, so all
//! wavelet coefficients are zero and the decoded image is the DC level-shift
//! constant. That makes the expected output exactly computable while still
//! exercising the full marker -> packet -> reconstruction -> assembly path.

use medj2k::{DecodeOptions, J2kError, SampleBuffer};

struct StreamParams {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    depth: u8,
    decomposition_levels: u8,
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Emit a codestream whose tiles contain only empty packets.
fn empty_packet_stream(params: &StreamParams) -> Vec<u8> {
    let mut out = vec![0xFF, 0x4F]; // SOC

    // SIZ
    out.extend_from_slice(&[0xFF, 0x51]);
    push_u16(&mut out, 41);
    push_u16(&mut out, 0); // Rsiz
    push_u32(&mut out, params.width);
    push_u32(&mut out, params.height);
    push_u32(&mut out, 0); // XOsiz
    push_u32(&mut out, 0); // YOsiz
    push_u32(&mut out, params.tile_width);
    push_u32(&mut out, params.tile_height);
    push_u32(&mut out, 0); // XTOsiz
    push_u32(&mut out, 0); // YTOsiz
    push_u16(&mut out, 1); // Csiz
    out.push(params.depth - 1); // unsigned
    out.push(1); // XRsiz
    out.push(1); // YRsiz

    // COD: LRCP, 1 layer, 5/3 reversible, 64x64 code-blocks.
    out.extend_from_slice(&[0xFF, 0x52]);
    push_u16(&mut out, 12);
    out.push(0x00); // Scod
    out.push(0x00); // progression: LRCP
    push_u16(&mut out, 1); // layers
    out.push(0x00); // no MCT
    out.push(params.decomposition_levels);
    out.push(0x04); // xcb
    out.push(0x04); // ycb
    out.push(0x00); // code-block style
    out.push(0x01); // 5/3

    // QCD: style none, 2 guard bits, one exponent per subband.
    let steps = 3 * params.decomposition_levels as u16 + 1;
    out.extend_from_slice(&[0xFF, 0x5C]);
    push_u16(&mut out, 3 + steps);
    out.push(0x40); // Sqcd
    for _ in 0..steps {
        out.push(9 << 3);
    }

    // One tile-part per tile, each holding only empty packets: one 0x00
    // byte per (layer, resolution) packet.
    let tiles_across = params.width.div_ceil(params.tile_width);
    let tiles_down = params.height.div_ceil(params.tile_height);
    let packet_bytes = params.decomposition_levels as u32 + 1;
    for index in 0..tiles_across * tiles_down {
        out.extend_from_slice(&[0xFF, 0x90]); // SOT
        push_u16(&mut out, 10);
        push_u16(&mut out, index as u16);
        push_u32(&mut out, 12 + 2 + packet_bytes); // Psot
        out.push(0); // TPsot
        out.push(1); // TNsot
        out.extend_from_slice(&[0xFF, 0x93]); // SOD
        out.extend(std::iter::repeat_n(0x00u8, packet_bytes as usize));
    }

    out.extend_from_slice(&[0xFF, 0xD9]); // EOC
    out
}

fn params_16x16() -> StreamParams {
    StreamParams {
        width: 16,
        height: 16,
        tile_width: 16,
        tile_height: 16,
        depth: 8,
        decomposition_levels: 1,
    }
}

#[test]
fn decodes_16x16_single_tile_to_midgray() {
    let data = empty_packet_stream(&params_16x16());
    let pixels = medj2k::decode(&data, data.len()).unwrap();
    assert_eq!(pixels.width, 16);
    assert_eq!(pixels.height, 16);
    assert_eq!(pixels.components, 1);
    assert_eq!(pixels.bit_depth, 8);
    // Zero coefficients shift to 2^(depth-1).
    assert_eq!(pixels.samples, SampleBuffer::U8(vec![128; 256]));
}

#[test]
fn decode_is_deterministic() {
    let data = empty_packet_stream(&params_16x16());
    let first = medj2k::decode(&data, data.len()).unwrap();
    let second = medj2k::decode(&data, data.len()).unwrap();
    assert_eq!(first.samples, second.samples);
}

#[test]
fn twelve_bit_samples_widen_to_u16() {
    let mut params = params_16x16();
    params.depth = 12;
    let data = empty_packet_stream(&params);
    let pixels = medj2k::decode(&data, data.len()).unwrap();
    assert_eq!(pixels.bit_depth, 12);
    assert_eq!(pixels.samples, SampleBuffer::U16(vec![2048; 256]));
}

#[test]
fn partial_edge_tiles_assemble_cleanly() {
    // 20x12 image over 16x16 tiles: a 4-sample-wide edge tile column.
    let params = StreamParams {
        width: 20,
        height: 12,
        tile_width: 16,
        tile_height: 16,
        depth: 8,
        decomposition_levels: 1,
    };
    let data = empty_packet_stream(&params);
    let pixels = medj2k::decode(&data, data.len()).unwrap();
    assert_eq!((pixels.width, pixels.height), (20, 12));
    assert_eq!(pixels.samples, SampleBuffer::U8(vec![128; 240]));
}

#[test]
fn multi_level_decomposition_decodes() {
    let mut params = params_16x16();
    params.decomposition_levels = 3;
    let data = empty_packet_stream(&params);
    let pixels = medj2k::decode(&data, data.len()).unwrap();
    assert_eq!(pixels.samples, SampleBuffer::U8(vec![128; 256]));
}

#[test]
fn jp2_container_is_unwrapped() {
    let codestream = empty_packet_stream(&params_16x16());
    let mut file = b"\x00\x00\x00\x0CjP  \r\n\x87\n".to_vec();
    let mut ftyp = Vec::new();
    push_u32(&mut ftyp, 20);
    ftyp.extend_from_slice(b"ftyp");
    ftyp.extend_from_slice(b"jp2 \x00\x00\x00\x00jp2 ");
    file.extend_from_slice(&ftyp);
    push_u32(&mut file, codestream.len() as u32 + 8);
    file.extend_from_slice(b"jp2c");
    file.extend_from_slice(&codestream);

    let pixels = medj2k::decode(&file, file.len()).unwrap();
    assert_eq!(pixels.samples, SampleBuffer::U8(vec![128; 256]));
}

#[test]
fn truncated_header_fails_with_truncation() {
    let data = empty_packet_stream(&params_16x16());
    let cut = &data[..30]; // mid-SIZ
    assert_eq!(
        medj2k::decode(cut, cut.len()).unwrap_err(),
        J2kError::TruncatedStream
    );
}

#[test]
fn corrupted_packet_byte_is_detected() {
    // Flip the first packet byte inside the SOD payload. The packet header
    // then promises coding passes the stream cannot deliver; the decoder
    // must fail rather than return a silently different image.
    let mut data = empty_packet_stream(&params_16x16());
    let packet_offset = data.len() - 2 - 2; // before EOC, two packet bytes
    data[packet_offset] = 0xFF;
    assert!(medj2k::decode(&data, data.len()).is_err());
}

#[test]
fn lenient_mode_zero_fills_missing_packets() {
    // Drop the tile's second packet byte (and shorten Psot to match): the
    // strict decode fails, the lenient decode returns the zero-filled image
    // and reports the truncation.
    let params = params_16x16();
    let mut data = empty_packet_stream(&params);
    let eoc = data.len() - 2;
    data.remove(eoc - 1); // drop one packet byte
    // Psot sits 11 bytes from the end now: TPsot, TNsot, SOD, one packet
    // byte, and EOC follow its 4 bytes.
    let psot_at = data.len() - 11;
    data[psot_at + 3] = 12 + 2 + 1; // one packet byte left

    assert!(medj2k::decode(&data, data.len()).is_err());

    let (pixels, summary) =
        medj2k::decode_with_options(&data, data.len(), DecodeOptions { lenient: true }).unwrap();
    assert_eq!(pixels.samples, SampleBuffer::U8(vec![128; 256]));
    assert_eq!(summary.truncated_tiles, 1);
    assert_eq!(summary.codeblocks_decoded, 0);
}

#[test]
fn byte_count_must_match() {
    let data = empty_packet_stream(&params_16x16());
    assert!(matches!(
        medj2k::decode(&data, data.len() - 1),
        Err(J2kError::InvalidArgument(_))
    ));
}

#[test]
fn probe_reads_header_without_decoding() {
    let data = empty_packet_stream(&params_16x16());
    let header = medj2k::probe(&data).unwrap();
    assert_eq!((header.width, header.height), (16, 16));
    assert_eq!(header.components.len(), 1);
    assert_eq!(header.components[0].depth, 8);
}

#[test]
fn version_is_a_stable_triple() {
    let (major, minor, patch) = medj2k::get_version();
    assert_eq!(medj2k::get_version(), (major, minor, patch));
    // Semver triple of this crate.
    assert_eq!(
        format!("{major}.{minor}.{patch}"),
        env!("CARGO_PKG_VERSION")
    );
}
