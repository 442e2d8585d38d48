//! JP2 container handling (ISO/IEC 15444-1 Annex I).
//!
//! The decoder consumes raw codestreams; when handed a JP2 file it only needs
//! to locate the contiguous codestream (`jp2c`) box payload. No other box is
//! interpreted.

use crate::error::J2kError;

const JP2_SIGNATURE: &[u8; 12] = b"\x00\x00\x00\x0CjP  \r\n\x87\n";

struct Jp2Box {
    box_type: [u8; 4],
    data_range: std::ops::Range<usize>,
}

struct Jp2Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Jp2Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn read_box(&mut self) -> Result<Option<Jp2Box>, J2kError> {
        if self.position + 8 > self.data.len() {
            return Ok(None);
        }

        let start = self.position;
        let mut length = u32::from_be_bytes(
            self.data[start..start + 4]
                .try_into()
                .expect("slice length checked"),
        ) as u64;
        let box_type: [u8; 4] = self.data[start + 4..start + 8]
            .try_into()
            .expect("slice length checked");
        self.position += 8;
        let mut header_size = 8usize;

        if length == 1 {
            // XLBox: 64-bit length follows.
            if self.position + 8 > self.data.len() {
                return Err(J2kError::TruncatedStream);
            }
            length = u64::from_be_bytes(
                self.data[self.position..self.position + 8]
                    .try_into()
                    .expect("slice length checked"),
            );
            self.position += 8;
            header_size += 8;
        } else if length == 0 {
            // Box extends to the end of the file.
            length = (self.data.len() - start) as u64;
        }

        if length < header_size as u64 {
            return Err(J2kError::TruncatedStream);
        }
        let data_end = start + length as usize;
        if data_end > self.data.len() {
            return Err(J2kError::TruncatedStream);
        }
        self.position = data_end;

        Ok(Some(Jp2Box {
            box_type,
            data_range: start + header_size..data_end,
        }))
    }
}

/// If `data` is a JP2 file, return the embedded raw codestream; otherwise
/// return `data` unchanged. A JP2 signature without a `jp2c` box is an error.
pub fn unwrap_codestream(data: &[u8]) -> Result<&[u8], J2kError> {
    if data.len() < 12 || &data[0..12] != JP2_SIGNATURE {
        return Ok(data);
    }

    let mut reader = Jp2Reader::new(data);
    while let Some(b) = reader.read_box()? {
        if &b.box_type == b"jp2c" {
            return Ok(&data[b.data_range]);
        }
    }
    Err(J2kError::InvalidMarker)
}
