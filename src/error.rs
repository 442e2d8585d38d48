use thiserror::Error;

/// Errors surfaced by the decoder. Every component failure propagates to the
/// caller unchanged; nothing is swallowed along the way.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum J2kError {
    /// Fewer bytes (or packet-header bits) remain than a required read needs.
    #[error("Unexpected end of codestream")]
    TruncatedStream,
    /// A marker segment is malformed, missing, or out of order.
    #[error("Malformed or out-of-order marker segment")]
    InvalidMarker,
    /// A recognized codestream feature outside the supported profile.
    #[error("Unsupported codestream feature: {0}")]
    UnsupportedFeature(&'static str),
    /// The arithmetic decoder ran out of usable data while coding passes were
    /// still pending, or a segmentation symbol failed to verify.
    #[error("Corrupt code-block data")]
    CorruptCodeblock,
    /// Reconstructed sample counts do not match the geometry declared in the
    /// codestream header.
    #[error("Reconstructed geometry does not match the codestream header")]
    GeometryMismatch,
    /// A caller-supplied argument is inconsistent (e.g. byte count mismatch).
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}
