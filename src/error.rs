use thiserror::Error;

/// Errors shared by all codec layers.
///
/// Frame-level problems (`MalformedFrame`, `SessionConflict`) are swallowed
/// per part by the decoder sessions so a lossy channel cannot abort an
/// otherwise recoverable transfer; only `ChecksumMismatch` after full
/// reassembly is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Unparseable wire text, e.g. an unknown word, a bad sequence path or
    /// truncated CBOR.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// There is nothing to encode.
    #[error("cannot encode an empty payload")]
    EmptyPayload,

    /// The payload needs more sequential fragments than the frame header
    /// can number.
    #[error("payload needs {0} fragments, more than the header can number")]
    PayloadTooLarge(usize),

    /// The embedded CRC-32 does not match the reassembled data.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A part's sequence count / checksum disagrees with the values already
    /// fixed for the running decode session.
    #[error("part belongs to a different transfer session")]
    SessionConflict,

    /// Unknown encoding style, density tier or file type code.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// A payload type tag containing characters outside `[a-z0-9-]`.
    #[error("invalid type tag: {0}")]
    InvalidType(String),
}
