//! BBQr-style sequential multi-part framing, the alternative to the
//! fountain-coded stream for QR families where erasure coding is not worth
//! the overhead: no redundancy, every fragment required exactly once.
//!
//! Frame layout: the fixed-width header `B$` + encoding char + file type
//! char + two base-36 chars of total count + two base-36 chars of the
//! 0-based index, followed by the fragment of the encoded payload text.

mod base32;

use std::collections::BTreeMap;
use std::io::{Read, Write};

use tracing::{debug, warn};

use crate::error::CodecError;

const HEADER_LEN: usize = 8;

/// the largest count two base-36 digits can express
pub const MAX_PARTS: usize = 1295;

/// Inner payload transformation, selected per use by the caller.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Encoding {
    /// uppercase hex, cheapest to produce, densest QR bits per byte wasted
    Hex,
    /// RFC 4648 base-32 without padding
    Base32,
    /// raw deflate, then base-32
    Zlib,
}

impl Encoding {
    fn to_char(self) -> char {
        match self {
            Encoding::Hex => 'H',
            Encoding::Base32 => '2',
            Encoding::Zlib => 'Z',
        }
    }

    fn from_char(c: char) -> Result<Encoding, CodecError> {
        match c {
            'H' => Ok(Encoding::Hex),
            '2' => Ok(Encoding::Base32),
            'Z' => Ok(Encoding::Zlib),
            _ => Err(CodecError::UnsupportedEncoding(format!(
                "unknown encoding '{c}'"
            ))),
        }
    }
}

/// One-character tag telling the receiver what the reassembled bytes are.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FileType {
    Psbt,
    Transaction,
    Json,
    Cbor,
    UnicodeText,
    Binary,
}

impl FileType {
    fn to_char(self) -> char {
        match self {
            FileType::Psbt => 'P',
            FileType::Transaction => 'T',
            FileType::Json => 'J',
            FileType::Cbor => 'C',
            FileType::UnicodeText => 'U',
            FileType::Binary => 'B',
        }
    }

    fn from_char(c: char) -> Result<FileType, CodecError> {
        match c {
            'P' => Ok(FileType::Psbt),
            'T' => Ok(FileType::Transaction),
            'J' => Ok(FileType::Json),
            'C' => Ok(FileType::Cbor),
            'U' => Ok(FileType::UnicodeText),
            'B' => Ok(FileType::Binary),
            _ => Err(CodecError::UnsupportedEncoding(format!(
                "unknown file type '{c}'"
            ))),
        }
    }
}

/// How much encoded text fits into one frame at the chosen QR density
/// (alphanumeric capacity minus the header).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Density {
    Low,
    Medium,
    High,
}

impl Density {
    pub fn max_fragment_chars(self) -> usize {
        match self {
            Density::Low => 300,
            Density::Medium => 750,
            Density::High => 1270,
        }
    }
}

pub fn encode(
    payload: &[u8],
    file_type: FileType,
    encoding: Encoding,
    density: Density,
) -> Result<Vec<String>, CodecError> {
    encode_split(payload, file_type, encoding, density.max_fragment_chars())
}

/// Like [encode], with an explicit per-frame character budget.
pub fn encode_split(
    payload: &[u8],
    file_type: FileType,
    encoding: Encoding,
    max_fragment_chars: usize,
) -> Result<Vec<String>, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::EmptyPayload);
    }

    let text = match encoding {
        Encoding::Hex => hex::encode_upper(payload),
        Encoding::Base32 => base32::encode(payload),
        Encoding::Zlib => base32::encode(&deflate(payload)),
    };

    let total = text.len().div_ceil(max_fragment_chars.max(1));
    if total > MAX_PARTS {
        return Err(CodecError::PayloadTooLarge(total));
    }

    // balanced split: all fragments within one char of each other
    let fragment_chars = text.len().div_ceil(total);
    let frames = text
        .as_bytes()
        .chunks(fragment_chars)
        .enumerate()
        .map(|(index, chunk)| {
            let mut frame = String::with_capacity(HEADER_LEN + chunk.len());
            frame.push_str("B$");
            frame.push(encoding.to_char());
            frame.push(file_type.to_char());
            frame.push_str(&base36(total));
            frame.push_str(&base36(index));
            frame.push_str(std::str::from_utf8(chunk).expect("encoded text is ASCII"));
            frame
        })
        .collect();
    Ok(frames)
}

/// Collects strictly sequential fragments; complete only once every index
/// has been seen. No redundancy, no mixing.
pub struct BbqrDecoder {
    session: Option<Session>,
    parts: BTreeMap<usize, String>,
    result: Option<Result<Vec<u8>, CodecError>>,
}

struct Session {
    encoding: Encoding,
    file_type: FileType,
    total: usize,
}

impl Default for BbqrDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BbqrDecoder {
    pub fn new() -> BbqrDecoder {
        BbqrDecoder {
            session: None,
            parts: BTreeMap::default(),
            result: None,
        }
    }

    /// Feeds one received frame; malformed and cross-session frames are
    /// ignored. Returns whether the frame was accepted.
    pub fn receive_part(&mut self, frame: &str) -> bool {
        if self.result.is_some() {
            return false;
        }

        match self.try_receive(frame) {
            Ok(accepted) => accepted,
            Err(e) => {
                debug!("ignoring frame: {}", e);
                false
            }
        }
    }

    fn try_receive(&mut self, frame: &str) -> Result<bool, CodecError> {
        let frame = frame.to_uppercase();
        let (encoding, file_type, total, index, fragment) = parse_frame(&frame)?;

        match &self.session {
            None => {
                self.session = Some(Session {
                    encoding,
                    file_type,
                    total,
                });
            }
            Some(session) => {
                if session.encoding != encoding
                    || session.file_type != file_type
                    || session.total != total
                {
                    warn!("frame header disagrees with the running session - ignoring it");
                    return Err(CodecError::SessionConflict);
                }
            }
        }

        match self.parts.get(&index) {
            Some(existing) if existing == fragment => {
                debug!("received duplicate of fragment {}", index);
                return Ok(true);
            }
            Some(_) => {
                warn!("fragment {} received twice with different content - ignoring it", index);
                return Err(CodecError::SessionConflict);
            }
            None => {
                self.parts.insert(index, fragment.to_string());
            }
        }

        if self.parts.len() == total {
            self.reassemble();
        }
        Ok(true)
    }

    fn reassemble(&mut self) {
        let session = self.session.as_ref().expect("reassemble requires a session");

        let text: String = self.parts.values().map(String::as_str).collect();
        let decoded = match session.encoding {
            Encoding::Hex => hex::decode(&text)
                .map_err(|e| CodecError::MalformedFrame(format!("invalid hex: {e}"))),
            Encoding::Base32 => base32::decode(&text),
            Encoding::Zlib => base32::decode(&text).and_then(|compressed| inflate(&compressed)),
        };
        self.result = Some(decoded);
    }

    /// terminal success
    pub fn is_complete(&self) -> bool {
        matches!(self.result, Some(Ok(_)))
    }

    /// terminal failure: all fragments arrived but the inner encoding does
    /// not decode
    pub fn is_failed(&self) -> bool {
        matches!(self.result, Some(Err(_)))
    }

    pub fn result(&self) -> Option<&Result<Vec<u8>, CodecError>> {
        self.result.as_ref()
    }

    pub fn file_type(&self) -> Option<FileType> {
        self.session.as_ref().map(|s| s.file_type)
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.session.as_ref().map(|s| s.encoding)
    }

    pub fn total_parts(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.total)
    }

    /// distinct fragment indices received over the declared total
    pub fn percent_complete(&self) -> f64 {
        match &self.session {
            None => 0.0,
            Some(session) => self.parts.len() as f64 / session.total as f64,
        }
    }
}

fn parse_frame(frame: &str) -> Result<(Encoding, FileType, usize, usize, &str), CodecError> {
    if frame.len() < HEADER_LEN || !frame.is_ascii() {
        return Err(CodecError::MalformedFrame("frame shorter than the header".to_string()));
    }
    let (header, fragment) = frame.split_at(HEADER_LEN);
    if &header[..2] != "B$" {
        return Err(CodecError::MalformedFrame("missing B$ marker".to_string()));
    }

    let mut chars = header[2..].chars();
    let encoding = Encoding::from_char(chars.next().expect("header length checked"))?;
    let file_type = FileType::from_char(chars.next().expect("header length checked"))?;

    let total = parse_base36(&header[4..6])?;
    let index = parse_base36(&header[6..8])?;
    if total == 0 || index >= total {
        return Err(CodecError::MalformedFrame(format!(
            "fragment index {index} out of range for {total} fragments"
        )));
    }

    Ok((encoding, file_type, total, index, fragment))
}

fn base36(value: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    debug_assert!(value < 36 * 36);
    let mut s = String::with_capacity(2);
    s.push(DIGITS[value / 36 % 36] as char);
    s.push(DIGITS[value % 36] as char);
    s
}

fn parse_base36(digits: &str) -> Result<usize, CodecError> {
    usize::from_str_radix(digits, 36)
        .map_err(|_| CodecError::MalformedFrame(format!("invalid base-36 digits '{digits}'")))
}

fn deflate(payload: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::best());
    encoder
        .write_all(payload)
        .and_then(|()| encoder.finish())
        .expect("deflating into a Vec cannot fail")
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut payload = Vec::new();
    flate2::read::DeflateDecoder::new(compressed)
        .read_to_end(&mut payload)
        .map_err(|e| CodecError::MalformedFrame(format!("invalid deflate stream: {e}")))?;
    Ok(payload)
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use crate::util::xoshiro::Xoshiro256;

    use super::*;

    #[test]
    fn test_single_frame_golden() {
        let frames =
            encode(&[0xde, 0xad, 0xbe, 0xef], FileType::Binary, Encoding::Hex, Density::Low)
                .unwrap();
        assert_eq!(frames, vec!["B$HB0100DEADBEEF".to_string()]);
    }

    #[test]
    fn test_header_counts_in_base36() {
        let payload = Xoshiro256::from("bbqr").next_data(300);
        // 600 hex chars at 12 per frame: 50 frames, "1E" in base 36
        let frames = encode_split(&payload, FileType::Psbt, Encoding::Hex, 12).unwrap();
        assert_eq!(frames.len(), 50);
        assert!(frames[0].starts_with("B$HP1E00"));
        assert!(frames[36].starts_with("B$HP1E10"));
        assert!(frames[49].starts_with("B$HP1E1D"));
    }

    #[test]
    fn test_fragments_are_balanced() {
        let payload = Xoshiro256::from("split").next_data(100);
        // 200 hex chars, budget 60: 4 frames of 50 chars instead of 60/60/60/20
        let frames = encode_split(&payload, FileType::Binary, Encoding::Hex, 60).unwrap();
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| f.len() == HEADER_LEN + 50));
    }

    #[rstest]
    #[case::hex(Encoding::Hex)]
    #[case::base32(Encoding::Base32)]
    #[case::zlib(Encoding::Zlib)]
    fn test_roundtrip(#[case] encoding: Encoding) {
        let payload = Xoshiro256::from("roundtrip").next_data(1000);
        let frames = encode_split(&payload, FileType::Cbor, encoding, 100).unwrap();
        assert!(frames.len() > 1);

        let mut decoder = BbqrDecoder::new();
        for frame in &frames {
            assert!(!decoder.is_complete());
            assert!(decoder.receive_part(frame));
        }

        assert!(decoder.is_complete());
        assert_eq!(decoder.result().unwrap().as_ref().unwrap(), &payload);
        assert_eq!(decoder.file_type(), Some(FileType::Cbor));
        assert_eq!(decoder.encoding(), Some(encoding));
    }

    #[test]
    fn test_zlib_shrinks_repetitive_payloads() {
        let payload = vec![0x42u8; 4000];
        let zlib = encode_split(&payload, FileType::Binary, Encoding::Zlib, 1000).unwrap();
        let hex = encode_split(&payload, FileType::Binary, Encoding::Hex, 1000).unwrap();
        assert!(zlib.len() < hex.len());

        let mut decoder = BbqrDecoder::new();
        for frame in &zlib {
            decoder.receive_part(frame);
        }
        assert_eq!(decoder.result().unwrap().as_ref().unwrap(), &payload);
    }

    #[test]
    fn test_out_of_order_and_duplicates() {
        let payload = Xoshiro256::from("order").next_data(200);
        let frames = encode_split(&payload, FileType::Json, Encoding::Base32, 40).unwrap();

        let mut decoder = BbqrDecoder::new();
        for frame in frames.iter().rev() {
            decoder.receive_part(frame);
            decoder.receive_part(frame); // duplicate is a no-op
        }

        assert!(decoder.is_complete());
        assert_eq!(decoder.result().unwrap().as_ref().unwrap(), &payload);
    }

    #[test]
    fn test_incomplete_until_every_fragment_arrives() {
        let payload = Xoshiro256::from("missing").next_data(300);
        let frames = encode_split(&payload, FileType::Binary, Encoding::Hex, 100).unwrap();
        assert!(frames.len() >= 3);

        let mut decoder = BbqrDecoder::new();
        for frame in frames.iter().skip(1) {
            decoder.receive_part(frame);
        }
        assert!(!decoder.is_complete());
        let expected = (frames.len() - 1) as f64 / frames.len() as f64;
        assert_eq!(decoder.percent_complete(), expected);

        decoder.receive_part(&frames[0]);
        assert!(decoder.is_complete());
        assert_eq!(decoder.percent_complete(), 1.0);
    }

    #[test]
    fn test_lowercase_frames_are_accepted() {
        let payload = Xoshiro256::from("case").next_data(50);
        let frames = encode_split(&payload, FileType::Binary, Encoding::Base32, 200).unwrap();

        let mut decoder = BbqrDecoder::new();
        assert!(decoder.receive_part(&frames[0].to_lowercase()));
        assert_eq!(decoder.result().unwrap().as_ref().unwrap(), &payload);
    }

    #[test]
    fn test_conflicting_sessions_are_ignored() {
        let payload_a = Xoshiro256::from("a").next_data(200);
        let payload_b = Xoshiro256::from("b").next_data(900);
        let frames_a = encode_split(&payload_a, FileType::Binary, Encoding::Hex, 100).unwrap();
        let frames_b = encode_split(&payload_b, FileType::Binary, Encoding::Hex, 100).unwrap();

        let mut decoder = BbqrDecoder::new();
        assert!(decoder.receive_part(&frames_a[0]));
        // different total - different transfer
        assert!(!decoder.receive_part(&frames_b[1]));

        for frame in &frames_a {
            decoder.receive_part(frame);
        }
        assert_eq!(decoder.result().unwrap().as_ref().unwrap(), &payload_a);
    }

    #[rstest]
    #[case::too_short("B$HB01")]
    #[case::wrong_marker("C$HB0100AA")]
    #[case::unknown_encoding("B$XB0100AA")]
    #[case::unknown_file_type("B$HX0100AA")]
    #[case::bad_base36("B$HB0+00AA")]
    #[case::index_out_of_range("B$HB0101AA")]
    #[case::zero_total("B$HB0000AA")]
    fn test_bad_frames_are_ignored(#[case] frame: &str) {
        let mut decoder = BbqrDecoder::new();
        assert!(!decoder.receive_part(frame));
        assert!(decoder.session.is_none());
        assert_eq!(decoder.percent_complete(), 0.0);
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(
            encode(&[], FileType::Binary, Encoding::Hex, Density::Low),
            Err(CodecError::EmptyPayload)
        ));
    }

    #[test]
    fn test_too_many_fragments_rejected() {
        let payload = vec![0xa5u8; 20_000];
        // 40000 hex chars at 10 per frame would need 4000 frames
        assert!(matches!(
            encode_split(&payload, FileType::Binary, Encoding::Hex, 10),
            Err(CodecError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_corrupted_fragment_fails_reassembly() {
        let payload = Xoshiro256::from("corrupt").next_data(100);
        let frames = encode_split(&payload, FileType::Binary, Encoding::Zlib, 50).unwrap();

        let mut decoder = BbqrDecoder::new();
        for (i, frame) in frames.iter().enumerate() {
            if i == 0 {
                // zero out the fragment body, keeping the header intact; the
                // deflate stream then starts with an invalid stored block
                let mut damaged = frame.clone();
                let tail_len = damaged.split_off(HEADER_LEN).len();
                damaged.push_str(&"A".repeat(tail_len));
                decoder.receive_part(&damaged);
            } else {
                decoder.receive_part(frame);
            }
        }

        assert!(decoder.is_failed());
        assert!(matches!(
            decoder.result(),
            Some(Err(CodecError::MalformedFrame(_)))
        ));
    }
}
