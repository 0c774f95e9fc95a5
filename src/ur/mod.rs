//! The `ur:` textual unit framing: a self-describing container carrying a
//! type tag, an optional sequence path and a minimal-bytewords body.
//!
//! Single-part: `ur:<type>/<body>`. Multi-part:
//! `ur:<type>/<seq>-<count>/<body>`, where the body is the CBOR encoding of
//! a fountain [Part](crate::fountain::Part). The payload itself travels
//! CBOR-wrapped as a byte string, so the fountain checksum and length cover
//! the CBOR bytes.

use ciborium::value::Value;
use tracing::{debug, warn};

use crate::bytewords;
use crate::bytewords::Style;
use crate::error::CodecError;
use crate::fountain::{FountainDecoder, FountainEncoder, Part};

/// A typed payload: an opaque byte sequence plus a short tag telling the
/// caller what the bytes mean. Immutable once constructed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Ur {
    pub ur_type: String,
    pub payload: Vec<u8>,
}

impl Ur {
    pub fn new(ur_type: &str, payload: &[u8]) -> Result<Ur, CodecError> {
        if !is_valid_type(ur_type) {
            return Err(CodecError::InvalidType(ur_type.to_string()));
        }
        Ok(Ur {
            ur_type: ur_type.to_string(),
            payload: payload.to_vec(),
        })
    }
}

/// type tags travel inside QR alphanumeric frames: lowercase letters,
/// digits and hyphens only
fn is_valid_type(ur_type: &str) -> bool {
    !ur_type.is_empty()
        && ur_type
            .bytes()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'-')
}

fn cbor_wrap(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 5);
    ciborium::ser::into_writer(&Value::Bytes(payload.to_vec()), &mut buf)
        .expect("writing CBOR to a Vec cannot fail");
    buf
}

fn cbor_unwrap(cbor: &[u8]) -> Result<Vec<u8>, CodecError> {
    let value: Value = ciborium::de::from_reader(cbor)
        .map_err(|e| CodecError::MalformedFrame(format!("invalid CBOR payload: {e}")))?;
    match value {
        Value::Bytes(payload) => Ok(payload),
        _ => Err(CodecError::MalformedFrame(
            "payload is not a CBOR byte string".to_string(),
        )),
    }
}

/// Encodes a payload as one single-part unit, regardless of size. For
/// payloads that should be spread over several frames use [UrEncoder].
pub fn encode(ur_type: &str, payload: &[u8]) -> Result<String, CodecError> {
    let ur = Ur::new(ur_type, payload)?;
    Ok(format!(
        "ur:{}/{}",
        ur.ur_type,
        bytewords::encode(&cbor_wrap(&ur.payload), Style::Minimal)
    ))
}

/// Produces the part stream for one payload. Stateless apart from the
/// fountain sequence counter; callers keep calling [Self::next_part] past
/// [Self::is_complete] for arbitrarily more redundancy.
pub struct UrEncoder {
    ur_type: String,
    message: Vec<u8>,
    fountain: FountainEncoder,
    emitted_single_part: bool,
}

impl UrEncoder {
    pub fn new(ur_type: &str, payload: &[u8], max_fragment_len: usize) -> Result<UrEncoder, CodecError> {
        let ur = Ur::new(ur_type, payload)?;
        let message = cbor_wrap(&ur.payload);
        let fountain = FountainEncoder::new(&message, max_fragment_len)?;

        Ok(UrEncoder {
            ur_type: ur.ur_type,
            message,
            fountain,
            emitted_single_part: false,
        })
    }

    pub fn next_part(&mut self) -> String {
        if self.fountain.is_single_part() {
            // no sequence path at all - the single frame is self-sufficient
            self.emitted_single_part = true;
            return format!(
                "ur:{}/{}",
                self.ur_type,
                bytewords::encode(&self.message, Style::Minimal)
            );
        }

        let part = self.fountain.next_part();
        format!(
            "ur:{}/{}-{}/{}",
            self.ur_type,
            part.seq_num(),
            part.seq_count(),
            bytewords::encode(&part.to_cbor(), Style::Minimal)
        )
    }

    pub fn is_complete(&self) -> bool {
        if self.fountain.is_single_part() {
            self.emitted_single_part
        } else {
            self.fountain.is_complete()
        }
    }

    pub fn sequence_count(&self) -> usize {
        self.fountain.sequence_count()
    }

    pub fn is_single_part(&self) -> bool {
        self.fountain.is_single_part()
    }
}

/// One decode session. Feed it wire strings in any order, with duplication
/// and loss; poll [Self::is_complete] / [Self::result].
pub struct UrDecoder {
    ur_type: Option<String>,
    fountain: FountainDecoder,
    multi_part_started: bool,
    result: Option<Result<Ur, CodecError>>,
}

impl Default for UrDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl UrDecoder {
    pub fn new() -> UrDecoder {
        UrDecoder {
            ur_type: None,
            fountain: FountainDecoder::new(),
            multi_part_started: false,
            result: None,
        }
    }

    /// Feeds one received frame. Malformed frames and frames belonging to a
    /// different transfer are ignored - the session only fails terminally on
    /// a checksum mismatch after full reassembly.
    pub fn receive_part(&mut self, encoded: &str) -> bool {
        if self.result.is_some() {
            return false;
        }

        match self.try_receive(encoded) {
            Ok(accepted) => accepted,
            Err(e) => {
                debug!("ignoring frame: {}", e);
                false
            }
        }
    }

    fn try_receive(&mut self, encoded: &str) -> Result<bool, CodecError> {
        // QR alphanumeric mode delivers uppercase
        let encoded = encoded.to_lowercase();

        let rest = encoded
            .strip_prefix("ur:")
            .ok_or_else(|| CodecError::MalformedFrame("missing ur: scheme".to_string()))?;

        let segments: Vec<&str> = rest.split('/').collect();
        match segments[..] {
            [ur_type, body] => self.receive_single_part(ur_type, body),
            [ur_type, seq_path, body] => self.receive_multi_part(ur_type, seq_path, body),
            _ => Err(CodecError::MalformedFrame(
                "expected 2 or 3 path segments".to_string(),
            )),
        }
    }

    fn receive_single_part(&mut self, ur_type: &str, body: &str) -> Result<bool, CodecError> {
        self.check_type(ur_type)?;
        if self.multi_part_started {
            warn!("single-part frame in a running multi-part session - ignoring it");
            return Err(CodecError::SessionConflict);
        }

        let cbor = bytewords::decode(body, Style::Minimal)?;
        let payload = cbor_unwrap(&cbor)?;

        self.ur_type = Some(ur_type.to_string());
        self.result = Some(Ok(Ur {
            ur_type: ur_type.to_string(),
            payload,
        }));
        Ok(true)
    }

    fn receive_multi_part(
        &mut self,
        ur_type: &str,
        seq_path: &str,
        body: &str,
    ) -> Result<bool, CodecError> {
        self.check_type(ur_type)?;

        let (seq_num, seq_count) = parse_seq_path(seq_path)?;
        let cbor = bytewords::decode(body, Style::Minimal)?;
        let part = Part::from_cbor(&cbor)?;

        // the path is redundant with the CBOR body; disagreement means the
        // frame was mangled
        if part.seq_num() != seq_num || part.seq_count() != seq_count {
            return Err(CodecError::MalformedFrame(format!(
                "sequence path {seq_num}-{seq_count} disagrees with part {}-{}",
                part.seq_num(),
                part.seq_count()
            )));
        }

        let accepted = self.fountain.receive_part(&part);
        if accepted {
            // only a fully accepted frame may fix the session's type tag
            self.ur_type = Some(ur_type.to_string());
            self.multi_part_started = true;
        }

        if let Some(fountain_result) = self.fountain.result() {
            self.result = Some(match fountain_result {
                Ok(message) => cbor_unwrap(message).map(|payload| Ur {
                    ur_type: ur_type.to_string(),
                    payload,
                }),
                Err(e) => Err(e.clone()),
            });
        }
        Ok(accepted)
    }

    /// the type tag is fixed by the first fully accepted frame, never by a
    /// frame that later turns out to be malformed
    fn check_type(&self, ur_type: &str) -> Result<(), CodecError> {
        if !is_valid_type(ur_type) {
            return Err(CodecError::InvalidType(ur_type.to_string()));
        }
        match &self.ur_type {
            None => Ok(()),
            Some(expected) if expected == ur_type => Ok(()),
            Some(_) => Err(CodecError::SessionConflict),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.result, Some(Ok(_)))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.result, Some(Err(_)))
    }

    pub fn result(&self) -> Option<&Result<Ur, CodecError>> {
        self.result.as_ref()
    }

    pub fn ur_type(&self) -> Option<&str> {
        self.ur_type.as_deref()
    }

    /// fraction of fragments resolved, in [0, 1], monotonically
    /// non-decreasing; single-part sessions jump straight to 1
    pub fn percent_complete(&self) -> f64 {
        if self.is_complete() {
            1.0
        } else {
            self.fountain.percent_complete()
        }
    }
}

fn parse_seq_path(seq_path: &str) -> Result<(u64, usize), CodecError> {
    let malformed =
        || CodecError::MalformedFrame(format!("invalid sequence path '{seq_path}'"));

    let (seq_num, seq_count) = seq_path.split_once('-').ok_or_else(malformed)?;
    let seq_num: u64 = seq_num.parse().map_err(|_| malformed())?;
    let seq_count: usize = seq_count.parse().map_err(|_| malformed())?;
    if seq_num == 0 || seq_count == 0 {
        return Err(malformed());
    }
    Ok((seq_num, seq_count))
}
