use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::error::CodecError;
use crate::fountain::chooser::choose_fragments;
use crate::fountain::part::Part;
use crate::fountain::xor_into;
use crate::util::checksum::crc32;

/// Far beyond any practical frame stream; bounds the per-part work a hostile
/// header can demand before the session parameters are fixed.
const MAX_SEQUENCE_COUNT: usize = 1 << 20;

/// Session parameters fixed by the first accepted part. Every later part
/// must agree or it belongs to a different in-flight transfer.
struct Expected {
    seq_count: usize,
    message_len: usize,
    checksum: u32,
    fragment_len: usize,
}

/// A received part that still mixes more than one unresolved fragment:
/// the XOR equation `xor(fragments[indexes]) == value`.
struct PendingPart {
    indexes: BTreeSet<usize>,
    value: Vec<u8>,
}

/// Online peeling decoder.
///
/// Incoming parts are reduced against the already-resolved fragments; a part
/// that collapses to a single unknown fragment resolves it, and each newly
/// resolved fragment is propagated back into the pending equations, which
/// can cascade. Duplicate parts and arbitrary arrival order are tolerated by
/// construction - everything operates on fragment index sets, not arrival
/// order.
pub struct FountainDecoder {
    expected: Option<Expected>,
    fragments: BTreeMap<usize, Vec<u8>>,
    pending: Vec<PendingPart>,
    seen_seq_nums: FxHashSet<u64>,
    result: Option<Result<Vec<u8>, CodecError>>,
}

impl Default for FountainDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FountainDecoder {
    pub fn new() -> FountainDecoder {
        FountainDecoder {
            expected: None,
            fragments: BTreeMap::default(),
            pending: Vec::new(),
            seen_seq_nums: FxHashSet::default(),
            result: None,
        }
    }

    /// Feeds one part into the session. Returns whether the part was
    /// accepted - malformed or cross-session parts are ignored without
    /// failing the session.
    pub fn receive_part(&mut self, part: &Part) -> bool {
        if self.result.is_some() {
            return false;
        }
        if !self.validate(part) {
            return false;
        }

        if !self.seen_seq_nums.insert(part.seq_num()) {
            debug!("received duplicate of part {}", part.seq_num());
            return true;
        }

        let mut indexes = choose_fragments(part.seq_num(), part.seq_count(), part.checksum());
        let mut value = part.data().to_vec();

        // reduce against everything already known
        for index in indexes.clone() {
            if let Some(fragment) = self.fragments.get(&index) {
                xor_into(&mut value, fragment);
                indexes.remove(&index);
            }
        }

        match indexes.len() {
            0 => {
                debug!("part {} is fully explained by known fragments", part.seq_num());
            }
            1 => {
                let index = *indexes.iter().next().unwrap();
                self.resolve(index, value);
            }
            _ => {
                if self.pending.iter().any(|p| p.indexes == indexes) {
                    debug!("part {} duplicates a pending equation", part.seq_num());
                } else {
                    self.pending.push(PendingPart { indexes, value });
                }
            }
        }

        true
    }

    /// Records a newly learned fragment and propagates it through the
    /// pending equations; equations collapsing to a single unknown feed back
    /// into the worklist until nothing changes.
    fn resolve(&mut self, index: usize, data: Vec<u8>) {
        let mut worklist = vec![(index, data)];

        while let Some((index, data)) = worklist.pop() {
            if self.fragments.contains_key(&index) {
                continue;
            }
            self.fragments.insert(index, data);

            let mut still_pending = Vec::new();
            for mut p in std::mem::take(&mut self.pending) {
                if p.indexes.remove(&index) {
                    xor_into(&mut p.value, &self.fragments[&index]);
                }
                match p.indexes.len() {
                    0 => {} // fully explained now, drop
                    1 => {
                        let remaining = *p.indexes.iter().next().unwrap();
                        worklist.push((remaining, p.value));
                    }
                    _ => still_pending.push(p),
                }
            }
            self.pending = still_pending;
        }

        let expected = self.expected.as_ref().expect("resolve requires a fixed session");
        if self.fragments.len() == expected.seq_count {
            self.reassemble();
        }
    }

    fn reassemble(&mut self) {
        let expected = self.expected.as_ref().expect("reassemble requires a fixed session");

        let mut message = Vec::with_capacity(expected.seq_count * expected.fragment_len);
        for fragment in self.fragments.values() {
            message.extend_from_slice(fragment);
        }
        message.truncate(expected.message_len);

        if crc32(&message) == expected.checksum {
            self.result = Some(Ok(message));
        } else {
            warn!("all fragments resolved but the payload checksum does not match");
            self.result = Some(Err(CodecError::ChecksumMismatch));
        }
    }

    /// Checks a part against the session parameters, fixing them on first
    /// contact. A disagreeing part is treated as belonging to an unrelated
    /// transfer and ignored.
    fn validate(&mut self, part: &Part) -> bool {
        if part.seq_num() == 0 {
            warn!("sequence numbering is 1-based - ignoring part");
            return false;
        }
        match &self.expected {
            None => {
                if part.seq_count() == 0 || part.data().is_empty() {
                    warn!("part without fragments - ignoring it");
                    return false;
                }
                if part.seq_count() > MAX_SEQUENCE_COUNT {
                    warn!("implausible sequence count {} - ignoring part", part.seq_count());
                    return false;
                }
                let capacity = part.seq_count().checked_mul(part.data().len());
                if capacity.is_none_or(|c| part.message_len() > c) {
                    warn!(
                        "declared message length {} cannot fit {} fragments of {} bytes - ignoring part",
                        part.message_len(),
                        part.seq_count(),
                        part.data().len()
                    );
                    return false;
                }
                self.expected = Some(Expected {
                    seq_count: part.seq_count(),
                    message_len: part.message_len(),
                    checksum: part.checksum(),
                    fragment_len: part.data().len(),
                });
                true
            }
            Some(expected) => {
                let consistent = part.seq_count() == expected.seq_count
                    && part.message_len() == expected.message_len
                    && part.checksum() == expected.checksum
                    && part.data().len() == expected.fragment_len;
                if !consistent {
                    warn!(
                        "part {} disagrees with the session parameters - ignoring it",
                        part.seq_num()
                    );
                }
                consistent
            }
        }
    }

    /// terminal success
    pub fn is_complete(&self) -> bool {
        matches!(self.result, Some(Ok(_)))
    }

    /// terminal failure (checksum mismatch after full reassembly)
    pub fn is_failed(&self) -> bool {
        matches!(self.result, Some(Err(_)))
    }

    pub fn result(&self) -> Option<&Result<Vec<u8>, CodecError>> {
        self.result.as_ref()
    }

    /// fraction of fragments resolved so far, monotonically non-decreasing
    pub fn percent_complete(&self) -> f64 {
        match &self.expected {
            None => 0.0,
            Some(expected) => self.fragments.len() as f64 / expected.seq_count as f64,
        }
    }
}

#[cfg(test)]
mod test {
    use rand::prelude::*;
    use rstest::rstest;

    use crate::fountain::encoder::FountainEncoder;
    use crate::util::xoshiro::Xoshiro256;

    use super::*;

    fn make_message(len: usize) -> Vec<u8> {
        Xoshiro256::from("Wolf").next_data(len)
    }

    #[rstest]
    #[case::one_byte(1)]
    #[case::single_fragment(10)]
    #[case::exactly_divisible(300)]
    #[case::maximal_padding(271)]
    #[case::larger(1000)]
    fn test_lossless_roundtrip(#[case] len: usize) {
        let message = make_message(len);
        let mut encoder = FountainEncoder::new(&message, 30).unwrap();
        let mut decoder = FountainDecoder::new();

        while !decoder.is_complete() {
            assert!(decoder.receive_part(&encoder.next_part()));
        }

        assert!(encoder.is_complete());
        assert_eq!(decoder.result().unwrap().as_ref().unwrap(), &message);
        assert_eq!(decoder.percent_complete(), 1.0);
    }

    #[test]
    fn test_lossy_roundtrip() {
        let message = make_message(1024);
        let mut encoder = FountainEncoder::new(&message, 40).unwrap();
        let mut decoder = FountainDecoder::new();
        let mut rng = StdRng::seed_from_u64(42);

        // drop roughly 30% of all parts; the stream is unbounded, so the
        // decoder still converges within a small multiple of the part count
        let mut fed = 0;
        while !decoder.is_complete() {
            let part = encoder.next_part();
            if rng.gen_bool(0.3) {
                continue;
            }
            decoder.receive_part(&part);
            fed += 1;
            assert!(fed < 10 * encoder.sequence_count(), "decoder failed to converge");
        }

        assert_eq!(decoder.result().unwrap().as_ref().unwrap(), &message);
    }

    #[test]
    fn test_mixed_parts_alone_can_complete() {
        let message = make_message(256);
        let mut encoder = FountainEncoder::new(&message, 30).unwrap();
        let mut decoder = FountainDecoder::new();

        // skip the entire direct first pass
        for _ in 0..encoder.sequence_count() {
            encoder.next_part();
        }
        let mut fed = 0;
        while !decoder.is_complete() {
            decoder.receive_part(&encoder.next_part());
            fed += 1;
            assert!(fed < 20 * encoder.sequence_count(), "decoder failed to converge");
        }

        assert_eq!(decoder.result().unwrap().as_ref().unwrap(), &message);
    }

    #[test]
    fn test_duplicates_and_reordering_are_tolerated() {
        let message = make_message(400);
        let mut encoder = FountainEncoder::new(&message, 30).unwrap();

        let parts: Vec<Part> = (0..encoder.sequence_count()).map(|_| encoder.next_part()).collect();

        let mut shuffled = parts.clone();
        shuffled.extend(parts.iter().cloned()); // every part twice
        let mut rng = StdRng::seed_from_u64(7);
        shuffled.shuffle(&mut rng);

        let mut decoder = FountainDecoder::new();
        for part in &shuffled {
            decoder.receive_part(part);
        }

        assert!(decoder.is_complete());
        assert_eq!(decoder.result().unwrap().as_ref().unwrap(), &message);
    }

    #[test]
    fn test_conflicting_session_parts_are_ignored() {
        let message_a = make_message(300);
        let message_b = Xoshiro256::from("Other").next_data(300);

        let mut encoder_a = FountainEncoder::new(&message_a, 30).unwrap();
        let mut encoder_b = FountainEncoder::new(&message_b, 30).unwrap();
        let mut decoder = FountainDecoder::new();

        assert!(decoder.receive_part(&encoder_a.next_part()));
        assert!(!decoder.receive_part(&encoder_b.next_part()));

        while !decoder.is_complete() {
            decoder.receive_part(&encoder_a.next_part());
        }
        assert_eq!(decoder.result().unwrap().as_ref().unwrap(), &message_a);
    }

    #[test]
    fn test_percent_complete_is_monotone() {
        let message = make_message(500);
        let mut encoder = FountainEncoder::new(&message, 20).unwrap();
        let mut decoder = FountainDecoder::new();
        let mut rng = StdRng::seed_from_u64(3);

        let mut last = 0.0;
        while !decoder.is_complete() {
            let part = encoder.next_part();
            if rng.gen_bool(0.4) {
                continue;
            }
            decoder.receive_part(&part);
            let current = decoder.percent_complete();
            assert!(current >= last);
            last = current;
        }
        assert_eq!(decoder.percent_complete(), 1.0);
    }

    #[test]
    fn test_padding_never_leaks() {
        // 271 = 10 fragments of 28 with 9 bytes of padding in the last
        let message = make_message(271);
        let mut encoder = FountainEncoder::new(&message, 28).unwrap();
        let mut decoder = FountainDecoder::new();

        while !decoder.is_complete() {
            decoder.receive_part(&encoder.next_part());
        }

        let decoded = decoder.result().unwrap().as_ref().unwrap();
        assert_eq!(decoded.len(), 271);
        assert_eq!(decoded, &message);
    }

    #[test]
    fn test_no_result_before_completion() {
        let message = make_message(300);
        let mut encoder = FountainEncoder::new(&message, 30).unwrap();
        let mut decoder = FountainDecoder::new();

        decoder.receive_part(&encoder.next_part());
        assert!(!decoder.is_complete());
        assert!(!decoder.is_failed());
        assert!(decoder.result().is_none());
    }
}
