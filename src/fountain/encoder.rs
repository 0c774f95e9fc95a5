use crate::error::CodecError;
use crate::fountain::chooser::choose_fragments;
use crate::fountain::part::Part;
use crate::fountain::xor_into;
use crate::util::checksum::crc32;

/// Fragments below this length gain nothing over a shorter part stream, so
/// the fragment length search never goes lower.
pub const MIN_FRAGMENT_LEN: usize = 10;

/// Splits a message into equal-length fragments and produces an unbounded
/// stream of parts. The first `sequence_count` parts are the fragments
/// themselves; every later part is an XOR mix selected by [choose_fragments].
///
/// State is nothing but the fragment table and a monotonically increasing
/// sequence counter - previously produced parts are not remembered.
pub struct FountainEncoder {
    message_len: usize,
    checksum: u32,
    fragment_len: usize,
    fragments: Vec<Vec<u8>>,
    next_seq_num: u64,
}

impl FountainEncoder {
    pub fn new(message: &[u8], max_fragment_len: usize) -> Result<FountainEncoder, CodecError> {
        Self::with_first_seq_num(message, max_fragment_len, 1)
    }

    pub fn with_first_seq_num(
        message: &[u8],
        max_fragment_len: usize,
        first_seq_num: u64,
    ) -> Result<FountainEncoder, CodecError> {
        if message.is_empty() {
            return Err(CodecError::EmptyPayload);
        }

        let fragment_len = fragment_length(message.len(), max_fragment_len);
        let fragments = partition(message, fragment_len);

        Ok(FountainEncoder {
            message_len: message.len(),
            checksum: crc32(message),
            fragment_len,
            fragments,
            next_seq_num: first_seq_num.max(1),
        })
    }

    pub fn next_part(&mut self) -> Part {
        let seq_num = self.next_seq_num;
        self.next_seq_num += 1;

        let indexes = choose_fragments(seq_num, self.fragments.len(), self.checksum);
        let mut data = vec![0u8; self.fragment_len];
        for index in &indexes {
            xor_into(&mut data, &self.fragments[*index]);
        }

        Part::new(
            seq_num,
            self.fragments.len(),
            self.message_len,
            self.checksum,
            data,
        )
    }

    /// true once at least one full pass over all fragments has been emitted;
    /// callers wanting redundancy keep calling [Self::next_part] regardless
    pub fn is_complete(&self) -> bool {
        self.next_seq_num > self.fragments.len() as u64
    }

    pub fn is_single_part(&self) -> bool {
        self.fragments.len() == 1
    }

    pub fn sequence_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn current_sequence_number(&self) -> u64 {
        self.next_seq_num - 1
    }

    pub fn fragment_len(&self) -> usize {
        self.fragment_len
    }

    pub fn message_len(&self) -> usize {
        self.message_len
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }
}

/// The smallest even split that fits the caller's cap: fragment counts are
/// tried in increasing order and the first count whose balanced fragment
/// length is within `max_fragment_len` wins. The [MIN_FRAGMENT_LEN] floor
/// wins over a smaller cap.
fn fragment_length(message_len: usize, max_fragment_len: usize) -> usize {
    let max_fragment_count = (message_len / MIN_FRAGMENT_LEN).max(1);

    let mut fragment_len = message_len;
    for fragment_count in 1..=max_fragment_count {
        fragment_len = message_len.div_ceil(fragment_count);
        if fragment_len <= max_fragment_len {
            break;
        }
    }
    fragment_len
}

/// fixed-size slices, the last one zero-padded to the full fragment length
fn partition(message: &[u8], fragment_len: usize) -> Vec<Vec<u8>> {
    let mut fragments: Vec<Vec<u8>> = message
        .chunks(fragment_len)
        .map(|chunk| chunk.to_vec())
        .collect();
    if let Some(last) = fragments.last_mut() {
        last.resize(fragment_len, 0);
    }
    fragments
}
