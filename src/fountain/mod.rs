//! Fountain-coded multi-part transfer: a payload is split into equal-sized
//! fragments, and an unbounded stream of parts is generated where each part
//! is the XOR of a deterministically chosen fragment subset. Any
//! sufficiently large subset of parts reconstructs the payload, tolerating
//! lost, duplicated and reordered parts.

pub mod chooser;
pub mod decoder;
pub mod encoder;
pub mod part;

pub use decoder::FountainDecoder;
pub use encoder::FountainEncoder;
pub use part::Part;

/// in-place XOR; both buffers must have the fragment length
pub(crate) fn xor_into(target: &mut [u8], source: &[u8]) {
    debug_assert_eq!(target.len(), source.len());
    for (t, s) in target.iter_mut().zip(source) {
        *t ^= s;
    }
}
