use std::collections::BTreeSet;

use crate::util::sampler::WeightedSampler;
use crate::util::xoshiro::Xoshiro256;

/// Selects the fragment indices mixed into the part with the given sequence
/// number. Encoder and decoder run this independently with the same inputs,
/// so everything in here - seeding, degree weighting, shuffle order - is
/// fixed by the wire format.
///
/// The first `seq_count` parts are the plain fragments in order, which
/// guarantees a receiver that sees them without loss decodes trivially.
pub fn choose_fragments(seq_num: u64, seq_count: usize, checksum: u32) -> BTreeSet<usize> {
    if seq_num <= seq_count as u64 {
        return BTreeSet::from([(seq_num - 1) as usize]);
    }

    let mut seed = Vec::with_capacity(8);
    seed.extend_from_slice(&(seq_num as u32).to_be_bytes());
    seed.extend_from_slice(&checksum.to_be_bytes());
    let mut rng = Xoshiro256::from_bytes(&seed);

    let degree = choose_degree(seq_count, &mut rng);

    // full shuffle, then take the first `degree` entries: the number of rng
    // draws must not depend on the degree
    let mut remaining: Vec<usize> = (0..seq_count).collect();
    let mut shuffled = Vec::with_capacity(seq_count);
    while !remaining.is_empty() {
        let index = rng.next_int(0, remaining.len() as u64 - 1) as usize;
        shuffled.push(remaining.remove(index));
    }

    shuffled.into_iter().take(degree).collect()
}

/// Degree drawn from weights 1/1, 1/2, .. 1/n: strongly favors low-degree
/// parts so most mixed parts reduce quickly.
fn choose_degree(seq_count: usize, rng: &mut Xoshiro256) -> usize {
    let weights: Vec<f64> = (1..=seq_count).map(|i| 1.0 / i as f64).collect();
    WeightedSampler::new(&weights).next(rng) + 1
}
