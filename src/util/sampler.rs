use crate::util::xoshiro::Xoshiro256;

/// Weighted random index sampling using the Walker/Vose alias method.
///
/// The table construction and the draw both have to be reproduced exactly as
/// in the reference implementation (including the descending scan order when
/// partitioning the normalized weights), otherwise encoder and decoder
/// disagree on fragment selection.
pub struct WeightedSampler {
    probs: Vec<f64>,
    aliases: Vec<usize>,
}

impl WeightedSampler {
    pub fn new(weights: &[f64]) -> WeightedSampler {
        let n = weights.len();
        let sum: f64 = weights.iter().sum();
        let ratio = n as f64 / sum;
        let mut p: Vec<f64> = weights.iter().map(|w| w * ratio).collect();

        let mut small = Vec::new();
        let mut large = Vec::new();
        for i in (0..n).rev() {
            if p[i] < 1.0 {
                small.push(i);
            } else {
                large.push(i);
            }
        }

        let mut probs = vec![0.0; n];
        let mut aliases = vec![0usize; n];

        while let (Some(&a), Some(&g)) = (small.last(), large.last()) {
            small.pop();
            large.pop();
            probs[a] = p[a];
            aliases[a] = g;
            p[g] += p[a] - 1.0;
            if p[g] < 1.0 {
                small.push(g);
            } else {
                large.push(g);
            }
        }
        while let Some(g) = large.pop() {
            probs[g] = 1.0;
        }
        while let Some(a) = small.pop() {
            // only reachable through numerical instability
            probs[a] = 1.0;
        }

        WeightedSampler { probs, aliases }
    }

    pub fn next(&self, rng: &mut Xoshiro256) -> usize {
        let r1 = rng.next_double();
        let r2 = rng.next_double();
        let i = (self.probs.len() as f64 * r1) as usize;
        if r2 < self.probs[i] {
            i
        } else {
            self.aliases[i]
        }
    }
}
