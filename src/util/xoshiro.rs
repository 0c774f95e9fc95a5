use sha2::{Digest, Sha256};

/// Deterministic xoshiro256** generator.
///
/// Encoder and decoder derive fragment-selection choices from this
/// independently, so the output stream must be bit-identical across
/// implementations and platforms for a given seed. The scrambling constants
/// and the SHA-256 seed folding are fixed by the wire format - do not touch
/// them.
pub struct Xoshiro256 {
    s: [u64; 4],
}

impl Xoshiro256 {
    /// Seeds the generator by hashing arbitrary-length seed bytes into the
    /// four state words (big-endian split of the SHA-256 digest).
    pub fn from_bytes(seed: &[u8]) -> Xoshiro256 {
        let digest = Sha256::digest(seed);

        let mut s = [0u64; 4];
        for (i, word) in s.iter_mut().enumerate() {
            let mut v = 0u64;
            for n in 0..8 {
                v <<= 8;
                v |= digest[i * 8 + n] as u64;
            }
            *word = v;
        }

        Xoshiro256 { s }
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = self.s[1]
            .wrapping_mul(5)
            .rotate_left(7)
            .wrapping_mul(9);

        let t = self.s[1] << 17;
        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];
        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() % (u32::MAX as u64 + 1)) as u32
    }

    /// uniform in [0, 1)
    pub fn next_double(&mut self) -> f64 {
        self.next_u64() as f64 / ((u64::MAX as f64) + 1.0)
    }

    /// uniform integer in [low, high], both bounds inclusive
    pub fn next_int(&mut self, low: u64, high: u64) -> u64 {
        (self.next_double() * (high - low + 1) as f64) as u64 + low
    }

    pub fn next_byte(&mut self) -> u8 {
        self.next_int(0, 255) as u8
    }

    pub fn next_data(&mut self, count: usize) -> Vec<u8> {
        (0..count).map(|_| self.next_byte()).collect()
    }
}

impl From<&str> for Xoshiro256 {
    fn from(seed: &str) -> Xoshiro256 {
        Xoshiro256::from_bytes(seed.as_bytes())
    }
}
