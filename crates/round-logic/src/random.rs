//! Seeded pseudo-random number generator
//!
//! Every random decision in an experiment (group draw, role assignment,
//! treatment pick, timeout fallback, bot moves) goes through [`Randomness`]
//! so that a session can be replayed from its seed.

/// Source of randomness used by the matching and payoff code.
///
/// Only `next_u64` is required; the remaining helpers derive from it.
pub trait Randomness {
    /// Generate next u64
    fn next_u64(&mut self) -> u64;

    /// Generate next u32
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Generate a value 0-99 (for percentage checks)
    fn next_percent(&mut self) -> u8 {
        (self.next_u32() % 100) as u8
    }

    /// Generate a value in range [0, max)
    fn next_range(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        self.next_u32() % max
    }

    /// Fair coin flip
    fn next_bool(&mut self) -> bool {
        self.next_u64() & 1 == 1
    }

    /// In-place Fisher-Yates shuffle
    fn shuffle<T>(&mut self, items: &mut [T])
    where
        Self: Sized,
    {
        for i in (1..items.len()).rev() {
            let j = self.next_range(i as u32 + 1) as usize;
            items.swap(i, j);
        }
    }

    /// Uniformly pick one element
    fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T>
    where
        Self: Sized,
    {
        if items.is_empty() {
            return None;
        }
        items.get(self.next_range(items.len() as u32) as usize)
    }
}

/// Seeded random number generator
///
/// Deterministic: same seed + stream = same sequence.
/// Uses xorshift64*.
#[derive(Clone, Debug)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    /// Create a new RNG from a 32-byte seed and a stream index
    pub fn new(seed: &[u8; 32], stream: u32) -> Self {
        let mut state = 0u64;
        for (i, chunk) in seed.chunks(8).enumerate() {
            let mut bytes = [0u8; 8];
            bytes[..chunk.len()].copy_from_slice(chunk);
            state ^= u64::from_le_bytes(bytes).wrapping_add(i as u64);
        }

        state ^= (stream as u64).wrapping_mul(0x517cc1b727220a95);

        // xorshift has a fixed point at zero
        if state == 0 {
            state = 0x9e3779b97f4a7c15;
        }

        let mut rng = Self { state };
        for _ in 0..8 {
            rng.next_u64();
        }

        rng
    }

    /// Convenience constructor from a plain numeric seed (config files use these)
    pub fn from_u64(seed: u64) -> Self {
        let mut bytes = [0u8; 32];
        for chunk in bytes.chunks_mut(8) {
            chunk.copy_from_slice(&seed.to_le_bytes());
        }
        Self::new(&bytes, 0)
    }

    /// Derive an independent generator, e.g. one per group
    pub fn fork(&self, stream: u64) -> Self {
        let mut state = self.state ^ stream.wrapping_mul(0x9e3779b97f4a7c15);
        if state == 0 {
            state = 0x2545f4914f6cdd1d;
        }
        let mut rng = Self { state };
        rng.next_u64();
        rng
    }
}

impl Randomness for SeededRng {
    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        self.state.wrapping_mul(0x2545f4914f6cdd1d)
    }
}
