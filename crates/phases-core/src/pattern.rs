use std::time::{SystemTime, UNIX_EPOCH};

pub const MAX_EVERY_NTH: u8 = 8;

/// Whole-track step patterns offered by the pattern buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    EveryNth(u8),
    Random,
    Clear,
}

impl Pattern {
    /// `None` unless `n` is one of the offered buttons, `1..=8`.
    pub fn every(n: u8) -> Option<Self> {
        (1..=MAX_EVERY_NTH).contains(&n).then_some(Self::EveryNth(n))
    }

    pub fn render(self, length: usize, rng: &mut StepRng) -> Vec<bool> {
        match self {
            Pattern::EveryNth(n) => every_nth(length, n),
            Pattern::Random => (0..length).map(|_| rng.coin()).collect(),
            Pattern::Clear => vec![false; length],
        }
    }

    pub fn is_deterministic(self) -> bool {
        !matches!(self, Pattern::Random)
    }
}

pub fn every_nth(length: usize, n: u8) -> Vec<bool> {
    let n = usize::from(n.max(1));
    (0..length).map(|i| i % n == 0).collect()
}

/// Source for the randomize button. Not reproducible unless seeded.
#[derive(Debug, Clone)]
pub struct StepRng(oorandom::Rand32);

impl Default for StepRng {
    fn default() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        Self::seeded(seed)
    }
}

impl StepRng {
    pub fn seeded(seed: u64) -> Self {
        Self(oorandom::Rand32::new(seed))
    }

    pub fn coin(&mut self) -> bool {
        self.0.rand_u32() & 1 == 1
    }
}
