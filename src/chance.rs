//! Chance source shared by scheduling jitter and gameplay randomness.
//!
//! All randomness in the process is routed through one [`ChanceSource`]
//! so that a fixed seed (or a scripted fake in tests) reproduces a run.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChanceError {
    #[error("Invalid range: min {min} is greater than max {max}")]
    InvalidRange { min: String, max: String },
}

impl ChanceError {
    fn range<T: ToString>(min: T, max: T) -> Self {
        ChanceError::InvalidRange {
            min: min.to_string(),
            max: max.to_string(),
        }
    }
}

/// Source of uniform random decisions.
pub trait ChanceSource: Send + Sync {
    /// True with probability `likelihood_percent / 100`. Values outside
    /// `[0, 100]` are clamped.
    fn bool(&self, likelihood_percent: f64) -> bool;

    /// Uniform integer in `[min, max]` inclusive.
    fn natural(&self, min: i64, max: i64) -> Result<i64, ChanceError>;

    /// Uniform real in `[min, max]`.
    fn floating(&self, min: f64, max: f64) -> Result<f64, ChanceError>;
}

fn clamp_likelihood(likelihood_percent: f64) -> f64 {
    if likelihood_percent.is_nan() {
        return 0.0;
    }
    likelihood_percent.clamp(0.0, 100.0)
}

/// Production chance source backed by a seedable `StdRng`.
pub struct SeededChance {
    rng: Mutex<StdRng>,
}

impl SeededChance {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        // A poisoned generator is still a valid generator.
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut rng)
    }
}

impl ChanceSource for SeededChance {
    fn bool(&self, likelihood_percent: f64) -> bool {
        let p = clamp_likelihood(likelihood_percent) / 100.0;
        self.with_rng(|rng| rng.random_bool(p))
    }

    fn natural(&self, min: i64, max: i64) -> Result<i64, ChanceError> {
        if min > max {
            return Err(ChanceError::range(min, max));
        }
        Ok(self.with_rng(|rng| rng.random_range(min..=max)))
    }

    fn floating(&self, min: f64, max: f64) -> Result<f64, ChanceError> {
        if !(min <= max) || !min.is_finite() || !max.is_finite() {
            return Err(ChanceError::range(min, max));
        }
        if min == max {
            return Ok(min);
        }
        Ok(self.with_rng(|rng| rng.random_range(min..=max)))
    }
}

/// Deterministic chance source replaying queued answers.
///
/// Each kind of decision has its own queue. When a queue runs dry the
/// fallback answer is used: `bool` passes iff the likelihood is at least
/// `fallback_bool_threshold`, `natural` returns `min`, `floating` returns `min`.
/// Range checks still apply, so invalid ranges fail exactly like the
/// production source.
pub struct ScriptedChance {
    state: Mutex<ScriptState>,
}

struct ScriptState {
    bools: VecDeque<bool>,
    naturals: VecDeque<i64>,
    floats: VecDeque<f64>,
    fallback_bool_threshold: f64,
}

impl Default for ScriptedChance {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChance {
    /// A source where every probability check at 100% passes and every other fails.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState {
                bools: VecDeque::new(),
                naturals: VecDeque::new(),
                floats: VecDeque::new(),
                fallback_bool_threshold: 100.0,
            }),
        }
    }

    /// A source whose unscripted probability checks always pass.
    pub fn always_lucky() -> Self {
        let chance = Self::new();
        chance.lock().fallback_bool_threshold = 0.0;
        chance
    }

    pub fn with_bools(self, values: impl IntoIterator<Item = bool>) -> Self {
        self.lock().bools.extend(values);
        self
    }

    pub fn with_naturals(self, values: impl IntoIterator<Item = i64>) -> Self {
        self.lock().naturals.extend(values);
        self
    }

    pub fn with_floats(self, values: impl IntoIterator<Item = f64>) -> Self {
        self.lock().floats.extend(values);
        self
    }

    pub fn push_bool(&self, value: bool) {
        self.lock().bools.push_back(value);
    }

    pub fn push_natural(&self, value: i64) {
        self.lock().naturals.push_back(value);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ChanceSource for ScriptedChance {
    fn bool(&self, likelihood_percent: f64) -> bool {
        let mut state = self.lock();
        match state.bools.pop_front() {
            Some(value) => value,
            None => clamp_likelihood(likelihood_percent) >= state.fallback_bool_threshold,
        }
    }

    fn natural(&self, min: i64, max: i64) -> Result<i64, ChanceError> {
        if min > max {
            return Err(ChanceError::range(min, max));
        }
        let scripted = self.lock().naturals.pop_front();
        Ok(scripted.map(|v| v.clamp(min, max)).unwrap_or(min))
    }

    fn floating(&self, min: f64, max: f64) -> Result<f64, ChanceError> {
        if !(min <= max) {
            return Err(ChanceError::range(min, max));
        }
        let scripted = self.lock().floats.pop_front();
        Ok(scripted.map(|v| v.clamp(min, max)).unwrap_or(min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_stays_in_inclusive_range() {
        let chance = SeededChance::from_seed(7);
        let mut seen_min = false;
        let mut seen_max = false;
        for _ in 0..2000 {
            let v = chance.natural(3, 6).unwrap();
            assert!((3..=6).contains(&v));
            seen_min |= v == 3;
            seen_max |= v == 6;
        }
        assert!(seen_min && seen_max);
    }

    #[test]
    fn test_natural_rejects_inverted_range() {
        let chance = SeededChance::from_seed(1);
        assert_eq!(
            chance.natural(5, 4),
            Err(ChanceError::InvalidRange {
                min: "5".to_string(),
                max: "4".to_string()
            })
        );
    }

    #[test]
    fn test_natural_single_value_range() {
        let chance = SeededChance::from_seed(1);
        assert_eq!(chance.natural(9, 9).unwrap(), 9);
    }

    #[test]
    fn test_floating_within_bounds() {
        let chance = SeededChance::from_seed(11);
        for _ in 0..1000 {
            let v = chance.floating(1.0, 5.0).unwrap();
            assert!((1.0..=5.0).contains(&v));
        }
        assert_eq!(chance.floating(2.5, 2.5).unwrap(), 2.5);
        assert!(chance.floating(3.0, 1.0).is_err());
    }

    #[test]
    fn test_bool_extremes_and_clamping() {
        let chance = SeededChance::from_seed(3);
        for _ in 0..500 {
            assert!(chance.bool(100.0));
            assert!(chance.bool(250.0));
            assert!(!chance.bool(0.0));
            assert!(!chance.bool(-10.0));
        }
    }

    #[test]
    fn test_bool_roughly_matches_likelihood() {
        let chance = SeededChance::from_seed(42);
        let hits = (0..10_000).filter(|_| chance.bool(25.0)).count();
        assert!((2_000..3_000).contains(&hits), "hits = {}", hits);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let a = SeededChance::from_seed(99);
        let b = SeededChance::from_seed(99);
        let seq_a: Vec<i64> = (0..20).map(|_| a.natural(0, 1000).unwrap()).collect();
        let seq_b: Vec<i64> = (0..20).map(|_| b.natural(0, 1000).unwrap()).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn test_scripted_replays_then_falls_back() {
        let chance = ScriptedChance::new()
            .with_bools([false, true])
            .with_naturals([4, 100])
            .with_floats([2.0]);

        assert!(!chance.bool(100.0));
        assert!(chance.bool(0.0));
        assert!(chance.bool(100.0));
        assert!(!chance.bool(99.0));

        assert_eq!(chance.natural(1, 10).unwrap(), 4);
        // Scripted values are clamped into the requested range.
        assert_eq!(chance.natural(1, 10).unwrap(), 10);
        assert_eq!(chance.natural(3, 10).unwrap(), 3);

        assert_eq!(chance.floating(1.0, 5.0).unwrap(), 2.0);
        assert_eq!(chance.floating(1.0, 5.0).unwrap(), 1.0);
    }

    #[test]
    fn test_scripted_validates_ranges() {
        let chance = ScriptedChance::new().with_naturals([1]);
        assert!(chance.natural(2, 1).is_err());
        // The scripted value was not consumed by the failed call.
        assert_eq!(chance.natural(0, 5).unwrap(), 1);
    }

    #[test]
    fn test_always_lucky() {
        let chance = ScriptedChance::always_lucky();
        assert!(chance.bool(0.0525));
    }
}
