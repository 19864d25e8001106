//! Capabilities the grid consumes while training: the model fitter and the
//! seed control that precedes every fit.

use mg_types::SettingsMap;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// External model-fitting routine.
///
/// Receives one complete (consolidated) configuration and produces a fitted
/// artifact. Errors are captured per model by the grid and never abort the
/// remaining fits.
pub trait Trainer {
    type Artifact;

    fn fit(&mut self, config: &SettingsMap) -> anyhow::Result<Self::Artifact>;
}

/// Adapter turning a closure into a [`Trainer`].
pub struct TrainerFn<F>(F);

/// Wrap a closure as a [`Trainer`].
pub fn trainer_fn<A, F>(f: F) -> TrainerFn<F>
where
    F: FnMut(&SettingsMap) -> anyhow::Result<A>,
{
    TrainerFn(f)
}

impl<A, F> Trainer for TrainerFn<F>
where
    F: FnMut(&SettingsMap) -> anyhow::Result<A>,
{
    type Artifact = A;

    fn fit(&mut self, config: &SettingsMap) -> anyhow::Result<A> {
        (self.0)(config)
    }
}

/// Resets the randomness the trainer draws from.
///
/// The grid calls `set_seed` once per model, immediately before that
/// model's `fit`, so every model sees the same resampling draws.
pub trait Seeder {
    fn set_seed(&mut self, seed: u64);
}

/// Seeder for trainers that manage their own randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSeed;

impl Seeder for NoSeed {
    fn set_seed(&mut self, _seed: u64) {}
}

/// Shared, reseedable random source.
///
/// Clones share the same generator: hand one clone to the trainer and the
/// other to [`crate::ModelGrid::train`] as the seeder.
#[derive(Debug, Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<ChaCha8Rng>>,
}

impl SharedRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Run `f` with exclusive access to the generator.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut ChaCha8Rng) -> R) -> R {
        let mut rng = self.inner.lock();
        f(&mut *rng)
    }

    pub fn next_u64(&self) -> u64 {
        self.with_rng(|rng| rng.random())
    }

    /// Draw `k` row indices from `0..n` with replacement (a bootstrap sample).
    pub fn bootstrap_indices(&self, n: usize, k: usize) -> Vec<usize> {
        if n == 0 {
            return Vec::new();
        }
        self.with_rng(|rng| (0..k).map(|_| rng.random_range(0..n)).collect())
    }
}

impl Default for SharedRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Seeder for SharedRng {
    fn set_seed(&mut self, seed: u64) {
        *self.inner.lock() = ChaCha8Rng::seed_from_u64(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_types::SettingValue;

    #[test]
    fn closure_trainer_sees_config() {
        let mut trainer = trainer_fn(|config: &SettingsMap| {
            Ok(config.get("method").and_then(SettingValue::as_str).map(str::to_owned))
        });

        let fitted = trainer
            .fit(&SettingsMap::new().with("method", "glm"))
            .unwrap();
        assert_eq!(fitted.as_deref(), Some("glm"));
    }

    #[test]
    fn reseeding_replays_draws() {
        let mut rng = SharedRng::new(7);
        let handle = rng.clone();

        rng.set_seed(123);
        let first = handle.bootstrap_indices(100, 10);
        rng.set_seed(123);
        let second = handle.bootstrap_indices(100, 10);

        assert_eq!(first, second);
        assert!(first.iter().all(|&i| i < 100));
    }

    #[test]
    fn different_seeds_diverge() {
        let mut rng = SharedRng::default();
        rng.set_seed(1);
        let a = rng.next_u64();
        rng.set_seed(2);
        let b = rng.next_u64();
        assert_ne!(a, b);
    }

    #[test]
    fn bootstrap_of_empty_population() {
        assert!(SharedRng::new(1).bootstrap_indices(0, 5).is_empty());
    }
}
