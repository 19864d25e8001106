//! Training orchestration: consolidate, seed, fit, and fold the outcomes
//! back into the grid's fit registry.

use chrono::{DateTime, Duration, Utc};
use mg_types::{FitError, FitResult, GridError, GridResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::grid::ModelGrid;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::trainer::{Seeder, Trainer};

/// Seed used when none is configured.
pub const DEFAULT_RESAMPLE_SEED: u64 = 123;

/// Options for [`ModelGrid::train`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainOptions {
    /// Retrain every model, including those that already have a fit.
    pub train_all: bool,
    /// Seed set right before each fit. `None` leaves the random state alone.
    pub resample_seed: Option<u64>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            train_all: false,
            resample_seed: Some(DEFAULT_RESAMPLE_SEED),
        }
    }
}

impl TrainOptions {
    pub fn with_train_all(mut self, train_all: bool) -> Self {
        self.train_all = train_all;
        self
    }

    pub fn with_resample_seed(mut self, seed: Option<u64>) -> Self {
        self.resample_seed = seed;
        self
    }

    /// Read options from `MODELGRID_TRAIN_ALL` and `MODELGRID_RESAMPLE_SEED`.
    ///
    /// Unset or unparsable variables keep their defaults. A seed of `none`
    /// disables seeding.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();

        if let Some(raw) = lookup("MODELGRID_TRAIN_ALL") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => options.train_all = true,
                "0" | "false" | "no" => options.train_all = false,
                other => warn!("Ignoring invalid MODELGRID_TRAIN_ALL value: {}", other),
            }
        }

        if let Some(raw) = lookup("MODELGRID_RESAMPLE_SEED") {
            let raw = raw.trim();
            if raw.eq_ignore_ascii_case("none") {
                options.resample_seed = None;
            } else {
                match raw.parse::<u64>() {
                    Ok(seed) => options.resample_seed = Some(seed),
                    Err(e) => warn!("Ignoring invalid MODELGRID_RESAMPLE_SEED {:?}: {}", raw, e),
                }
            }
        }

        options
    }
}

/// Summary of one [`ModelGrid::train`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Every model attempted in this run, in registration order.
    pub trained: Vec<String>,
    /// The subset of `trained` whose fit failed.
    pub failed: Vec<String>,
}

impl TrainingReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.trained
            .iter()
            .filter(|name| !self.failed.contains(name))
            .map(String::as_str)
    }

    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }
}

impl<A> ModelGrid<A> {
    /// Train every pending model (or every model with `train_all`).
    ///
    /// For each model the complete configuration is consolidated, the seeder
    /// is reset to `resample_seed` and the trainer is called right after.
    /// A failing fit is stored as [`FitResult::Failure`] and never stops the
    /// remaining models; failures are reported in one warning at the end.
    ///
    /// Fails without touching the grid when it has no models, or when every
    /// model is already fitted and `train_all` is off.
    pub fn train<T, S, P>(
        &mut self,
        trainer: &mut T,
        seeder: &mut S,
        progress: &P,
        options: TrainOptions,
    ) -> GridResult<TrainingReport>
    where
        T: Trainer<Artifact = A> + ?Sized,
        S: Seeder + ?Sized,
        P: ProgressSink + ?Sized,
    {
        if self.models.is_empty() {
            return Err(GridError::EmptyGrid);
        }

        let pending: Vec<String> = if options.train_all {
            self.models.keys().cloned().collect()
        } else {
            self.pending_models().into_iter().map(str::to_owned).collect()
        };
        if pending.is_empty() {
            return Err(GridError::AlreadyTrained);
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "Training {} of {} models (run {})",
            pending.len(),
            self.models.len(),
            run_id
        );

        let mut results = Vec::with_capacity(pending.len());
        for name in &pending {
            let result = self.fit_model(
                name,
                &mut *trainer,
                &mut *seeder,
                progress,
                options.resample_seed,
            );
            results.push((name.clone(), result));
        }

        if pending.len() == self.models.len() {
            self.model_fits.clear();
        }
        let mut failed = Vec::new();
        for (name, result) in results {
            if result.is_failure() {
                failed.push(name.clone());
            }
            self.model_fits.insert(name, result);
        }

        if !failed.is_empty() {
            warn!(
                "Training failed for {} model(s): {}",
                failed.len(),
                failed.join(", ")
            );
        }
        info!(
            "Training run {} finished: {} succeeded, {} failed",
            run_id,
            pending.len() - failed.len(),
            failed.len()
        );

        Ok(TrainingReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            trained: pending,
            failed,
        })
    }

    fn fit_model<T, S, P>(
        &self,
        name: &str,
        trainer: &mut T,
        seeder: &mut S,
        progress: &P,
        seed: Option<u64>,
    ) -> FitResult<A>
    where
        T: Trainer<Artifact = A> + ?Sized,
        S: Seeder + ?Sized,
        P: ProgressSink + ?Sized,
    {
        progress.on_event(&ProgressEvent::started(name));

        let result = match self.consolidate_model(name) {
            Ok(config) => {
                if let Some(seed) = seed {
                    seeder.set_seed(seed);
                }
                match trainer.fit(&config) {
                    Ok(artifact) => FitResult::Success(artifact),
                    Err(e) => {
                        debug!("Trainer error for model {}: {:#}", name, e);
                        FitResult::Failure(FitError::new(name, format!("{e:#}")))
                    }
                }
            }
            Err(e) => FitResult::Failure(FitError::new(name, e.to_string())),
        };

        progress.on_event(&ProgressEvent::finished(name, result.is_success()));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ChannelProgress, Silent};
    use crate::trainer::{trainer_fn, NoSeed, SharedRng};
    use crossbeam_channel::unbounded;
    use mg_types::{SettingValue, SettingsMap, CUSTOM_CONTROL_KEY, TRAIN_CONTROL_KEY};
    use parking_lot::Mutex;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io;
    use std::rc::Rc;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Seed(u64),
        Fit(String),
    }

    type Log = Rc<RefCell<Vec<Call>>>;

    /// Returns the configuration it was given; fails on `method = "broken"`.
    struct StubTrainer {
        log: Log,
    }

    impl Trainer for StubTrainer {
        type Artifact = SettingsMap;

        fn fit(&mut self, config: &SettingsMap) -> anyhow::Result<SettingsMap> {
            let method = config
                .get("method")
                .and_then(SettingValue::as_str)
                .unwrap_or_default()
                .to_string();
            self.log.borrow_mut().push(Call::Fit(method.clone()));
            if method == "broken" {
                anyhow::bail!("{method} did not converge");
            }
            Ok(config.clone())
        }
    }

    struct RecordingSeeder {
        log: Log,
    }

    impl Seeder for RecordingSeeder {
        fn set_seed(&mut self, seed: u64) {
            self.log.borrow_mut().push(Call::Seed(seed));
        }
    }

    fn mocks() -> (Log, StubTrainer, RecordingSeeder) {
        let log: Log = Rc::default();
        let trainer = StubTrainer { log: log.clone() };
        let seeder = RecordingSeeder { log: log.clone() };
        (log, trainer, seeder)
    }

    fn grid_with(models: &[(&str, &str)]) -> ModelGrid<SettingsMap> {
        let mut grid = ModelGrid::new();
        for (name, method) in models {
            grid.add_model(Some(*name), SettingsMap::new().with("method", *method))
                .unwrap();
        }
        grid
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[test]
    fn empty_grid_cannot_be_trained() {
        let (log, mut trainer, mut seeder) = mocks();
        let mut grid: ModelGrid<SettingsMap> = ModelGrid::new();

        let err = grid
            .train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap_err();

        assert!(matches!(err, GridError::EmptyGrid));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn shared_and_model_settings_reach_the_trainer() {
        let (log, mut trainer, mut seeder) = mocks();
        let mut grid = ModelGrid::new();
        grid.share_settings(SettingsMap::new().with("metric", "ROC"));
        grid.add_model(Some("M1"), SettingsMap::new().with("method", "glm"))
            .unwrap();

        let options = TrainOptions::default().with_resample_seed(Some(42));
        grid.train(&mut trainer, &mut seeder, &Silent, options)
            .unwrap();

        let expected = SettingsMap::new().with("metric", "ROC").with("method", "glm");
        assert_eq!(grid.fits().len(), 1);
        assert_eq!(grid.fit("M1"), Some(&FitResult::Success(expected)));
        assert_eq!(
            *log.borrow(),
            vec![Call::Seed(42), Call::Fit("glm".into())]
        );
    }

    #[test]
    fn seed_is_reset_right_before_every_fit() {
        let (log, mut trainer, mut seeder) = mocks();
        let mut grid = grid_with(&[("A", "glm"), ("B", "rf"), ("C", "knn")]);

        grid.train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                Call::Seed(DEFAULT_RESAMPLE_SEED),
                Call::Fit("glm".into()),
                Call::Seed(DEFAULT_RESAMPLE_SEED),
                Call::Fit("rf".into()),
                Call::Seed(DEFAULT_RESAMPLE_SEED),
                Call::Fit("knn".into()),
            ]
        );
    }

    #[test]
    fn no_seed_means_no_seed_calls() {
        let (log, mut trainer, mut seeder) = mocks();
        let mut grid = grid_with(&[("A", "glm"), ("B", "rf")]);

        let options = TrainOptions::default().with_resample_seed(None);
        grid.train(&mut trainer, &mut seeder, &Silent, options)
            .unwrap();

        assert!(log.borrow().iter().all(|call| matches!(call, Call::Fit(_))));
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn only_pending_models_are_trained() {
        let (log, mut trainer, mut seeder) = mocks();
        let mut grid = grid_with(&[("A", "glm")]);
        grid.train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap();
        let fit_a = grid.fit("A").cloned();

        grid.add_model(Some("B"), SettingsMap::new().with("method", "rf"))
            .unwrap();
        log.borrow_mut().clear();
        let report = grid
            .train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap();

        assert_eq!(report.trained, vec!["B"]);
        assert_eq!(
            *log.borrow(),
            vec![Call::Seed(DEFAULT_RESAMPLE_SEED), Call::Fit("rf".into())]
        );
        assert_eq!(grid.fits().keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(grid.fit("A").cloned(), fit_a);
    }

    #[test]
    fn fully_trained_grid_requires_train_all() {
        let (log, mut trainer, mut seeder) = mocks();
        let mut grid = grid_with(&[("A", "glm"), ("B", "rf")]);
        grid.train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap();
        log.borrow_mut().clear();
        let first_fits = grid.fits().clone();
        grid.share_settings(SettingsMap::new().with("metric", "Kappa"));

        let err = grid
            .train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap_err();
        assert!(matches!(err, GridError::AlreadyTrained));
        assert!(log.borrow().is_empty());
        assert_eq!(grid.fits(), &first_fits);

        let report = grid
            .train(
                &mut trainer,
                &mut seeder,
                &Silent,
                TrainOptions::default().with_train_all(true),
            )
            .unwrap();
        assert_eq!(report.trained, vec!["A", "B"]);
        assert_eq!(grid.fits().len(), 2);
        assert_ne!(grid.fits(), &first_fits);
        for name in ["A", "B"] {
            assert_eq!(
                grid.fit(name)
                    .and_then(FitResult::artifact)
                    .and_then(|config| config.get("metric")),
                Some(&SettingValue::from("Kappa"))
            );
        }
    }

    #[test]
    fn edited_model_is_retrained_alone() {
        let (log, mut trainer, mut seeder) = mocks();
        let mut grid = grid_with(&[("A", "glm"), ("B", "rf")]);
        grid.train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap();

        grid.edit_model("B", SettingsMap::new().with("method", "ranger"))
            .unwrap();
        assert_eq!(grid.pending_models(), vec!["B"]);
        log.borrow_mut().clear();

        grid.train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap();

        assert_eq!(
            *log.borrow(),
            vec![Call::Seed(DEFAULT_RESAMPLE_SEED), Call::Fit("ranger".into())]
        );
        assert_eq!(
            grid.fit("B")
                .and_then(FitResult::artifact)
                .and_then(|config| config.get("method")),
            Some(&SettingValue::from("ranger"))
        );
    }

    #[test]
    fn failures_are_isolated_and_reported() {
        let (log, mut trainer, mut seeder) = mocks();
        let mut grid = grid_with(&[("A", "broken"), ("B", "glm")]);
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .finish();

        let report = tracing::subscriber::with_default(subscriber, || {
            grid.train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
        })
        .unwrap();

        assert_eq!(log.borrow().len(), 4);
        assert!(report.has_failures());
        assert_eq!(report.failed, vec!["A"]);
        assert_eq!(report.succeeded().collect::<Vec<_>>(), vec!["B"]);

        let failure = grid.fit("A").and_then(FitResult::error).unwrap();
        assert_eq!(failure.model, "A");
        assert!(failure.message.contains("did not converge"));
        assert!(grid.fit("B").is_some_and(FitResult::is_success));
        assert_eq!(grid.failed_fits().count(), 1);
        assert_eq!(grid.successful_fits().map(|(name, _)| name).collect::<Vec<_>>(), vec!["B"]);

        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("Training failed for 1 model(s): A"));
    }

    #[test]
    fn fits_are_sorted_by_name() {
        let (_log, mut trainer, mut seeder) = mocks();
        let mut grid = grid_with(&[("zeta", "glm"), ("alpha", "rf"), ("mid", "knn")]);

        grid.train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap();

        assert_eq!(
            grid.fits().keys().collect::<Vec<_>>(),
            vec!["alpha", "mid", "zeta"]
        );
    }

    #[test]
    fn custom_control_is_consolidated_before_fitting() {
        let (_log, mut trainer, mut seeder) = mocks();
        let mut grid = ModelGrid::new();
        grid.share_settings(SettingsMap::new().with(
            TRAIN_CONTROL_KEY,
            SettingsMap::new().with("method", "cv").with("number", 5),
        ));
        grid.add_model(
            Some("rf"),
            SettingsMap::new()
                .with("method", "rf")
                .with(CUSTOM_CONTROL_KEY, SettingsMap::new().with("number", 10)),
        )
        .unwrap();

        grid.train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap();

        let config = grid.fit("rf").and_then(FitResult::artifact).unwrap();
        assert_eq!(
            config.get(TRAIN_CONTROL_KEY),
            Some(&SettingValue::Map(
                SettingsMap::new().with("method", "cv").with("number", 10)
            ))
        );
        assert!(!config.contains_key(CUSTOM_CONTROL_KEY));
    }

    #[test]
    fn unmergeable_control_fails_only_that_model() {
        let (log, mut trainer, mut seeder) = mocks();
        let mut grid = ModelGrid::new();
        grid.share_settings(SettingsMap::new().with(TRAIN_CONTROL_KEY, "cv"));
        grid.add_model(
            Some("A"),
            SettingsMap::new()
                .with("method", "glm")
                .with(CUSTOM_CONTROL_KEY, SettingsMap::new().with("number", 3)),
        )
        .unwrap();
        grid.add_model(Some("B"), SettingsMap::new().with("method", "rf"))
            .unwrap();

        let report = grid
            .train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap();

        assert_eq!(report.failed, vec!["A"]);
        assert_eq!(
            *log.borrow(),
            vec![Call::Seed(DEFAULT_RESAMPLE_SEED), Call::Fit("rf".into())]
        );
    }

    #[test]
    fn progress_events_bracket_each_fit() {
        let (_log, mut trainer, mut seeder) = mocks();
        let mut grid = grid_with(&[("A", "broken"), ("B", "glm")]);
        let (tx, rx) = unbounded();

        grid.train(
            &mut trainer,
            &mut seeder,
            &ChannelProgress::new(tx),
            TrainOptions::default(),
        )
        .unwrap();

        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        let summary: Vec<(String, Option<bool>)> = events
            .iter()
            .map(|event| match event {
                ProgressEvent::Started { model, .. } => (model.clone(), None),
                ProgressEvent::Finished { model, success, .. } => (model.clone(), Some(*success)),
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("A".to_string(), None),
                ("A".to_string(), Some(false)),
                ("B".to_string(), None),
                ("B".to_string(), Some(true)),
            ]
        );
    }

    #[test]
    fn shared_rng_gives_every_model_the_same_draws() {
        let rng = SharedRng::new(0);
        let draws = rng.clone();
        let mut trainer = trainer_fn(move |_config: &SettingsMap| Ok(draws.bootstrap_indices(50, 8)));
        let mut seeder = rng;
        let mut grid = ModelGrid::new();
        grid.add_model(None, SettingsMap::new()).unwrap();
        grid.add_model(None, SettingsMap::new()).unwrap();

        grid.train(&mut trainer, &mut seeder, &Silent, TrainOptions::default())
            .unwrap();

        let samples: Vec<&Vec<usize>> = grid.successful_fits().map(|(_, s)| s).collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], samples[1]);
    }

    #[test]
    fn report_timing_is_ordered() {
        let mut trainer = trainer_fn(|_config: &SettingsMap| Ok(()));
        let mut grid = ModelGrid::new();
        grid.add_model(None, SettingsMap::new()).unwrap();

        let report = grid
            .train(&mut trainer, &mut NoSeed, &Silent, TrainOptions::default())
            .unwrap();

        assert!(report.duration() >= Duration::zero());
        assert_eq!(report.trained, vec!["Model1"]);
        assert!(!report.has_failures());
    }

    #[test]
    fn options_default_and_env_lookup() {
        let defaults = TrainOptions::default();
        assert!(!defaults.train_all);
        assert_eq!(defaults.resample_seed, Some(123));

        let env: HashMap<&str, &str> = [
            ("MODELGRID_TRAIN_ALL", "true"),
            ("MODELGRID_RESAMPLE_SEED", "42"),
        ]
        .into();
        let options = TrainOptions::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert!(options.train_all);
        assert_eq!(options.resample_seed, Some(42));

        let options = TrainOptions::from_lookup(|k| {
            (k == "MODELGRID_RESAMPLE_SEED").then(|| "None".to_string())
        });
        assert_eq!(options.resample_seed, None);

        let options = TrainOptions::from_lookup(|_| Some("garbage".to_string()));
        assert_eq!(options, TrainOptions::default());
    }
}
