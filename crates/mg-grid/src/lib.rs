//! # mg-grid
//!
//! Declaration, consolidation and training orchestration for batches of
//! model configurations.
//!
//! A [`ModelGrid`] holds settings shared by every model, per-model
//! overrides, and the fits trained from them. Training consolidates each
//! pending model into a complete configuration, resets the injected
//! [`Seeder`] and hands the configuration to the injected [`Trainer`].

mod grid;
mod merge;
mod progress;
mod train;
mod trainer;

pub use grid::{GridDeclaration, ModelGrid};
pub use merge::{check_custom_control, consolidate, deep_merge, merge_top_level};
pub use progress::{ChannelProgress, ProgressEvent, ProgressSink, Silent, TracingProgress};
pub use train::{TrainOptions, TrainingReport, DEFAULT_RESAMPLE_SEED};
pub use trainer::{trainer_fn, NoSeed, Seeder, SharedRng, Trainer, TrainerFn};

pub use mg_types::{
    FitError, FitResult, GridError, GridResult, Handle, MergeError, SettingValue, SettingsMap,
    CUSTOM_CONTROL_KEY, TRAIN_CONTROL_KEY,
};
