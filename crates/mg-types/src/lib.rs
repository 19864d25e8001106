//! Core types shared by the modelgrid crates: setting values, per-model fit
//! outcomes and the grid error type.

pub mod errors;
pub mod fit;
pub mod settings;

pub use errors::*;
pub use fit::*;
pub use settings::*;
