//! The model grid: shared settings, the model registry and the fit registry.

use indexmap::IndexMap;
use mg_types::{FitError, FitResult, GridError, GridResult, SettingsMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::merge::{check_custom_control, consolidate, merge_top_level};

/// The declarative half of a grid: what to train, without any fits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridDeclaration {
    #[serde(default)]
    pub shared_settings: SettingsMap,
    #[serde(default)]
    pub models: IndexMap<String, SettingsMap>,
}

/// A batch of model configurations sharing common settings, together with
/// the fits trained from them.
///
/// Invariants:
/// - model names are unique;
/// - every fit belongs to a registered model, and editing or removing a
///   model drops its fit;
/// - fits are kept in lexicographic order by model name.
#[derive(Debug, Clone)]
pub struct ModelGrid<A> {
    pub(crate) shared_settings: SettingsMap,
    pub(crate) models: IndexMap<String, SettingsMap>,
    pub(crate) model_fits: BTreeMap<String, FitResult<A>>,
}

impl<A> Default for ModelGrid<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> ModelGrid<A> {
    /// Create an empty grid.
    pub fn new() -> Self {
        Self {
            shared_settings: SettingsMap::new(),
            models: IndexMap::new(),
            model_fits: BTreeMap::new(),
        }
    }

    /// Rebuild an untrained grid from its declaration.
    pub fn from_declaration(declaration: GridDeclaration) -> GridResult<Self> {
        for (name, spec) in &declaration.models {
            check_custom_control(spec).map_err(|source| GridError::InvalidControl {
                model: name.clone(),
                source,
            })?;
        }
        Ok(Self {
            shared_settings: declaration.shared_settings,
            models: declaration.models,
            model_fits: BTreeMap::new(),
        })
    }

    pub fn from_declaration_json(json: &str) -> GridResult<Self> {
        Self::from_declaration(serde_json::from_str(json)?)
    }

    pub fn declaration(&self) -> GridDeclaration {
        GridDeclaration {
            shared_settings: self.shared_settings.clone(),
            models: self.models.clone(),
        }
    }

    pub fn declaration_to_json(&self) -> GridResult<String> {
        Ok(serde_json::to_string_pretty(&self.declaration())?)
    }

    // -- Declaration ----------------------------------------------------------

    /// Merge settings into the shared settings. Existing keys are
    /// overwritten, `trControl` included.
    pub fn share_settings(&mut self, settings: SettingsMap) {
        debug!("Sharing {} settings across the grid", settings.len());
        merge_top_level(&mut self.shared_settings, &settings);
    }

    /// Register a model. Without a name (or with an empty one) the model is
    /// called `Model<k>` for the smallest unused `k >= 1`.
    ///
    /// Returns the name the model was registered under.
    pub fn add_model(&mut self, name: Option<&str>, settings: SettingsMap) -> GridResult<String> {
        let name = match name.filter(|n| !n.is_empty()) {
            Some(name) if self.models.contains_key(name) => {
                return Err(GridError::DuplicateName {
                    name: name.to_string(),
                })
            }
            Some(name) => name.to_string(),
            None => self.next_model_name(),
        };
        check_custom_control(&settings).map_err(|source| GridError::InvalidControl {
            model: name.clone(),
            source,
        })?;

        debug!("Adding model {} with {} settings", name, settings.len());
        self.models.insert(name.clone(), settings);
        Ok(name)
    }

    /// Overwrite settings of a registered model and drop its fit.
    pub fn edit_model(&mut self, name: &str, settings: SettingsMap) -> GridResult<()> {
        let spec = self.models.get_mut(name).ok_or_else(|| GridError::NotFound {
            name: name.to_string(),
        })?;
        check_custom_control(&settings).map_err(|source| GridError::InvalidControl {
            model: name.to_string(),
            source,
        })?;

        merge_top_level(spec, &settings);
        if self.model_fits.remove(name).is_some() {
            debug!("Discarded stale fit for edited model {}", name);
        }
        Ok(())
    }

    /// Remove a model together with its fit. Returns the removed settings.
    pub fn remove_model(&mut self, name: &str) -> GridResult<SettingsMap> {
        let spec = self
            .models
            .shift_remove(name)
            .ok_or_else(|| GridError::NotFound {
                name: name.to_string(),
            })?;
        self.model_fits.remove(name);
        debug!("Removed model {}", name);
        Ok(spec)
    }

    fn next_model_name(&self) -> String {
        let mut k = 1usize;
        loop {
            let candidate = format!("Model{k}");
            if !self.models.contains_key(&candidate) {
                return candidate;
            }
            k += 1;
        }
    }

    // -- Consolidation --------------------------------------------------------

    /// Complete configuration of one model: shared settings overlaid with the
    /// model's own.
    pub fn consolidate_model(&self, name: &str) -> GridResult<SettingsMap> {
        let spec = self.models.get(name).ok_or_else(|| GridError::NotFound {
            name: name.to_string(),
        })?;
        consolidate(&self.shared_settings, spec).map_err(|source| GridError::InvalidControl {
            model: name.to_string(),
            source,
        })
    }

    /// Complete configurations of every model, in registration order.
    pub fn consolidated_models(&self) -> GridResult<IndexMap<String, SettingsMap>> {
        self.models
            .keys()
            .map(|name| {
                self.consolidate_model(name)
                    .map(|complete| (name.clone(), complete))
            })
            .collect()
    }

    // -- Queries --------------------------------------------------------------

    pub fn shared_settings(&self) -> &SettingsMap {
        &self.shared_settings
    }

    pub fn models(&self) -> &IndexMap<String, SettingsMap> {
        &self.models
    }

    pub fn model(&self, name: &str) -> Option<&SettingsMap> {
        self.models.get(name)
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Fits keyed by model name, in lexicographic order.
    pub fn fits(&self) -> &BTreeMap<String, FitResult<A>> {
        &self.model_fits
    }

    pub fn fit(&self, name: &str) -> Option<&FitResult<A>> {
        self.model_fits.get(name)
    }

    /// Whether a fit (successful or not) is stored for `name`.
    pub fn is_fitted(&self, name: &str) -> bool {
        self.model_fits.contains_key(name)
    }

    /// Models without a stored fit, in registration order.
    pub fn pending_models(&self) -> Vec<&str> {
        self.model_names()
            .filter(|name| !self.model_fits.contains_key(*name))
            .collect()
    }

    pub fn successful_fits(&self) -> impl Iterator<Item = (&str, &A)> {
        self.model_fits
            .iter()
            .filter_map(|(name, fit)| fit.artifact().map(|artifact| (name.as_str(), artifact)))
    }

    pub fn failed_fits(&self) -> impl Iterator<Item = &FitError> {
        self.model_fits.values().filter_map(FitResult::error)
    }
}

impl<A> fmt::Display for ModelGrid<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Model grid with {} model(s), {} fitted",
            self.models.len(),
            self.model_fits.len()
        )?;

        writeln!(f, "Shared settings:")?;
        if self.shared_settings.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for (key, value) in &self.shared_settings {
            writeln!(f, "  {key}: {value}")?;
        }

        writeln!(f, "Models:")?;
        if self.models.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for (name, spec) in &self.models {
            let status = match self.model_fits.get(name) {
                Some(FitResult::Success(_)) => "fitted",
                Some(FitResult::Failure(_)) => "failed",
                None => "pending",
            };
            writeln!(f, "  {name} [{status}]: {spec}")?;
        }
        Ok(())
    }
}
