//! Settings consolidation.
//!
//! A model's complete configuration is its shared settings overlaid with
//! the model-specific settings. Top-level keys are replaced wholesale,
//! except for the reserved `custom_control` block, which is merged path by
//! path into the `trControl` training-control map.

use mg_types::{MergeError, SettingValue, SettingsMap, CUSTOM_CONTROL_KEY, TRAIN_CONTROL_KEY};

/// Overwrite `target` with every key of `overrides`. Values are replaced
/// entirely, nested maps included.
pub fn merge_top_level(target: &mut SettingsMap, overrides: &SettingsMap) {
    for (key, value) in overrides {
        target.insert(key.clone(), value.clone());
    }
}

/// Recursively merge `overrides` into `target`.
///
/// A map merges into an existing map at the same key; any other value
/// replaces what is there. Paths absent from `overrides` are left intact.
pub fn deep_merge(target: &mut SettingsMap, overrides: &SettingsMap) {
    for (key, value) in overrides {
        if let (Some(SettingValue::Map(existing)), SettingValue::Map(nested)) =
            (target.get_mut(key), value)
        {
            deep_merge(existing, nested);
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

/// Check that a model's `custom_control` entry, if any, is a map.
pub fn check_custom_control(model: &SettingsMap) -> Result<(), MergeError> {
    match model.get(CUSTOM_CONTROL_KEY) {
        Some(value) if !value.is_map() => Err(MergeError::ControlNotMap {
            found: value.type_name(),
        }),
        _ => Ok(()),
    }
}

/// Build the complete configuration for one model.
///
/// Neither input is modified. Fails only when `custom_control` or the
/// `trControl` it must merge into is not a map.
pub fn consolidate(shared: &SettingsMap, model: &SettingsMap) -> Result<SettingsMap, MergeError> {
    let mut complete = shared.clone();
    for (key, value) in model {
        if key != CUSTOM_CONTROL_KEY {
            complete.insert(key.clone(), value.clone());
        }
    }

    let Some(custom) = model.get(CUSTOM_CONTROL_KEY) else {
        return Ok(complete);
    };
    let custom = custom.as_map().ok_or(MergeError::ControlNotMap {
        found: custom.type_name(),
    })?;

    match complete.get_mut(TRAIN_CONTROL_KEY) {
        Some(SettingValue::Map(control)) => deep_merge(control, custom),
        Some(other) => {
            return Err(MergeError::TrainControlNotMap {
                found: other.type_name(),
            })
        }
        None => {
            complete.insert(TRAIN_CONTROL_KEY, custom.clone());
        }
    }

    Ok(complete)
}
