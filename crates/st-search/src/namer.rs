//! Stable names for model config variants.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use st_types::ParameterCombination;

/// Hands out variant names for (base model, parameter combination) pairs.
///
/// Cloning yields another handle onto the same registry, so one namer can be
/// shared by every generator in a run and names stay unique across all of
/// them. Equal combinations always get the name issued the first time.
#[derive(Debug, Clone, Default)]
pub struct VariantNamer {
    issued: Arc<Mutex<HashMap<String, Vec<(ParameterCombination, String)>>>>,
}

impl VariantNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_name(base: &str) -> String {
        format!("{base}_config_default")
    }

    pub fn name(&self, base: &str, combination: &ParameterCombination) -> String {
        if combination.is_default() {
            return Self::default_name(base);
        }

        let mut issued = self.issued.lock();
        let names = issued.entry(base.to_string()).or_default();
        if let Some((_, name)) = names.iter().find(|(seen, _)| seen == combination) {
            return name.clone();
        }

        let name = format!("{base}_config_{}", names.len());
        names.push((combination.clone(), name.clone()));
        name
    }

    /// Number of non-default names issued for `base` so far.
    pub fn issued_for(&self, base: &str) -> usize {
        self.issued.lock().get(base).map_or(0, Vec::len)
    }
}
