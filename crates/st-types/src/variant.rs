//! Server-side config variants and client-side load configurations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::value::ConfigMap;

/// Marker attached to a generated variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantTag {
    /// The unmodified base configuration.
    Default,
    /// Configuration reported by an externally managed server.
    Remote,
    /// The base model must run on CPU only.
    CpuOnly,
}

/// A named, concrete model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigVariant {
    pub name: String,
    pub config: ConfigMap,
    pub tags: Vec<VariantTag>,
}

impl ConfigVariant {
    pub fn new(name: impl Into<String>, config: ConfigMap) -> Self {
        Self {
            name: name.into(),
            config,
            tags: Vec::new(),
        }
    }

    pub fn tag(&mut self, tag: VariantTag) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn has_tag(&self, tag: VariantTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn is_default(&self) -> bool {
        self.has_tag(VariantTag::Default)
    }

    pub fn cpu_only(&self) -> bool {
        self.has_tag(VariantTag::CpuOnly)
    }
}

/// Client-side load parameters for one profiling run against a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Name of the server variant the load targets.
    pub model_name: String,
    pub batch_size: u32,
    pub concurrency: u32,
    /// Extra flags passed through to the profiling client untouched.
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

impl fmt::Display for LoadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "-m {} -b {} --concurrency-range {}",
            self.model_name, self.batch_size, self.concurrency
        )?;
        for (flag, value) in &self.flags {
            write!(f, " --{flag}={value}")?;
        }
        Ok(())
    }
}
