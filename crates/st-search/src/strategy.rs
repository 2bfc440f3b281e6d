//! Sweep strategies for the server-side model config space.

use st_types::{ConfigMap, ConfigValue, ParameterAxis, ParameterCombination, SearchConfig};

/// Key stepped by the adaptive strategies; plateau detection runs along it.
pub const MAX_BATCH_SIZE_KEY: &str = "max_batch_size";

/// `min, 2*min, 4*min, ...` up to and including `max`.
pub fn doubling_ladder(min: u32, max: u32) -> Vec<u32> {
    let mut values = Vec::new();
    let mut value = min.max(1);
    while value <= max {
        values.push(value);
        match value.checked_mul(2) {
            Some(next) => value = next,
            None => break,
        }
    }
    values
}

/// How a [`crate::ServerConfigGenerator`] walks its config space.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepStrategy {
    /// Only the unmodified base config.
    DefaultOnly,
    /// One config reported by an externally managed server; no sweep.
    Remote,
    /// Caller-supplied combinations, in order.
    Grid(GridWalk),
    /// Instance-count x max-batch-size ladder.
    Ladder(LadderWalk),
}

impl SweepStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DefaultOnly => "default",
            Self::Remote => "remote",
            Self::Grid(_) => "grid",
            Self::Ladder(_) => "ladder",
        }
    }

    /// Combination for the current step. `None` for remote mode and for
    /// walks that are exhausted.
    pub(crate) fn current(&self) -> Option<ParameterCombination> {
        match self {
            Self::DefaultOnly => Some(ParameterCombination::new()),
            Self::Remote => None,
            Self::Grid(walk) => walk.current(),
            Self::Ladder(walk) => walk.current(),
        }
    }

    pub(crate) fn done_walking(&self) -> bool {
        match self {
            Self::DefaultOnly | Self::Remote => true,
            Self::Grid(walk) => walk.done(),
            Self::Ladder(walk) => walk.done(),
        }
    }

    /// Whether measurements steer this strategy at all.
    pub(crate) fn is_adaptive(&self) -> bool {
        matches!(self, Self::Grid(_) | Self::Ladder(_))
    }

    /// Move past the current step. Returns true when the walk entered a new
    /// run along the batch-size axis, i.e. the plateau history no longer
    /// applies.
    pub(crate) fn advance(&mut self, stop_run: bool) -> bool {
        match self {
            Self::DefaultOnly | Self::Remote => false,
            Self::Grid(walk) => walk.advance(stop_run),
            Self::Ladder(walk) => walk.advance(stop_run),
        }
    }
}

/// Ordered walk over explicit combinations.
///
/// Consecutive combinations that differ only in `max_batch_size` form a run;
/// stopping a run skips its remaining batch sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct GridWalk {
    combinations: Vec<ParameterCombination>,
    index: usize,
}

impl GridWalk {
    pub fn new(combinations: Vec<ParameterCombination>) -> Self {
        Self {
            combinations,
            index: 0,
        }
    }

    /// Cartesian product of `axes`. Keys keep their declared nesting order,
    /// except `max_batch_size`, which always varies fastest.
    pub fn from_axes(axes: &[ParameterAxis]) -> Self {
        let mut ordered: Vec<&ParameterAxis> = axes
            .iter()
            .filter(|axis| !axis.values.is_empty())
            .collect();
        ordered.sort_by_key(|axis| axis.key == MAX_BATCH_SIZE_KEY);

        let mut result = vec![ParameterCombination::new()];
        for axis in ordered {
            let mut next = Vec::with_capacity(result.len() * axis.values.len());
            for existing in &result {
                for value in &axis.values {
                    next.push(existing.clone().with(axis.key.clone(), value.clone()));
                }
            }
            result = next;
        }
        result.retain(|combo| !combo.is_default());
        Self::new(result)
    }

    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    fn current(&self) -> Option<ParameterCombination> {
        self.combinations.get(self.index).cloned()
    }

    fn done(&self) -> bool {
        self.index >= self.combinations.len()
    }

    fn run_key(&self, index: usize) -> Option<ParameterCombination> {
        self.combinations
            .get(index)
            .map(|combo| combo.without(MAX_BATCH_SIZE_KEY))
    }

    fn advance(&mut self, stop_run: bool) -> bool {
        let run = self.run_key(self.index);
        self.index += 1;
        if stop_run {
            while self.index < self.combinations.len() && self.run_key(self.index) == run {
                self.index += 1;
            }
            return true;
        }
        self.run_key(self.index) != run
    }
}

/// Automatic ladder: for each instance count, double `max_batch_size`
/// until the ladder ends or throughput stops improving.
#[derive(Debug, Clone, PartialEq)]
pub struct LadderWalk {
    instance_counts: Vec<u32>,
    max_batch_sizes: Vec<u32>,
    instance_kind: &'static str,
    instance_index: usize,
    batch_index: usize,
}

impl LadderWalk {
    pub fn new(instance_counts: Vec<u32>, max_batch_sizes: Vec<u32>, cpu_only: bool) -> Self {
        Self {
            instance_counts,
            max_batch_sizes,
            instance_kind: if cpu_only { "KIND_CPU" } else { "KIND_GPU" },
            instance_index: 0,
            batch_index: 0,
        }
    }

    pub fn from_config(config: &SearchConfig, cpu_only: bool) -> Self {
        Self::new(
            (config.min_instance_count..=config.max_instance_count).collect(),
            doubling_ladder(config.min_model_batch_size, config.max_model_batch_size),
            cpu_only,
        )
    }

    fn current(&self) -> Option<ParameterCombination> {
        let count = *self.instance_counts.get(self.instance_index)?;
        let batch_size = *self.max_batch_sizes.get(self.batch_index)?;

        let mut group = ConfigMap::new();
        group.insert("count".to_string(), ConfigValue::from(count));
        group.insert("kind".to_string(), ConfigValue::from(self.instance_kind));

        Some(
            ParameterCombination::new()
                .with("dynamic_batching", ConfigValue::empty_mapping())
                .with(MAX_BATCH_SIZE_KEY, ConfigValue::from(batch_size))
                .with("instance_group", vec![ConfigValue::from(group)]),
        )
    }

    fn done(&self) -> bool {
        self.instance_index >= self.instance_counts.len() || self.max_batch_sizes.is_empty()
    }

    fn advance(&mut self, stop_run: bool) -> bool {
        if stop_run || self.batch_index + 1 >= self.max_batch_sizes.len() {
            self.batch_index = 0;
            self.instance_index += 1;
            true
        } else {
            self.batch_index += 1;
            false
        }
    }
}
