//! The pull/feedback contract shared by every config generator.

use st_types::{Measurement, StResult};
use tracing::warn;

/// Lifecycle of a generator. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SweepPhase {
    NotStarted,
    Running,
    Done,
}

/// A lazily evaluated, feedback-driven sequence of configurations.
///
/// The driver alternates strictly: pull one item with [`next_config`], run
/// it, then report its measurements with [`set_last_results`] before the
/// next pull. Breaking the alternation never panics. It is logged, and a
/// pull without feedback treats the missing step as erroneous.
///
/// [`next_config`]: ConfigGenerator::next_config
/// [`set_last_results`]: ConfigGenerator::set_last_results
pub trait ConfigGenerator {
    type Item;

    /// Produce the next configuration, or `None` once the sweep is over.
    fn next_config(&mut self) -> StResult<Option<Self::Item>>;

    /// Report the measurements gathered for the last produced item.
    fn set_last_results(&mut self, measurements: Vec<Option<Measurement>>);

    fn is_started(&self) -> bool;

    fn is_done(&self) -> bool;

    fn phase(&self) -> SweepPhase {
        if !self.is_started() {
            SweepPhase::NotStarted
        } else if self.is_done() {
            SweepPhase::Done
        } else {
            SweepPhase::Running
        }
    }
}

/// Bookkeeping for the one-feedback-per-pull protocol.
#[derive(Debug, Clone, Default)]
pub(crate) struct FeedbackTurn {
    started: bool,
    outstanding: bool,
    fed: bool,
    violations: usize,
}

impl FeedbackTurn {
    pub(crate) fn start(&mut self) {
        self.started = true;
    }

    pub(crate) fn started(&self) -> bool {
        self.started
    }

    /// Called at the top of a pull. Returns true when an item is still
    /// outstanding and the generator has to step past it.
    pub(crate) fn begin_pull(&mut self, owner: &str) -> bool {
        if !self.outstanding {
            return false;
        }
        if !self.fed {
            self.violations += 1;
            warn!("{owner}: next config pulled before results for the previous one were reported");
        }
        self.outstanding = false;
        true
    }

    pub(crate) fn yielded(&mut self) {
        self.started = true;
        self.outstanding = true;
        self.fed = false;
    }

    pub(crate) fn accept_feedback(&mut self, owner: &str) {
        if !self.outstanding {
            self.violations += 1;
            warn!("{owner}: results reported with no config outstanding");
        } else if self.fed {
            self.violations += 1;
            warn!("{owner}: results reported twice for the same config");
        }
        self.fed = true;
    }

    pub(crate) fn violations(&self) -> usize {
        self.violations
    }
}
