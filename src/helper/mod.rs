//! Pluggable per-step behavior
//!
//! Helpers are resolved by name through a [`HelperRegistry`] of factory
//! functions, live for exactly one phase of a step (execute, skip,
//! skip-immediate or restore) and are terminated before the next phase
//! begins.

pub mod builtin;
pub mod registry;

use std::any::Any;
use std::time::Duration;
use strum_macros::Display;
use tracing::error;

use crate::content::StepContent;
use crate::host::StepEffects;
use crate::target::TargetHandle;

pub use builtin::{HighlightHelper, TimedHelper};
pub use registry::{HelperFactory, HelperRegistry};

/// Lifecycle phase a helper instance is currently serving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StepHelperTask {
    Execute,
    Skip,
    SkipImmediate,
    Restore,
}

/// Parameter value after target references were resolved at compile time
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Target(Option<TargetHandle>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub name: String,
    pub value: BoundValue,
}

/// Context handed to every helper lifecycle call
pub struct HelperContext<'a> {
    pub step_index: usize,
    pub task: StepHelperTask,
    pub content: &'a StepContent,
    /// Resolved primary target of the step
    pub target: Option<TargetHandle>,
    pub parameters: &'a [BoundParameter],
    effects: &'a mut dyn StepEffects,
}

impl<'a> HelperContext<'a> {
    pub fn new(
        step_index: usize,
        task: StepHelperTask,
        content: &'a StepContent,
        target: Option<TargetHandle>,
        parameters: &'a [BoundParameter],
        effects: &'a mut dyn StepEffects,
    ) -> Self {
        Self {
            step_index,
            task,
            content,
            target,
            parameters,
            effects,
        }
    }

    /// Ask the host to emphasize a target
    pub fn highlight(&mut self, target: TargetHandle) {
        self.effects.highlight(target);
    }

    pub fn parameter(&self, name: &str) -> Option<&BoundValue> {
        self.parameters
            .iter()
            .find(|param| param.name == name)
            .map(|param| &param.value)
    }

    /// Numeric parameter in seconds; ints are accepted. Values too large
    /// for a `Duration` are logged and treated as absent.
    pub fn seconds(&self, name: &str) -> Option<Duration> {
        let seconds = match self.parameter(name)? {
            BoundValue::Float(value) => *value,
            BoundValue::Int(value) => *value as f64,
            _ => return None,
        };
        match Duration::try_from_secs_f64(seconds.max(0.0)) {
            Ok(duration) => Some(duration),
            Err(_) => {
                error!(target: "helper",
                    "Step {} '{}': parameter '{}' = {} is out of range; ignoring it",
                    self.step_index,
                    self.content.display_name(),
                    name,
                    seconds
                );
                None
            }
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.parameter(name)? {
            BoundValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// All resolved target-typed parameters
    pub fn target_parameters(&self) -> impl Iterator<Item = TargetHandle> + '_ {
        self.parameters.iter().filter_map(|param| match param.value {
            BoundValue::Target(handle) => handle,
            _ => None,
        })
    }
}

/// Trait every step helper implements
///
/// Only `name` and `as_any_mut` are required; the lifecycle hooks default to
/// doing nothing.
pub trait StepHelper: Send + 'static {
    /// Name the helper is registered under (e.g. "stepflow.helpers.Timed")
    fn name(&self) -> &'static str;

    /// Called once after construction, with parameters already bound
    fn init(&mut self, _ctx: &mut HelperContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Per-tick update while the flow is not paused, if `is_enable_update`
    fn on_update(&mut self, _ctx: &mut HelperContext<'_>, _delta: Duration) {}

    /// Visual emphasis of the step; highlights the primary target by default
    fn on_guide(&mut self, ctx: &mut HelperContext<'_>) {
        if let Some(target) = ctx.target {
            ctx.highlight(target);
        }
    }

    /// Cooperative skip. The returned delay is waited before the helper is
    /// terminated.
    fn on_skip(&mut self, _ctx: &mut HelperContext<'_>) -> Duration {
        Duration::ZERO
    }

    /// Synchronous skip, no delay allowed
    fn on_skip_immediate(&mut self, _ctx: &mut HelperContext<'_>) {}

    /// Undo side effects when the flow walks backward over the step
    fn on_restore(&mut self, _ctx: &mut HelperContext<'_>) {}

    /// Release resources; the instance is dropped afterwards
    fn on_termination(&mut self, _ctx: &mut HelperContext<'_>) {}

    /// Overrides the step's own hold time when set
    fn elapse_time(&self) -> Option<Duration> {
        None
    }

    /// Returning false vetoes skip operations on the step
    fn is_allow_skip(&self) -> bool {
        true
    }

    fn is_enable_update(&self) -> bool {
        false
    }

    /// Targets that also count as valid clicks for the step
    fn auxiliary_targets(&self) -> &[TargetHandle] {
        &[]
    }

    /// Allow downcasting to the concrete helper type for state access
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
