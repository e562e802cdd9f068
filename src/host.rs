//! Collaborator interfaces the controller consumes.
//!
//! The host owns the live scene, input and presentation. The controller only
//! talks to it through these traits.

use crate::content::StepContent;
use crate::target::{Scene, TargetHandle};

/// Result of the pointer ray this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayHit {
    pub target: TargetHandle,
    /// Whether the hit object carries a step target marker
    pub is_step_target: bool,
}

/// External state of a target, flipped by the host or `complete_current_step`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetState {
    #[default]
    Normal,
    Done,
}

pub trait InputSource {
    fn is_primary_pointer_down_this_tick(&self) -> bool;

    fn current_ray_hit(&self) -> Option<RayHit>;

    /// Read and clear the UI control-click latch
    fn take_control_click(&mut self) -> bool;
}

pub trait TargetStates {
    fn target_state(&self, target: TargetHandle) -> TargetState;

    fn set_target_state(&mut self, target: TargetHandle, state: TargetState);
}

/// Everything a step effect needs to know about the step being committed
#[derive(Debug, Clone, Copy)]
pub struct StepTransaction<'a> {
    pub index: usize,
    pub content: &'a StepContent,
    pub target: Option<TargetHandle>,
    pub operations: &'a [Option<TargetHandle>],
}

/// Scene-side effects of committing a step. All methods default to no-ops.
pub trait StepEffects {
    fn execute_step(&mut self, _step: &StepTransaction<'_>) {}

    fn skip_step(&mut self, _step: &StepTransaction<'_>) {}

    /// Visual emphasis of a target
    fn highlight(&mut self, _target: TargetHandle) {}
}

/// Everything the controller needs from its host
pub trait FlowHost: Scene + InputSource + TargetStates + StepEffects {}

impl<T> FlowHost for T where T: Scene + InputSource + TargetStates + StepEffects {}
