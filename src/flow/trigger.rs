use tracing::debug;

use super::StepFlowController;
use crate::content::TriggerType;
use crate::events::FlowEvent;
use crate::host::{FlowHost, TargetState};
use crate::target::TargetHandle;

impl<H: FlowHost> StepFlowController<H> {
    /// Evaluate the current step's trigger for this tick
    pub(super) fn evaluate_trigger(&mut self, control_clicked: bool) -> bool {
        let Some(index) = self.current else {
            return false;
        };
        let target = self.steps[index].target;

        match self.content.steps[index].trigger {
            TriggerType::Auto => true,
            TriggerType::PointerClick => {
                if !self.host.is_primary_pointer_down_this_tick() {
                    return false;
                }
                match self.host.current_ray_hit() {
                    Some(hit) if target == Some(hit.target) => true,
                    Some(hit) if hit.is_step_target && !self.is_auxiliary(hit.target) => {
                        self.click_wrong_target(index, Some(hit.target));
                        false
                    }
                    _ => false,
                }
            }
            TriggerType::ControlClick => {
                if control_clicked {
                    return true;
                }
                self.detect_off_target_click(index, target);
                false
            }
            TriggerType::StateChange => {
                let done = target
                    .is_some_and(|target| self.host.target_state(target) == TargetState::Done);
                if done {
                    return true;
                }
                self.detect_off_target_click(index, target);
                false
            }
        }
    }

    /// Any pointer-down that misses the primary and auxiliary targets,
    /// including clicks on nothing at all.
    fn detect_off_target_click(&mut self, index: usize, target: Option<TargetHandle>) {
        if !self.host.is_primary_pointer_down_this_tick() {
            return;
        }
        let hit = self.host.current_ray_hit().map(|hit| hit.target);
        let on_target = hit.is_some() && hit == target;
        let on_auxiliary = hit.is_some_and(|hit| self.is_auxiliary(hit));
        if !on_target && !on_auxiliary {
            self.click_wrong_target(index, hit);
        }
    }

    fn is_auxiliary(&self, target: TargetHandle) -> bool {
        self.helper
            .as_ref()
            .is_some_and(|active| active.helper.auxiliary_targets().contains(&target))
    }

    fn click_wrong_target(&mut self, index: usize, hit: Option<TargetHandle>) {
        debug!(target: "flow", "Step {} clicked wrong target {:?}", index, hit);
        let id = self.step_id(index);
        self.emit(FlowEvent::ClickWrongTarget { index, id, hit });
    }
}
