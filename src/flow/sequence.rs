use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Resume, SkipSequence, StepFlowController};
use crate::content::TriggerType;
use crate::events::FlowEvent;
use crate::helper::StepHelperTask;
use crate::host::{FlowHost, TargetState};
use crate::scheduler::WaitFor;

impl<H: FlowHost> StepFlowController<H> {
    /// Make `index` the current step.
    ///
    /// Disabled steps are skipped immediately; the loop keeps going until an
    /// enabled step is waiting for its trigger or the flow ends.
    pub(super) fn begin_step(&mut self, index: usize) {
        let mut next = Some(index);
        while let Some(index) = next.take() {
            if !self.running {
                return;
            }

            self.terminate_helper();
            self.current = Some(index);
            self.executing = true;
            self.create_helper(index, StepHelperTask::Execute);

            let enabled = self.is_enabled_at(index);
            let id = self.step_id(index);
            info!(target: "flow",
                "Step {} '{}' begins{}",
                index,
                self.content.steps[index].display_name(),
                if enabled { "" } else { " (disabled)" }
            );
            self.emit(FlowEvent::BeginStep { index, id, enabled });

            if enabled {
                // A state-change step waits for a fresh completion, even
                // when it is begun again after a restore
                if self.content.steps[index].trigger == TriggerType::StateChange {
                    if let Some(target) = self.steps[index].target {
                        self.host.set_target_state(target, TargetState::Normal);
                    }
                }
                self.emit_prompt(index);
                self.executing = false;
                return;
            }

            self.skip_immediate_at(index);
            match self.next_index(index) {
                Some(following) => next = Some(following),
                None => self.end(),
            }
        }
    }

    /// Where the flow goes after `index`: a custom-order edge, the next step,
    /// or nowhere.
    fn next_index(&self, index: usize) -> Option<usize> {
        let id = &self.content.steps[index].id;
        if let Some(to) = self.custom_order.get(id) {
            match self.step_index(to) {
                Some(target) => {
                    debug!(target: "flow", "Custom order {} -> {}", id, to);
                    return Some(target);
                }
                None => {
                    warn!(target: "flow", "Custom order {} -> {} targets an unknown step", id, to);
                }
            }
        }
        (index + 1 < self.steps.len()).then_some(index + 1)
    }

    fn change_next_step(&mut self) {
        let Some(index) = self.current else {
            return;
        };
        match self.next_index(index) {
            Some(next) => self.begin_step(next),
            None => self.end(),
        }
    }

    /// The current step's trigger was satisfied
    pub(super) fn execute_current(&mut self) {
        let Some(index) = self.current else {
            return;
        };

        self.executing = true;
        let tx = Self::transaction(&self.content, &self.steps, index);
        self.host.execute_step(&tx);
        let id = self.step_id(index);
        self.emit(FlowEvent::ExecuteStep { index, id });

        let hold = self.hold_for(index);
        self.terminate_helper();
        if self.wait_then(Self::hold_waits(hold), Resume::Advance).is_some() {
            self.change_next_step();
        }
    }

    pub(super) fn resume(&mut self, resume: Resume) {
        debug!(target: "flow", "Resuming {:?}", resume);
        match resume {
            Resume::Advance => self.change_next_step(),
            Resume::SkipLifetimeElapsed { hold } => {
                self.terminate_helper();
                if self
                    .wait_then(Self::hold_waits(hold), Resume::SkipHoldElapsed)
                    .is_some()
                {
                    self.after_skip();
                }
            }
            Resume::SkipHoldElapsed => self.after_skip(),
        }
    }

    // ===== Skip =====

    /// Shared preconditions of every skip operation
    fn skippable_index(&self, operation: &str) -> Option<usize> {
        if !self.running || self.executing || self.paused {
            debug!(target: "flow",
                "{} rejected (running: {}, executing: {}, paused: {})",
                operation, self.running, self.executing, self.paused
            );
            return None;
        }
        let index = self.current?;
        if let Some(active) = &self.helper {
            if !active.helper.is_allow_skip() {
                debug!(target: "flow", "{} vetoed by helper {} on step {}", operation, active.name, index);
                return None;
            }
        }
        Some(index)
    }

    /// Target index for a multi-step skip; must not be behind the current step
    fn forward_target(&self, operation: &str, current: usize, id: &str) -> Option<usize> {
        let Some(target) = self.step_index(id) else {
            debug!(target: "flow", "{} rejected: unknown step '{}'", operation, id);
            return None;
        };
        if target < current {
            debug!(target: "flow",
                "{} rejected: step '{}' ({}) is behind the current step ({})",
                operation, id, target, current
            );
            return None;
        }
        Some(target)
    }

    /// Skip the current step, honoring helper skip lifetime and hold time
    pub fn skip_current_step(&mut self) -> bool {
        let Some(index) = self.skippable_index("skip_current_step") else {
            return false;
        };
        if self.skip_step_at(index) {
            self.change_next_step();
        }
        true
    }

    /// Skip every step from the current one up to (not including) `id`,
    /// then begin `id`.
    pub fn skip_step(&mut self, id: &str) -> bool {
        let Some(current) = self.skippable_index("skip_step") else {
            return false;
        };
        let Some(target) = self.forward_target("skip_step", current, id) else {
            return false;
        };

        info!(target: "flow", "Skipping from step {} to step {}", current, target);
        self.skip_sequence = Some(SkipSequence { target });
        self.run_skip_sequence();
        true
    }

    /// Skip the current step synchronously with no waits
    pub fn skip_current_step_immediate(&mut self) -> bool {
        let Some(index) = self.skippable_index("skip_current_step_immediate") else {
            return false;
        };
        self.skip_immediate_at(index);
        self.change_next_step();
        true
    }

    /// Synchronous multi-step skip up to (not including) `id`, then begin `id`
    pub fn skip_step_immediate(&mut self, id: &str) -> bool {
        let Some(current) = self.skippable_index("skip_step_immediate") else {
            return false;
        };
        let Some(target) = self.forward_target("skip_step_immediate", current, id) else {
            return false;
        };

        info!(target: "flow", "Immediately skipping from step {} to step {}", current, target);
        self.skip_sequence = Some(SkipSequence { target });
        let mut index = current;
        while self
            .skip_sequence
            .is_some_and(|sequence| index < sequence.target)
        {
            self.skip_immediate_at(index);
            index += 1;
            self.current = Some(index);
        }
        self.finish_skip_sequence();
        true
    }

    /// Cooperative skip of one step. Returns true when it completed without
    /// suspending; otherwise a wait task resumes it later.
    fn skip_step_at(&mut self, index: usize) -> bool {
        self.executing = true;
        let tx = Self::transaction(&self.content, &self.steps, index);
        self.host.skip_step(&tx);
        let id = self.step_id(index);
        self.emit(FlowEvent::SkipStep { index, id });

        self.ensure_helper(index, StepHelperTask::Skip);
        let lifetime = self
            .call_helper("skip", |helper, ctx| helper.on_skip(ctx))
            .unwrap_or(Duration::ZERO);
        let hold = self.hold_for(index);

        let lifetime_waits = vec![WaitFor::Seconds(lifetime)];
        if self
            .wait_then(lifetime_waits, Resume::SkipLifetimeElapsed { hold })
            .is_none()
        {
            return false;
        }

        self.terminate_helper();
        self.wait_then(Self::hold_waits(hold), Resume::SkipHoldElapsed)
            .is_some()
    }

    /// Synchronous skip of one step
    fn skip_immediate_at(&mut self, index: usize) {
        self.executing = true;
        let tx = Self::transaction(&self.content, &self.steps, index);
        self.host.skip_step(&tx);
        let id = self.step_id(index);
        self.emit(FlowEvent::SkipStepImmediate { index, id });

        self.ensure_helper(index, StepHelperTask::SkipImmediate);
        self.call_helper("skip_immediate", |helper, ctx| helper.on_skip_immediate(ctx));
        self.terminate_helper();
    }

    /// A cooperative skip finished its waits
    fn after_skip(&mut self) {
        let Some(index) = self.current else {
            return;
        };
        if self.skip_sequence.is_some() {
            self.current = Some(index + 1);
            self.run_skip_sequence();
        } else {
            self.change_next_step();
        }
    }

    /// Walk the multi-step skip until it reaches its target or suspends
    fn run_skip_sequence(&mut self) {
        loop {
            let (Some(sequence), Some(index)) = (self.skip_sequence, self.current) else {
                return;
            };
            if index >= sequence.target {
                self.finish_skip_sequence();
                return;
            }
            if !self.skip_step_at(index) {
                return;
            }
            self.current = Some(index + 1);
        }
    }

    fn finish_skip_sequence(&mut self) {
        if self.skip_sequence.take().is_none() {
            return;
        }
        let Some(index) = self.current else {
            return;
        };
        let id = self.step_id(index);
        self.emit(FlowEvent::SkipSequenceDone { index, id });
        self.begin_step(index);
    }

    // ===== Restore =====

    /// Walk backward from the current step to `id`, restoring each step,
    /// then begin `id` again.
    pub fn restore_step(&mut self, id: &str) -> bool {
        if !self.running || self.executing || self.paused {
            debug!(target: "flow", "restore_step rejected in state {:?}", self.state());
            return false;
        }
        let Some(current) = self.current else {
            return false;
        };
        let Some(target) = self.step_index(id) else {
            debug!(target: "flow", "restore_step rejected: unknown step '{}'", id);
            return false;
        };
        if target >= current {
            debug!(target: "flow",
                "restore_step rejected: step '{}' ({}) is not behind the current step ({})",
                id, target, current
            );
            return false;
        }

        info!(target: "flow", "Restoring from step {} back to step {}", current, target);
        self.executing = true;
        for index in (target..=current).rev() {
            self.current = Some(index);
            self.ensure_helper(index, StepHelperTask::Restore);
            let id = self.step_id(index);
            self.emit(FlowEvent::RestoreStep { index, id });
            self.call_helper("restore", |helper, ctx| helper.on_restore(ctx));
            self.terminate_helper();
        }
        self.begin_step(target);
        true
    }
}
