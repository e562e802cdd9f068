//! Step flow controller.
//!
//! Compiles a step list against the live scene, then drives the
//! begin → wait-for-trigger → execute → advance state machine from a fixed
//! per-tick callback. Waits after execution or skipping are cooperative
//! tasks owned by a single-slot [`Scheduler`].

mod compile;
mod sequence;
mod trigger;

pub use compile::{CompileReport, ReferenceKind, UnresolvedReference};

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::content::{StepContent, StepContentSet, TriggerType};
use crate::error::{FlowError, HelperError};
use crate::events::{FlowEnvelope, FlowEvent, FlowEventBus};
use crate::helper::registry::panic_message;
use crate::helper::{BoundParameter, HelperContext, HelperRegistry, StepHelper, StepHelperTask};
use crate::host::{FlowHost, StepTransaction, TargetState};
use crate::scheduler::{Scheduler, Spawned, WaitFor};
use crate::target::{TargetHandle, TargetRegistry};

/// Default capacity of the flow event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Coarse controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Not compiled or not started
    Idle,
    /// A step is active and its trigger is evaluated every tick
    Running,
    /// Running but suspended; trigger evaluation is frozen
    Paused,
    /// Inside an execute/skip/restore transaction
    Executing,
}

/// Runtime overlay for one step, index-aligned with the content
#[derive(Debug, Clone)]
struct CompiledStep {
    target: Option<TargetHandle>,
    operations: Vec<Option<TargetHandle>>,
    parameters: Vec<BoundParameter>,
    /// Authored hold, validated at compile time
    hold: Duration,
    runtime_enabled: bool,
}

struct ActiveHelper {
    index: usize,
    task: StepHelperTask,
    name: String,
    helper: Box<dyn StepHelper>,
}

/// State visible to wait predicates
struct FlowGate {
    paused: bool,
}

fn not_paused(gate: &FlowGate) -> bool {
    !gate.paused
}

/// What to do when the outstanding wait task completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    /// Hold after execution elapsed
    Advance,
    /// Helper's skip lifetime elapsed; terminate it and start the hold
    SkipLifetimeElapsed { hold: Duration },
    /// Hold after a skip elapsed
    SkipHoldElapsed,
}

#[derive(Debug, Clone, Copy)]
struct SkipSequence {
    target: usize,
}

/// Drives an ordered list of steps against a live host
pub struct StepFlowController<H: FlowHost> {
    host: H,
    content: Arc<StepContentSet>,
    helpers: HelperRegistry,
    targets: TargetRegistry,
    steps: Vec<CompiledStep>,
    index_by_id: HashMap<String, usize>,
    custom_order: HashMap<String, String>,
    compiled: bool,
    running: bool,
    paused: bool,
    executing: bool,
    current: Option<usize>,
    helper: Option<ActiveHelper>,
    scheduler: Scheduler<Resume, FlowGate>,
    skip_sequence: Option<SkipSequence>,
    events: FlowEventBus,
}

impl<H: FlowHost> StepFlowController<H> {
    pub fn new(host: H, content: impl Into<Arc<StepContentSet>>, helpers: HelperRegistry) -> Self {
        Self {
            host,
            content: content.into(),
            helpers,
            targets: TargetRegistry::new(),
            steps: Vec::new(),
            index_by_id: HashMap::new(),
            custom_order: HashMap::new(),
            compiled: false,
            running: false,
            paused: false,
            executing: false,
            current: None,
            helper: None,
            scheduler: Scheduler::new(),
            skip_sequence: None,
            events: FlowEventBus::new(DEFAULT_EVENT_CAPACITY),
        }
    }

    /// Replace the event bus with one of the given capacity.
    ///
    /// Existing subscribers stop receiving events.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.events = FlowEventBus::new(capacity);
        self
    }

    // ===== Lifecycle =====

    /// Start the flow, optionally beginning step 0 right away
    pub fn begin(&mut self, auto_start_first: bool) -> Result<(), FlowError> {
        if !self.compiled {
            return Err(FlowError::NotCompiled);
        }
        if self.steps.is_empty() {
            return Err(FlowError::EmptyFlow);
        }
        if self.running {
            return Err(FlowError::AlreadyRunning);
        }

        info!(target: "flow", "Beginning flow with {} step(s)", self.steps.len());
        self.running = true;
        self.paused = false;
        self.executing = false;
        self.emit(FlowEvent::BeginFlow);

        if auto_start_first {
            self.begin_step(0);
        }
        Ok(())
    }

    /// Begin a step by id; used after `begin(false)` or to jump freely
    pub fn begin_step_by_id(&mut self, id: &str) -> Result<(), FlowError> {
        if !self.compiled {
            return Err(FlowError::NotCompiled);
        }
        let index = self
            .step_index(id)
            .ok_or_else(|| FlowError::UnknownStep(id.to_string()))?;
        if !self.running {
            return Err(FlowError::NotRunning);
        }

        self.scheduler.cancel_active();
        self.skip_sequence = None;
        self.begin_step(index);
        Ok(())
    }

    /// Stop the flow and return to idle
    pub fn end(&mut self) {
        if !self.running {
            debug!(target: "flow", "end() called while not running");
            return;
        }

        self.terminate_helper();
        if let Some(task) = self.scheduler.cancel_active() {
            debug!(target: "flow", "Cancelled pending wait task {:?}", task);
        }
        self.skip_sequence = None;
        self.current = None;
        self.running = false;
        self.paused = false;
        self.executing = false;

        info!(target: "flow", "Flow ended");
        self.emit(FlowEvent::EndFlow);
    }

    /// Drive the controller by one tick
    pub fn tick(&mut self, delta: Duration) {
        // The control latch is consumed every tick so stale clicks never leak
        // into a later step.
        let control_clicked = self.host.take_control_click();
        if !self.running {
            return;
        }

        let gate = self.gate();
        if let Some(resume) = self.scheduler.poll(delta, &gate) {
            self.resume(resume);
        }
        if !self.running {
            return;
        }

        if !self.paused {
            let wants_update = self
                .helper
                .as_ref()
                .is_some_and(|active| active.helper.is_enable_update());
            if wants_update {
                self.call_helper("update", |helper, ctx| helper.on_update(ctx, delta));
            }
        }

        // Steps that begin synchronously during this tick are evaluated too,
        // each at most once. Input only belongs to the first of them, so the
        // chain continues through `Auto` steps only.
        let mut evaluated = Vec::new();
        while let Some(index) = self.current {
            if self.paused || self.executing || evaluated.contains(&index) {
                break;
            }
            if !evaluated.is_empty() && self.content.steps[index].trigger != TriggerType::Auto {
                break;
            }
            let first = evaluated.is_empty();
            evaluated.push(index);
            if !self.evaluate_trigger(first && control_clicked) {
                break;
            }
            self.execute_current();
        }
    }

    // ===== Pause =====

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pausing freezes trigger evaluation and stops any multi-step skip at
    /// its next iteration boundary. A wait already in flight finishes its
    /// timer but only resumes once unpaused.
    pub fn set_paused(&mut self, paused: bool) {
        if paused == self.paused {
            return;
        }
        if paused {
            self.stop_skip();
        }
        self.paused = paused;
        debug!(target: "flow", "Pause set to {}", paused);
    }

    /// Pin any in-flight multi-step skip to the current index
    pub fn stop_skip(&mut self) {
        if let (Some(sequence), Some(current)) = (self.skip_sequence.as_mut(), self.current) {
            debug!(target: "flow",
                "Stopping skip sequence at step {} (was heading to {})",
                current, sequence.target
            );
            sequence.target = current;
        }
    }

    // ===== Step operations =====

    /// Emphasize the current step and re-show its prompt
    pub fn guide(&mut self) -> bool {
        let Some(index) = self.current else {
            return false;
        };

        if self.helper.is_some() {
            self.call_helper("guide", |helper, ctx| helper.on_guide(ctx));
        } else if let Some(target) = self.steps[index].target {
            self.host.highlight(target);
        }
        self.emit_prompt(index);
        true
    }

    /// Force the current state-change step's target to `Done`; the next tick
    /// observes it.
    pub fn complete_current_step(&mut self) -> bool {
        let Some(index) = self.current.filter(|_| self.running) else {
            return false;
        };
        if self.content.steps[index].trigger != TriggerType::StateChange {
            debug!(target: "flow", "complete_current_step() ignored: step {} is not a state-change step", index);
            return false;
        }
        let Some(target) = self.steps[index].target else {
            return false;
        };

        self.host.set_target_state(target, TargetState::Done);
        true
    }

    // ===== Custom order =====

    /// Redirect the flow from one step directly to another
    pub fn add_custom_order(&mut self, from: &str, to: &str) -> bool {
        if self.compiled && (self.step_index(from).is_none() || self.step_index(to).is_none()) {
            debug!(target: "flow", "Rejected custom order {} -> {}: unknown step id", from, to);
            return false;
        }
        self.custom_order.insert(from.to_string(), to.to_string());
        true
    }

    pub fn remove_custom_order(&mut self, from: &str) -> bool {
        self.custom_order.remove(from).is_some()
    }

    pub fn clear_custom_order(&mut self) {
        self.custom_order.clear();
    }

    pub fn custom_order(&self, from: &str) -> Option<&str> {
        self.custom_order.get(from).map(String::as_str)
    }

    // ===== Queries =====

    pub fn state(&self) -> FlowState {
        if !self.running {
            FlowState::Idle
        } else if self.executing {
            FlowState::Executing
        } else if self.paused {
            FlowState::Paused
        } else {
            FlowState::Running
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn current_step_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_step_content(&self) -> Option<&StepContent> {
        self.current.map(|index| &self.content.steps[index])
    }

    pub fn current_target(&self) -> Option<TargetHandle> {
        self.current.and_then(|index| self.steps[index].target)
    }

    pub fn current_step_helper(&self) -> Option<&dyn StepHelper> {
        self.helper.as_ref().map(|active| active.helper.as_ref())
    }

    pub fn current_step_helper_mut(&mut self) -> Option<&mut dyn StepHelper> {
        self.helper.as_mut().map(|active| active.helper.as_mut())
    }

    pub fn current_helper_task(&self) -> Option<StepHelperTask> {
        self.helper.as_ref().map(|active| active.task)
    }

    pub fn step_count(&self) -> usize {
        self.content.steps.len()
    }

    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.index_by_id.get(id).copied()
    }

    /// Whether a step runs: both author and runtime flags must be set
    pub fn step_is_enable(&self, id: &str) -> Option<bool> {
        self.step_index(id).map(|index| self.is_enabled_at(index))
    }

    /// Edit the runtime enable overlay between compiles
    pub fn set_step_runtime_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.step_index(id) {
            Some(index) => {
                self.steps[index].runtime_enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn target_registry(&self) -> &TargetRegistry {
        &self.targets
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    pub fn content(&self) -> &StepContentSet {
        &self.content
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEnvelope> {
        self.events.subscribe()
    }

    // ===== Internals =====

    fn gate(&self) -> FlowGate {
        FlowGate {
            paused: self.paused,
        }
    }

    fn is_enabled_at(&self, index: usize) -> bool {
        self.content.steps[index].enabled && self.steps[index].runtime_enabled
    }

    fn step_id(&self, index: usize) -> String {
        self.content.steps[index].id.clone()
    }

    fn emit(&mut self, event: FlowEvent) {
        self.events.publish(event);
    }

    fn emit_prompt(&mut self, index: usize) {
        if let Some(prompt) = self.content.steps[index].prompt.clone() {
            let id = self.step_id(index);
            self.emit(FlowEvent::ShowPrompt { index, id, prompt });
        }
    }

    /// Borrows only the content and overlay so the host stays free for the effect call
    fn transaction<'a>(
        content: &'a StepContentSet,
        steps: &'a [CompiledStep],
        index: usize,
    ) -> StepTransaction<'a> {
        StepTransaction {
            index,
            content: &content.steps[index],
            target: steps[index].target,
            operations: &steps[index].operations,
        }
    }

    /// Time to hold after committing a step. `instant` wins over a helper
    /// override, which wins over the authored elapse time.
    fn hold_for(&self, index: usize) -> Duration {
        if self.content.steps[index].instant {
            return Duration::ZERO;
        }
        self.helper
            .as_ref()
            .filter(|active| active.index == index)
            .and_then(|active| active.helper.elapse_time())
            .unwrap_or(self.steps[index].hold)
    }

    /// Start a wait sequence; resumes right away when nothing needs waiting
    fn wait_then(&mut self, waits: Vec<WaitFor<FlowGate>>, resume: Resume) -> Option<Resume> {
        let gate = self.gate();
        match self.scheduler.spawn(waits, resume, &gate) {
            Spawned::Ready(resume) => Some(resume),
            Spawned::Pending(task) => {
                debug!(target: "flow", "Suspended on wait task {:?} ({:?})", task, resume);
                None
            }
        }
    }

    /// Hold wait used after execute and skip: timer, then the pause gate
    fn hold_waits(hold: Duration) -> Vec<WaitFor<FlowGate>> {
        vec![WaitFor::Seconds(hold), WaitFor::Until(not_paused)]
    }

    /// Make sure the helper for `index` exists and serves `task`
    fn ensure_helper(&mut self, index: usize, task: StepHelperTask) {
        match self.helper.as_mut() {
            Some(active) if active.index == index => {
                debug!(target: "helper", "Step {} helper switches {} -> {}", index, active.task, task);
                active.task = task;
            }
            _ => {
                self.terminate_helper();
                self.create_helper(index, task);
            }
        }
    }

    fn create_helper(&mut self, index: usize, task: StepHelperTask) {
        let Some(name) = self.content.steps[index].helper_name().map(str::to_string) else {
            return;
        };

        let helper = match self.helpers.create(&name) {
            Ok(helper) => helper,
            Err(e) => {
                error!(target: "helper",
                    "Step {} '{}': could not create helper: {}",
                    index,
                    self.content.steps[index].display_name(),
                    e
                );
                return;
            }
        };

        debug!(target: "helper", "Step {} created helper {} for {}", index, name, task);
        self.helper = Some(ActiveHelper {
            index,
            task,
            name: name.clone(),
            helper,
        });

        match self.call_helper("init", |helper, ctx| helper.init(ctx)) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                let e = HelperError::Init {
                    name,
                    message: format!("{:#}", e),
                };
                error!(target: "helper",
                    "Step {} '{}': {}",
                    index,
                    self.content.steps[index].display_name(),
                    e
                );
                self.helper = None;
            }
            None => {
                self.helper = None;
            }
        }
    }

    fn terminate_helper(&mut self) {
        if self.helper.is_none() {
            return;
        }
        self.call_helper("termination", |helper, ctx| helper.on_termination(ctx));
        if let Some(active) = self.helper.take() {
            debug!(target: "helper", "Step {} helper {} terminated", active.index, active.name);
        }
    }

    /// Run a helper lifecycle call with panic isolation.
    ///
    /// Returns `None` when there is no helper or the call panicked.
    fn call_helper<R>(
        &mut self,
        phase: &str,
        f: impl FnOnce(&mut dyn StepHelper, &mut HelperContext<'_>) -> R,
    ) -> Option<R> {
        let active = self.helper.as_mut()?;
        let index = active.index;
        let content = &self.content.steps[index];
        let compiled = &self.steps[index];
        let mut ctx = HelperContext::new(
            index,
            active.task,
            content,
            compiled.target,
            &compiled.parameters,
            &mut self.host,
        );
        let helper = active.helper.as_mut();

        match panic::catch_unwind(AssertUnwindSafe(|| f(helper, &mut ctx))) {
            Ok(value) => Some(value),
            Err(payload) => {
                error!(target: "helper",
                    "Step {} '{}': helper {} panicked during {}: {}",
                    index,
                    content.display_name(),
                    active.name,
                    phase,
                    panic_message(&*payload)
                );
                None
            }
        }
    }
}
