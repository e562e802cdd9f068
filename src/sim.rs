//! In-memory host for driving a flow without a game engine.
//!
//! [`SimStage`] implements every collaborator trait the controller needs and
//! records the effects it receives; [`ScriptedAgent`] plays the user.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use strum_macros::Display;
use tracing::debug;

use crate::content::{StepContent, StepContentSet, TriggerType};
use crate::flow::StepFlowController;
use crate::host::{InputSource, RayHit, StepEffects, StepTransaction, TargetState, TargetStates};
use crate::target::{EntityId, Scene, TargetHandle, TargetMarker};

#[derive(Debug, Clone)]
struct SimEntity {
    name: String,
    active: bool,
    children: Vec<EntityId>,
    markers: Vec<(String, TargetHandle)>,
}

/// Effects the controller asked the stage to perform, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectLog {
    /// Step indices committed through `execute_step`
    pub executed: Vec<usize>,
    /// Step indices committed through `skip_step`
    pub skipped: Vec<usize>,
    pub highlighted: Vec<TargetHandle>,
    /// Resolved operation targets touched while executing
    pub operated: Vec<TargetHandle>,
}

/// Scene tree, target states and input for one simulated session
#[derive(Debug, Clone, Default)]
pub struct SimStage {
    entities: Vec<SimEntity>,
    roots: Vec<EntityId>,
    next_handle: u32,
    states: HashMap<TargetHandle, TargetState>,
    pointer_down: bool,
    ray_hit: Option<RayHit>,
    control_clicked: bool,
    log: EffectLog,
}

impl SimStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, name: impl Into<String>) -> EntityId {
        let id = self.push_entity(name.into());
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: EntityId, name: impl Into<String>) -> EntityId {
        let id = self.push_entity(name.into());
        if let Some(parent) = self.entities.get_mut(parent.0 as usize) {
            parent.children.push(id);
        }
        id
    }

    fn push_entity(&mut self, name: String) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(SimEntity {
            name,
            active: true,
            children: Vec::new(),
            markers: Vec::new(),
        });
        id
    }

    /// Inactive entities keep their markers; the scan still finds them
    pub fn set_active(&mut self, entity: EntityId, active: bool) {
        if let Some(entity) = self.entities.get_mut(entity.0 as usize) {
            entity.active = active;
        }
    }

    pub fn is_active(&self, entity: EntityId) -> bool {
        self.entities
            .get(entity.0 as usize)
            .is_some_and(|entity| entity.active)
    }

    /// Attach a target marker to `entity` and return its handle
    pub fn add_marker(&mut self, entity: EntityId, id: impl Into<String>) -> TargetHandle {
        let handle = TargetHandle(self.next_handle);
        self.next_handle += 1;
        if let Some(entity) = self.entities.get_mut(entity.0 as usize) {
            entity.markers.push((id.into(), handle));
        }
        handle
    }

    /// First marker handle carrying `id`, in scan order
    pub fn marker(&self, id: &str) -> Option<TargetHandle> {
        self.roots
            .iter()
            .flat_map(|root| self.find_target_markers(*root))
            .find(|marker| marker.id == id)
            .map(|marker| marker.handle)
    }

    fn is_marker_handle(&self, handle: TargetHandle) -> bool {
        self.entities
            .iter()
            .any(|entity| entity.markers.iter().any(|(_, h)| *h == handle))
    }

    // ===== Input =====

    /// Primary pointer goes down this tick with the given ray result
    pub fn press_pointer(&mut self, hit: Option<RayHit>) {
        self.pointer_down = true;
        self.ray_hit = hit;
    }

    /// Pointer goes down over a marked target
    pub fn click_target(&mut self, target: TargetHandle) {
        let is_step_target = self.is_marker_handle(target);
        self.press_pointer(Some(RayHit {
            target,
            is_step_target,
        }));
    }

    /// Pointer goes down over nothing
    pub fn click_empty(&mut self) {
        self.press_pointer(None);
    }

    pub fn click_control(&mut self) {
        self.control_clicked = true;
    }

    /// Clear per-tick pointer input; call after every controller tick
    pub fn end_tick(&mut self) {
        self.pointer_down = false;
        self.ray_hit = None;
    }

    pub fn effects(&self) -> &EffectLog {
        &self.log
    }

    pub fn clear_effects(&mut self) {
        self.log = EffectLog::default();
    }
}

impl Scene for SimStage {
    fn root_entities(&self) -> Vec<EntityId> {
        self.roots.clone()
    }

    fn find_target_markers(&self, entity: EntityId) -> Vec<TargetMarker> {
        let mut markers = Vec::new();
        let mut stack = vec![entity];
        while let Some(current) = stack.pop() {
            let Some(node) = self.entities.get(current.0 as usize) else {
                continue;
            };
            markers.extend(node.markers.iter().map(|(id, handle)| TargetMarker {
                id: id.clone(),
                handle: *handle,
                owner: node.name.clone(),
            }));
            // Reverse so children are visited in insertion order
            stack.extend(node.children.iter().rev().copied());
        }
        markers
    }
}

impl InputSource for SimStage {
    fn is_primary_pointer_down_this_tick(&self) -> bool {
        self.pointer_down
    }

    fn current_ray_hit(&self) -> Option<RayHit> {
        self.ray_hit
    }

    fn take_control_click(&mut self) -> bool {
        std::mem::take(&mut self.control_clicked)
    }
}

impl TargetStates for SimStage {
    fn target_state(&self, target: TargetHandle) -> TargetState {
        self.states.get(&target).copied().unwrap_or_default()
    }

    fn set_target_state(&mut self, target: TargetHandle, state: TargetState) {
        self.states.insert(target, state);
    }
}

impl StepEffects for SimStage {
    fn execute_step(&mut self, step: &StepTransaction<'_>) {
        self.log.executed.push(step.index);
        self.log.operated.extend(step.operations.iter().flatten());
    }

    fn skip_step(&mut self, step: &StepTransaction<'_>) {
        self.log.skipped.push(step.index);
    }

    fn highlight(&mut self, target: TargetHandle) {
        self.log.highlighted.push(target);
    }
}

// ===== Demo files =====

fn default_true() -> bool {
    true
}

/// Entity in a demo scene description
#[derive(Debug, Clone, Deserialize)]
pub struct SceneNode {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Target marker ids carried by this entity
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub children: Vec<SceneNode>,
}

/// Scene plus steps, loaded by the `stepflow` binary
#[derive(Debug, Clone, Deserialize)]
pub struct DemoFile {
    #[serde(default)]
    pub scene: Vec<SceneNode>,
    #[serde(default)]
    pub steps: Vec<StepContent>,
}

impl DemoFile {
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        toml::from_str(source).context("failed to parse demo file")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&source)
    }

    /// Build the stage and the content set
    pub fn into_parts(self) -> (SimStage, StepContentSet) {
        let mut stage = SimStage::new();
        for node in &self.scene {
            let root = stage.add_root(node.name.clone());
            populate(&mut stage, root, node);
        }
        (stage, StepContentSet::new(self.steps))
    }
}

fn populate(stage: &mut SimStage, entity: EntityId, node: &SceneNode) {
    stage.set_active(entity, node.active);
    for target in &node.targets {
        stage.add_marker(entity, target.clone());
    }
    for child in &node.children {
        let id = stage.add_child(entity, child.name.clone());
        populate(stage, id, child);
    }
}

// ===== Scripted agent =====

/// What the agent did on a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AgentAction {
    ClickedTarget,
    ClickedControl,
    CompletedTarget,
    /// The step cannot be satisfied (e.g. its target did not resolve)
    SkippedStep,
}

/// Satisfies whatever the current step asks for, after a short think delay
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    think_ticks: u32,
    waited: u32,
    step: Option<usize>,
}

impl ScriptedAgent {
    pub fn new(think_ticks: u32) -> Self {
        Self {
            think_ticks,
            ..Self::default()
        }
    }

    /// Act on the current step; call before the controller's tick
    pub fn act(&mut self, controller: &mut StepFlowController<SimStage>) -> Option<AgentAction> {
        if !controller.is_running() || controller.is_executing() || controller.is_paused() {
            return None;
        }
        let index = controller.current_step_index()?;
        if self.step != Some(index) {
            self.step = Some(index);
            self.waited = 0;
        }
        if self.waited < self.think_ticks {
            self.waited += 1;
            return None;
        }

        let trigger = controller.current_step_content()?.trigger;
        let target = controller.current_target();
        let action = match (trigger, target) {
            (TriggerType::Auto, _) => return None,
            (TriggerType::ControlClick, _) => {
                controller.host_mut().click_control();
                AgentAction::ClickedControl
            }
            (TriggerType::PointerClick, Some(target)) => {
                controller.host_mut().click_target(target);
                AgentAction::ClickedTarget
            }
            (TriggerType::StateChange, Some(_)) => {
                controller.complete_current_step();
                AgentAction::CompletedTarget
            }
            (_, None) => {
                if !controller.skip_current_step_immediate() {
                    return None;
                }
                AgentAction::SkippedStep
            }
        };

        debug!(target: "flow", "Agent {} on step {}", action, index);
        // Act once per step; the step may be restarted, which resets this
        self.waited = 0;
        self.step = None;
        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_found_under_inactive_children() {
        let mut stage = SimStage::new();
        let root = stage.add_root("bench");
        let child = stage.add_child(root, "drawer");
        stage.set_active(child, false);
        let lid = stage.add_marker(root, "lid");
        let knob = stage.add_marker(child, "knob");

        let markers = stage.find_target_markers(root);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].handle, lid);
        assert_eq!(markers[1].handle, knob);
        assert_eq!(markers[1].owner, "drawer");
        assert!(!stage.is_active(child));
    }

    #[test]
    fn test_pointer_input_cleared_by_end_tick() {
        let mut stage = SimStage::new();
        let root = stage.add_root("bench");
        let lid = stage.add_marker(root, "lid");

        stage.click_target(lid);
        assert!(stage.is_primary_pointer_down_this_tick());
        assert_eq!(
            stage.current_ray_hit(),
            Some(RayHit {
                target: lid,
                is_step_target: true
            })
        );

        stage.end_tick();
        assert!(!stage.is_primary_pointer_down_this_tick());
        assert_eq!(stage.current_ray_hit(), None);
    }

    #[test]
    fn test_control_click_latch() {
        let mut stage = SimStage::new();
        stage.click_control();
        assert!(stage.take_control_click());
        assert!(!stage.take_control_click());
    }

    #[test]
    fn test_demo_file_parts() {
        let demo = DemoFile::from_toml_str(
            r#"
            [[scene]]
            name = "bench"
            targets = ["lid"]

            [[scene.children]]
            name = "drawer"
            active = false
            targets = ["knob"]

            [[steps]]
            id = "open"
            target = "lid"
            trigger = "pointer_click"
            "#,
        )
        .unwrap();

        let (stage, content) = demo.into_parts();
        assert_eq!(content.len(), 1);
        assert!(stage.marker("lid").is_some());
        assert!(stage.marker("knob").is_some());
        assert_eq!(stage.root_entities().len(), 1);
    }
}
