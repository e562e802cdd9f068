//! Authored step content.
//!
//! Steps are owned by the content asset and treated as read-only by the
//! controller; runtime-only flags live in the controller's compiled overlay.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use strum_macros::Display;

/// Helper name that authoring tools write when a step has no helper
pub const NO_HELPER: &str = "<None>";

/// Condition class that satisfies a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Primary pointer pressed over the step's target
    PointerClick,
    /// A UI control reported a click
    ControlClick,
    /// The target's external state flipped to `Done`
    StateChange,
    /// Satisfied on the first evaluation
    Auto,
}

/// Typed value of a step or helper parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Reference to a scene target, resolved through the target registry
    Target(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepParameter {
    pub name: String,
    pub value: ParameterValue,
}

/// One authored step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepContent {
    /// Stable identifier, unique within the content set
    pub id: String,

    /// Display name used in logs; falls back to the id
    #[serde(default)]
    pub name: String,

    /// Target identifier resolved against the target registry
    #[serde(default)]
    pub target: Option<String>,

    pub trigger: TriggerType,

    /// Seconds to hold after execution before advancing
    #[serde(default)]
    pub elapse_time: f32,

    /// Advance with zero delay regardless of `elapse_time`
    #[serde(default)]
    pub instant: bool,

    /// Registered helper name, or `<None>`
    #[serde(default)]
    pub helper: Option<String>,

    #[serde(default)]
    pub parameters: Vec<StepParameter>,

    /// Author-side enable flag
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Secondary target references used during execution
    #[serde(default)]
    pub operations: Vec<String>,

    /// Prompt text shown to the user while the step is active
    #[serde(default)]
    pub prompt: Option<String>,

    /// Authored custom-order link to another step id
    #[serde(default)]
    pub next: Option<String>,
}

fn default_true() -> bool {
    true
}

impl StepContent {
    pub fn new(id: impl Into<String>, trigger: TriggerType) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            target: None,
            trigger,
            elapse_time: 0.0,
            instant: false,
            helper: None,
            parameters: Vec::new(),
            enabled: true,
            operations: Vec::new(),
            prompt: None,
            next: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_helper(mut self, helper: impl Into<String>) -> Self {
        self.helper = Some(helper.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.parameters.push(StepParameter {
            name: name.into(),
            value,
        });
        self
    }

    pub fn with_elapse(mut self, seconds: f32) -> Self {
        self.elapse_time = seconds;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn instant(mut self) -> Self {
        self.instant = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Name for logs
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Helper name with the `<None>` sentinel and blanks filtered out
    pub fn helper_name(&self) -> Option<&str> {
        self.helper
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != NO_HELPER)
    }

    /// Seconds to hold after execution, honoring `instant`
    pub fn hold_seconds(&self) -> f32 {
        if self.instant {
            0.0
        } else {
            self.elapse_time.max(0.0)
        }
    }
}

impl fmt::Display for StepContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.trigger)
    }
}

/// Ordered set of steps as supplied by the content asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContentSet {
    #[serde(default)]
    pub steps: Vec<StepContent>,
}

impl StepContentSet {
    pub fn new(steps: Vec<StepContent>) -> Self {
        Self { steps }
    }

    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        toml::from_str(source).context("failed to parse step content")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&source)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
