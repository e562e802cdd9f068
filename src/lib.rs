//! Step flow controller for guided, trigger-driven scene sequences.

pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod flow;
pub mod helper;
pub mod host;
pub mod logging;
pub mod scheduler;
pub mod sim;
pub mod target;

pub use content::{ParameterValue, StepContent, StepContentSet, StepParameter, TriggerType};
pub use error::{ConfigError, FlowError, HelperError};
pub use events::{FlowEnvelope, FlowEvent, FlowEventBus, FlowEventConsumer, LoggingConsumer};
pub use flow::{CompileReport, FlowState, StepFlowController};
pub use helper::{HelperContext, HelperRegistry, StepHelper, StepHelperTask};
pub use host::{FlowHost, InputSource, RayHit, StepEffects, StepTransaction, TargetState, TargetStates};
pub use target::{EntityId, Scene, TargetHandle, TargetMarker, TargetRegistry};
