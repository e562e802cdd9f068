use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

use super::StepHelper;
use crate::error::HelperError;

/// Factory closure type for creating helper instances
pub type HelperFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn StepHelper>> + Send + Sync>;

/// Registry of available step helpers, keyed by name
pub struct HelperRegistry {
    factories: HashMap<String, HelperFactory>,
}

impl HelperRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in helpers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::register_helpers!(registry, super::HighlightHelper, super::TimedHelper);
        registry
    }

    /// Register a helper factory, replacing any previous one with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> anyhow::Result<Box<dyn StepHelper>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(target: "helper", "Registering helper factory: {}", name);
        self.factories.insert(name, Box::new(factory));
    }

    /// Register a helper type constructed through `Default`
    pub fn register_default<T>(&mut self)
    where
        T: StepHelper + Default,
    {
        let name = T::default().name();
        self.register(name, || Ok(Box::new(T::default()) as Box<dyn StepHelper>));
    }

    /// Construct a helper by name
    pub fn create(&self, name: &str) -> Result<Box<dyn StepHelper>, HelperError> {
        let factory = self.factories.get(name).ok_or_else(|| HelperError::Unknown {
            name: name.to_string(),
        })?;

        match panic::catch_unwind(AssertUnwindSafe(|| factory())) {
            Ok(Ok(helper)) => Ok(helper),
            Ok(Err(source)) => Err(HelperError::Construction {
                name: name.to_string(),
                source,
            }),
            Err(payload) => Err(HelperError::Construction {
                name: name.to_string(),
                source: anyhow::anyhow!("factory panicked: {}", panic_message(&*payload)),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Get the sorted list of all registered helper names
    pub fn available_helpers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for HelperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Macro to register multiple `Default` helpers at once
///
/// # Example
/// ```ignore
/// let mut registry = HelperRegistry::new();
/// register_helpers!(registry, HighlightHelper, TimedHelper);
/// ```
#[macro_export]
macro_rules! register_helpers {
    ($registry:expr, $($helper:ty),+ $(,)?) => {
        $(
            $registry.register_default::<$helper>();
        )+
    };
}
