//! Named, parameterized validator and widget plugins.
//!
//! A [`PluginRegistry`] is built once at startup (usually via
//! [`PluginRegistry::with_builtins`]), extended by the host application with
//! its own factories, and then passed by reference to whatever resolves Term
//! specs. There is no process-wide registry.

pub mod validators;
pub mod widgets;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

pub use validators::Validator;
pub use widgets::{InputDescriptor, InputType, InputWidget, OutputWidget};

/// Arguments of a plugin spec.
pub type PluginArgs = serde_json::Map<String, Value>;

pub type ValidatorFactory =
    Arc<dyn Fn(&PluginArgs) -> Result<Box<dyn Validator>, String> + Send + Sync>;
pub type InputWidgetFactory =
    Arc<dyn Fn(&PluginArgs) -> Result<Box<dyn InputWidget>, String> + Send + Sync>;
pub type OutputWidgetFactory =
    Arc<dyn Fn(&PluginArgs) -> Result<Box<dyn OutputWidget>, String> + Send + Sync>;

/// Which lookup table a plugin name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PluginNamespace {
    Validator,
    InputWidget,
    OutputWidget,
}

impl fmt::Display for PluginNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PluginNamespace::Validator => "validator",
            PluginNamespace::InputWidget => "input widget",
            PluginNamespace::OutputWidget => "output widget",
        })
    }
}

/// A stored reference to a plugin: its registered name plus JSON arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    #[serde(default)]
    pub args: PluginArgs,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: PluginArgs::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Lookup tables for validators, input widgets and output widgets.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    validators: BTreeMap<String, ValidatorFactory>,
    input_widgets: BTreeMap<String, InputWidgetFactory>,
    output_widgets: BTreeMap<String, OutputWidgetFactory>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .field("input_widgets", &self.input_widgets.keys().collect::<Vec<_>>())
            .field("output_widgets", &self.output_widgets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with every built-in validator and widget.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        validators::register_builtins(&mut registry);
        widgets::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) a validator factory under `name`.
    pub fn register_validator<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&PluginArgs) -> Result<Box<dyn Validator>, String> + Send + Sync + 'static,
    {
        self.validators.insert(name.into(), Arc::new(factory));
    }

    pub fn register_input_widget<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&PluginArgs) -> Result<Box<dyn InputWidget>, String> + Send + Sync + 'static,
    {
        self.input_widgets.insert(name.into(), Arc::new(factory));
    }

    pub fn register_output_widget<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&PluginArgs) -> Result<Box<dyn OutputWidget>, String> + Send + Sync + 'static,
    {
        self.output_widgets.insert(name.into(), Arc::new(factory));
    }

    pub fn has(&self, namespace: PluginNamespace, name: &str) -> bool {
        match namespace {
            PluginNamespace::Validator => self.validators.contains_key(name),
            PluginNamespace::InputWidget => self.input_widgets.contains_key(name),
            PluginNamespace::OutputWidget => self.output_widgets.contains_key(name),
        }
    }

    /// Names registered in `namespace`, sorted.
    pub fn names(&self, namespace: PluginNamespace) -> Vec<&str> {
        match namespace {
            PluginNamespace::Validator => self.validators.keys().map(String::as_str).collect(),
            PluginNamespace::InputWidget => {
                self.input_widgets.keys().map(String::as_str).collect()
            }
            PluginNamespace::OutputWidget => {
                self.output_widgets.keys().map(String::as_str).collect()
            }
        }
    }

    /// Instantiate the validator described by `spec`.
    pub fn validator(&self, spec: &PluginSpec) -> Result<Box<dyn Validator>, CoreError> {
        let factory = self
            .validators
            .get(&spec.name)
            .ok_or_else(|| unknown(PluginNamespace::Validator, &spec.name))?;
        factory(&spec.args).map_err(|msg| invalid_args(PluginNamespace::Validator, spec, msg))
    }

    pub fn input_widget(&self, spec: &PluginSpec) -> Result<Box<dyn InputWidget>, CoreError> {
        let factory = self
            .input_widgets
            .get(&spec.name)
            .ok_or_else(|| unknown(PluginNamespace::InputWidget, &spec.name))?;
        factory(&spec.args).map_err(|msg| invalid_args(PluginNamespace::InputWidget, spec, msg))
    }

    pub fn output_widget(&self, spec: &PluginSpec) -> Result<Box<dyn OutputWidget>, CoreError> {
        let factory = self
            .output_widgets
            .get(&spec.name)
            .ok_or_else(|| unknown(PluginNamespace::OutputWidget, &spec.name))?;
        factory(&spec.args).map_err(|msg| invalid_args(PluginNamespace::OutputWidget, spec, msg))
    }
}

fn unknown(namespace: PluginNamespace, name: &str) -> CoreError {
    CoreError::UnknownPlugin {
        namespace,
        name: name.to_string(),
    }
}

fn invalid_args(namespace: PluginNamespace, spec: &PluginSpec, msg: String) -> CoreError {
    CoreError::field(
        namespace.to_string(),
        format!("Could not instantiate {namespace} \"{}\": {msg}", spec.name),
    )
}

// ---------------------------------------------------------------------------
// Argument helpers shared by the built-in factories
// ---------------------------------------------------------------------------

/// Reject argument names a factory does not understand.
pub(crate) fn allow_args(args: &PluginArgs, allowed: &[&str]) -> Result<(), String> {
    let unexpected: Vec<&str> = args
        .keys()
        .map(String::as_str)
        .filter(|k| !allowed.contains(k))
        .collect();
    if unexpected.is_empty() {
        Ok(())
    } else {
        Err(format!("unexpected argument(s): {}", unexpected.join(", ")))
    }
}

pub(crate) fn opt_usize(args: &PluginArgs, key: &str) -> Result<Option<usize>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| format!("\"{key}\" must be a non-negative integer")),
    }
}

pub(crate) fn opt_f64(args: &PluginArgs, key: &str) -> Result<Option<f64>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("\"{key}\" must be a number")),
    }
}

pub(crate) fn opt_str<'a>(args: &'a PluginArgs, key: &str) -> Result<Option<&'a str>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(format!("\"{key}\" must be a string")),
    }
}

pub(crate) fn opt_bool(args: &PluginArgs, key: &str) -> Result<Option<bool>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(format!("\"{key}\" must be a boolean")),
    }
}

pub(crate) fn required<T>(value: Option<T>, key: &str) -> Result<T, String> {
    value.ok_or_else(|| format!("missing required argument \"{key}\""))
}
