//! Built-in input and output widgets.
//!
//! Input widgets describe how a form should collect a tag value; output
//! widgets render a stored value for display.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::{allow_args, opt_usize, PluginArgs, PluginRegistry};

/// Describes a form control.
pub trait InputWidget: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> InputDescriptor;
}

/// Renders a stored value.
pub trait OutputWidget: Send + Sync + fmt::Debug {
    fn render(&self, value: Option<&str>) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputType {
    Text,
    Textarea,
    Number,
    Checkbox,
    Date,
    DateTime,
    Email,
    Hidden,
    Select,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

/// What a form renderer needs to draw one input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputDescriptor {
    pub input_type: InputType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
    /// Extra HTML attributes (placeholder, rows, step, ...).
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub attrs: PluginArgs,
}

/// A widget that forwards its arguments as attributes.
#[derive(Debug)]
pub struct BasicInput {
    input_type: InputType,
    attrs: PluginArgs,
}

impl InputWidget for BasicInput {
    fn descriptor(&self) -> InputDescriptor {
        InputDescriptor {
            input_type: self.input_type,
            choices: Vec::new(),
            attrs: self.attrs.clone(),
        }
    }
}

#[derive(Debug)]
pub struct SelectInput {
    choices: Vec<Choice>,
    attrs: PluginArgs,
}

impl SelectInput {
    /// `choices` is either `["a", "b"]` or `[["a", "Label A"], ...]`.
    fn from_args(args: &PluginArgs) -> Result<Self, String> {
        let raw = match args.get("choices") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err("\"choices\" must be a list".to_string()),
            None => return Err("missing required argument \"choices\"".to_string()),
        };
        let mut choices = Vec::with_capacity(raw.len());
        for item in raw {
            let choice = match item {
                Value::String(s) => Choice {
                    value: s.clone(),
                    label: s.clone(),
                },
                Value::Array(pair) => match pair.as_slice() {
                    [Value::String(v), Value::String(l)] => Choice {
                        value: v.clone(),
                        label: l.clone(),
                    },
                    _ => return Err("each choice pair must be [value, label]".to_string()),
                },
                _ => return Err("each choice must be a string or a [value, label] pair".to_string()),
            };
            choices.push(choice);
        }
        let mut attrs = args.clone();
        attrs.remove("choices");
        Ok(Self { choices, attrs })
    }
}

impl InputWidget for SelectInput {
    fn descriptor(&self) -> InputDescriptor {
        InputDescriptor {
            input_type: InputType::Select,
            choices: self.choices.clone(),
            attrs: self.attrs.clone(),
        }
    }
}

/// Shows the value unchanged.
#[derive(Debug)]
pub struct IdentityOutput;

impl OutputWidget for IdentityOutput {
    fn render(&self, value: Option<&str>) -> String {
        value.unwrap_or_default().to_string()
    }
}

/// Hides the value.
#[derive(Debug)]
pub struct EmptyOutput;

impl OutputWidget for EmptyOutput {
    fn render(&self, _value: Option<&str>) -> String {
        String::new()
    }
}

/// Formats numeric values with a fixed number of decimals; other values pass through.
#[derive(Debug)]
pub struct FloatOutput {
    precision: usize,
}

impl OutputWidget for FloatOutput {
    fn render(&self, value: Option<&str>) -> String {
        let raw = value.unwrap_or_default();
        match raw.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => format!("{n:.*}", self.precision),
            _ => raw.to_string(),
        }
    }
}

pub(crate) fn register_builtins(registry: &mut PluginRegistry) {
    for (name, input_type) in [
        ("TextInput", InputType::Text),
        ("Textarea", InputType::Textarea),
        ("NumberInput", InputType::Number),
        ("CheckboxInput", InputType::Checkbox),
        ("DateInput", InputType::Date),
        ("DateTimeInput", InputType::DateTime),
        ("EmailInput", InputType::Email),
        ("HiddenInput", InputType::Hidden),
    ] {
        registry.register_input_widget(name, move |args| {
            Ok(Box::new(BasicInput {
                input_type,
                attrs: args.clone(),
            }))
        });
    }
    registry.register_input_widget("Select", |args| Ok(Box::new(SelectInput::from_args(args)?)));

    registry.register_output_widget("IdentityOutput", |args| {
        allow_args(args, &[])?;
        Ok(Box::new(IdentityOutput))
    });
    registry.register_output_widget("EmptyOutput", |args| {
        allow_args(args, &[])?;
        Ok(Box::new(EmptyOutput))
    });
    registry.register_output_widget("FloatOutput", |args| {
        allow_args(args, &["precision"])?;
        Ok(Box::new(FloatOutput {
            precision: opt_usize(args, "precision")?.unwrap_or(2),
        }))
    });
}
