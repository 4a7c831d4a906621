//! Term vocabulary specs and their resolution into live plugins.
//!
//! A Term stores plugin specs as data. Resolution happens once, when the
//! Term is loaded, producing a [`ResolvedTerm`] that owns its validators and
//! widgets; a changed spec means loading the Term again.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ValidationErrors};
use crate::plugins::{
    widgets::IdentityOutput, InputWidget, OutputWidget, PluginRegistry, PluginSpec, Validator,
};
use crate::slug::slugify;
use crate::types::DbId;

/// Taxonomy of Terms that key Project tags; this namespace is staff-only.
pub const PROJECT_TAXONOMY: &str = "Project";

/// The plugin part of a Term.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermSpec {
    #[serde(default)]
    pub validators: Vec<PluginSpec>,
    #[serde(default)]
    pub input_widget: Option<PluginSpec>,
    #[serde(default)]
    pub output_widget: Option<PluginSpec>,
}

/// How a key passed to the tag store identifies its Term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermRef {
    /// An already-loaded Term.
    Id(DbId),
    /// A slug or a human label; resolved by slug first, then by exact name.
    Key(String),
}

impl From<DbId> for TermRef {
    fn from(id: DbId) -> Self {
        TermRef::Id(id)
    }
}

impl From<&str> for TermRef {
    fn from(key: &str) -> Self {
        TermRef::Key(key.to_string())
    }
}

impl From<String> for TermRef {
    fn from(key: String) -> Self {
        TermRef::Key(key)
    }
}

/// A textual Term key prepared for lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermKey {
    /// Trimmed key, used as the name when a Term is created.
    pub name: String,
    /// Slugified key, tried first.
    pub slug: String,
}

/// Trim and slugify a textual key. Blank keys mean "no tag" and yield `None`.
pub fn normalize_key(key: &str) -> Option<TermKey> {
    let name = key.trim();
    if name.is_empty() {
        return None;
    }
    Some(TermKey {
        name: name.to_string(),
        slug: slugify(name),
    })
}

/// A Term's plugins, instantiated.
#[derive(Debug)]
pub struct ResolvedTerm {
    pub id: DbId,
    pub slug: String,
    pub name: String,
    pub taxonomy: String,
    pub project_id: Option<DbId>,
    pub validators: Vec<Box<dyn Validator>>,
    pub input_widget: Option<Box<dyn InputWidget>>,
    pub output_widget: Box<dyn OutputWidget>,
}

/// Instantiated plugins of a [`TermSpec`].
#[derive(Debug)]
pub struct ResolvedPlugins {
    pub validators: Vec<Box<dyn Validator>>,
    pub input_widget: Option<Box<dyn InputWidget>>,
    pub output_widget: Box<dyn OutputWidget>,
}

impl TermSpec {
    /// Instantiate every plugin in this spec.
    ///
    /// Strict mode fails with every broken spec listed. Non-strict mode drops
    /// broken validators, falls back to no input widget and the identity
    /// output widget, and logs what was dropped.
    pub fn resolve(
        &self,
        registry: &PluginRegistry,
        strict: bool,
    ) -> Result<ResolvedPlugins, CoreError> {
        let mut errors = ValidationErrors::new();

        let mut validators = Vec::with_capacity(self.validators.len());
        for (idx, spec) in self.validators.iter().enumerate() {
            match registry.validator(spec) {
                Ok(v) => validators.push(v),
                Err(err) => note(&mut errors, strict, format!("validators[{idx}]"), spec, err),
            }
        }

        let input_widget = match &self.input_widget {
            None => None,
            Some(spec) => match registry.input_widget(spec) {
                Ok(w) => Some(w),
                Err(err) => {
                    note(&mut errors, strict, "input_widget".to_string(), spec, err);
                    None
                }
            },
        };

        let output_widget: Box<dyn OutputWidget> = match &self.output_widget {
            None => Box::new(IdentityOutput),
            Some(spec) => match registry.output_widget(spec) {
                Ok(w) => w,
                Err(err) => {
                    note(&mut errors, strict, "output_widget".to_string(), spec, err);
                    Box::new(IdentityOutput)
                }
            },
        };

        errors.into_result()?;
        Ok(ResolvedPlugins {
            validators,
            input_widget,
            output_widget,
        })
    }
}

fn note(
    errors: &mut ValidationErrors,
    strict: bool,
    field: String,
    spec: &PluginSpec,
    err: CoreError,
) {
    if strict {
        let message = match err {
            CoreError::Validation(inner) => inner.to_string(),
            other => other.to_string(),
        };
        errors.add(field, message);
    } else {
        tracing::warn!(field = %field, plugin = %spec.name, error = %err, "Dropping broken plugin spec");
    }
}

impl ResolvedTerm {
    /// Run every validator against `value`, collecting all failures on `field`.
    ///
    /// Each message names the offending value.
    pub fn validate_value(&self, field: &str, value: &str) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for validator in &self.validators {
            if let Err(msg) = validator.validate(value) {
                errors.add(
                    field,
                    format!("{}: \"{value}\" is invalid: {msg}", self.name),
                );
            }
        }
        errors
    }

    /// Render `value` through the output widget.
    pub fn render(&self, value: Option<&str>) -> String {
        self.output_widget.render(value)
    }

    /// Whether this Term belongs to the staff-only project vocabulary.
    pub fn is_project_vocabulary(&self) -> bool {
        self.taxonomy == PROJECT_TAXONOMY
    }
}
