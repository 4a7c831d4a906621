//! Catalog configuration loaded from environment variables.

use std::collections::BTreeSet;

use crate::kind::EntityKind;
use crate::permissions::Action;

/// Default DataView page size.
pub const DEFAULT_PAGE_LIMIT: i64 = 10;

/// Hard cap on DataView page size.
pub const MAX_PAGE_LIMIT: i64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got \"{value}\"")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Behavior switches for the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    pub default_page_limit: i64,
    pub max_page_limit: i64,
    /// Kinds whose delete removes owned children instead of refusing.
    pub cascade_on_delete: BTreeSet<EntityKind>,
    /// Actions granted by bootstrap and to the creator of a new project.
    pub default_actions: Vec<Action>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_page_limit: MAX_PAGE_LIMIT,
            cascade_on_delete: BTreeSet::new(),
            default_actions: vec![Action::VIEW, Action::EDIT, Action::ADD, Action::DELETE],
        }
    }
}

impl CatalogConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `LIMS_DEFAULT_PAGE_LIMIT` | `10`                    |
    /// | `LIMS_MAX_PAGE_LIMIT`     | `1000`                  |
    /// | `LIMS_CASCADE_ON_DELETE`  | empty                   |
    /// | `LIMS_DEFAULT_ACTIONS`    | `view,edit,add,delete`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_page_limit = match lookup("LIMS_DEFAULT_PAGE_LIMIT") {
            Some(v) => parse_positive("LIMS_DEFAULT_PAGE_LIMIT", &v)?,
            None => defaults.default_page_limit,
        };
        let max_page_limit = match lookup("LIMS_MAX_PAGE_LIMIT") {
            Some(v) => parse_positive("LIMS_MAX_PAGE_LIMIT", &v)?,
            None => defaults.max_page_limit,
        };
        if default_page_limit > max_page_limit {
            return Err(ConfigError::Invalid {
                var: "LIMS_DEFAULT_PAGE_LIMIT",
                expected: "no larger than LIMS_MAX_PAGE_LIMIT",
                value: default_page_limit.to_string(),
            });
        }

        let cascade_on_delete = match lookup("LIMS_CASCADE_ON_DELETE") {
            Some(v) => split_list(&v)
                .map(|item| {
                    item.parse::<EntityKind>()
                        .ok()
                        .filter(|k| !k.is_tag())
                        .ok_or_else(|| ConfigError::Invalid {
                            var: "LIMS_CASCADE_ON_DELETE",
                            expected: "a comma separated list of Project, Sample, Attachment, Term",
                            value: item.to_string(),
                        })
                })
                .collect::<Result<_, _>>()?,
            None => defaults.cascade_on_delete,
        };

        let default_actions = match lookup("LIMS_DEFAULT_ACTIONS") {
            Some(v) => split_list(&v)
                .map(|item| {
                    item.parse::<Action>().map_err(|_| ConfigError::Invalid {
                        var: "LIMS_DEFAULT_ACTIONS",
                        expected: "a comma separated list of action names",
                        value: item.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?,
            None => defaults.default_actions,
        };

        Ok(Self {
            default_page_limit,
            max_page_limit,
            cascade_on_delete,
            default_actions,
        })
    }

    pub fn cascades(&self, kind: EntityKind) -> bool {
        self.cascade_on_delete.contains(&kind)
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<i64, ConfigError> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::Invalid {
            var,
            expected: "a positive integer",
            value: value.to_string(),
        })
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<CatalogConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CatalogConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(load(&[]).unwrap(), CatalogConfig::default());
    }

    #[test]
    fn parses_lists() {
        let config = load(&[
            ("LIMS_CASCADE_ON_DELETE", "Sample, attachments"),
            ("LIMS_DEFAULT_ACTIONS", "view"),
        ])
        .unwrap();
        assert!(config.cascades(EntityKind::Sample));
        assert!(config.cascades(EntityKind::Attachment));
        assert!(!config.cascades(EntityKind::Project));
        assert_eq!(config.default_actions, vec![Action::VIEW]);
    }

    #[test]
    fn rejects_bad_values() {
        assert_matches!(
            load(&[("LIMS_MAX_PAGE_LIMIT", "0")]),
            Err(ConfigError::Invalid { var: "LIMS_MAX_PAGE_LIMIT", .. })
        );
        assert_matches!(
            load(&[("LIMS_CASCADE_ON_DELETE", "SampleTag")]),
            Err(ConfigError::Invalid { var: "LIMS_CASCADE_ON_DELETE", .. })
        );
        assert_matches!(
            load(&[("LIMS_DEFAULT_PAGE_LIMIT", "50"), ("LIMS_MAX_PAGE_LIMIT", "20")]),
            Err(ConfigError::Invalid { .. })
        );
    }
}
