//! Built-in tag value validators.
//!
//! Every validator receives the raw string value of a tag. JSON validators
//! accept the empty string so that an unset value never fails them.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use super::{allow_args, opt_bool, opt_f64, opt_str, opt_usize, required, PluginArgs, PluginRegistry};
use crate::geometry;

/// Checks one string value.
pub trait Validator: Send + Sync + fmt::Debug {
    /// `Err` carries a human-readable message.
    fn validate(&self, value: &str) -> Result<(), String>;
}

pub(crate) fn register_builtins(registry: &mut PluginRegistry) {
    registry.register_validator("Regex", |args| Ok(Box::new(RegexValidator::from_args(args)?)));
    registry.register_validator("MinLength", |args| {
        Ok(Box::new(LengthValidator::from_args(args, Bound::Min)?))
    });
    registry.register_validator("MaxLength", |args| {
        Ok(Box::new(LengthValidator::from_args(args, Bound::Max)?))
    });
    registry.register_validator("MinValue", |args| {
        Ok(Box::new(ValueValidator::from_args(args, Bound::Min)?))
    });
    registry.register_validator("MaxValue", |args| {
        Ok(Box::new(ValueValidator::from_args(args, Bound::Max)?))
    });
    registry.register_validator("Decimal", |args| {
        Ok(Box::new(DecimalValidator::from_args(args)?))
    });
    registry.register_validator("Email", |args| {
        allow_args(args, &["message"])?;
        Ok(Box::new(PatternValidator::email(opt_str(args, "message")?)?))
    });
    registry.register_validator("URL", |args| {
        allow_args(args, &["message"])?;
        Ok(Box::new(PatternValidator::url(opt_str(args, "message")?)?))
    });
    registry.register_validator("IsARegex", |args| {
        allow_args(args, &[])?;
        Ok(Box::new(IsARegexValidator))
    });
    registry.register_validator("Float", |args| {
        allow_args(args, &[])?;
        Ok(Box::new(FloatValidator))
    });
    registry.register_validator("Integer", |args| {
        allow_args(args, &[])?;
        Ok(Box::new(IntegerValidator))
    });
    registry.register_validator("WKT", |args| {
        allow_args(args, &[])?;
        Ok(Box::new(WktValidator))
    });
    registry.register_validator("JSONDict", |args| {
        allow_args(args, &[])?;
        Ok(Box::new(JsonDictValidator))
    });
    registry.register_validator("JSONList", |args| {
        Ok(Box::new(JsonListValidator::from_args(args)?))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Min,
    Max,
}

// ---------------------------------------------------------------------------
// Regex
// ---------------------------------------------------------------------------

/// Value must (or, with `inverse_match`, must not) contain a match of `regex`.
#[derive(Debug)]
pub struct RegexValidator {
    regex: Regex,
    inverse_match: bool,
    message: String,
}

impl RegexValidator {
    fn from_args(args: &PluginArgs) -> Result<Self, String> {
        allow_args(args, &["regex", "inverse_match", "message", "case_insensitive"])?;
        let pattern = required(opt_str(args, "regex")?, "regex")?;
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(opt_bool(args, "case_insensitive")?.unwrap_or(false))
            .build()
            .map_err(|e| format!("invalid regex: {e}"))?;
        Ok(Self {
            regex,
            inverse_match: opt_bool(args, "inverse_match")?.unwrap_or(false),
            message: opt_str(args, "message")?
                .unwrap_or("Enter a valid value.")
                .to_string(),
        })
    }
}

impl Validator for RegexValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        if self.regex.is_match(value) != self.inverse_match {
            Ok(())
        } else {
            Err(self.message.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// Length and value bounds
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct LengthValidator {
    limit: usize,
    bound: Bound,
}

impl LengthValidator {
    fn from_args(args: &PluginArgs, bound: Bound) -> Result<Self, String> {
        allow_args(args, &["limit_value"])?;
        Ok(Self {
            limit: required(opt_usize(args, "limit_value")?, "limit_value")?,
            bound,
        })
    }
}

impl Validator for LengthValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        let len = value.chars().count();
        match self.bound {
            Bound::Min if len < self.limit => Err(format!(
                "Ensure this value has at least {} characters (it has {len}).",
                self.limit
            )),
            Bound::Max if len > self.limit => Err(format!(
                "Ensure this value has at most {} characters (it has {len}).",
                self.limit
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct ValueValidator {
    limit: f64,
    bound: Bound,
}

impl ValueValidator {
    fn from_args(args: &PluginArgs, bound: Bound) -> Result<Self, String> {
        allow_args(args, &["limit_value"])?;
        Ok(Self {
            limit: required(opt_f64(args, "limit_value")?, "limit_value")?,
            bound,
        })
    }
}

impl Validator for ValueValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        let number: f64 = value
            .trim()
            .parse()
            .map_err(|_| "Enter a number.".to_string())?;
        match self.bound {
            Bound::Min if number < self.limit => Err(format!(
                "Ensure this value is greater than or equal to {}.",
                self.limit
            )),
            Bound::Max if number > self.limit => Err(format!(
                "Ensure this value is less than or equal to {}.",
                self.limit
            )),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Decimal
// ---------------------------------------------------------------------------

/// Plain decimal notation with optional limits on total digits and decimal places.
#[derive(Debug)]
pub struct DecimalValidator {
    max_digits: Option<usize>,
    decimal_places: Option<usize>,
}

impl DecimalValidator {
    fn from_args(args: &PluginArgs) -> Result<Self, String> {
        allow_args(args, &["max_digits", "decimal_places"])?;
        Ok(Self {
            max_digits: opt_usize(args, "max_digits")?,
            decimal_places: opt_usize(args, "decimal_places")?,
        })
    }
}

impl Validator for DecimalValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        let trimmed = value.trim();
        let unsigned = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
        let (whole, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let well_formed = !(whole.is_empty() && frac.is_empty())
            && whole.bytes().all(|b| b.is_ascii_digit())
            && frac.bytes().all(|b| b.is_ascii_digit());
        if !well_formed {
            return Err("Enter a number.".to_string());
        }

        let whole_digits = whole.trim_start_matches('0').len();
        let decimals = frac.len();
        let digits = whole_digits + decimals;

        if let Some(max) = self.max_digits {
            if digits > max {
                return Err(format!(
                    "Ensure that there are no more than {max} digits in total."
                ));
            }
        }
        if let Some(places) = self.decimal_places {
            if decimals > places {
                return Err(format!(
                    "Ensure that there are no more than {places} decimal places."
                ));
            }
        }
        if let (Some(max), Some(places)) = (self.max_digits, self.decimal_places) {
            let allowed = max.saturating_sub(places);
            if whole_digits > allowed {
                return Err(format!(
                    "Ensure that there are no more than {allowed} digits before the decimal point."
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Email and URL
// ---------------------------------------------------------------------------

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s.]+$";
const URL_PATTERN: &str = r"(?i)^(https?|ftps?)://[^\s/$.?#][^\s]*$";

#[derive(Debug)]
pub struct PatternValidator {
    regex: Regex,
    message: String,
}

impl PatternValidator {
    fn email(message: Option<&str>) -> Result<Self, String> {
        Self::build(EMAIL_PATTERN, message.unwrap_or("Enter a valid email address."))
    }

    fn url(message: Option<&str>) -> Result<Self, String> {
        Self::build(URL_PATTERN, message.unwrap_or("Enter a valid URL."))
    }

    fn build(pattern: &str, message: &str) -> Result<Self, String> {
        Ok(Self {
            regex: Regex::new(pattern).map_err(|e| e.to_string())?,
            message: message.to_string(),
        })
    }
}

impl Validator for PatternValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        if self.regex.is_match(value.trim()) {
            Ok(())
        } else {
            Err(self.message.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// Parse-only validators
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct IsARegexValidator;

impl Validator for IsARegexValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        Regex::new(value)
            .map(|_| ())
            .map_err(|e| format!("Value is not a valid regular expression: {e}"))
    }
}

#[derive(Debug)]
pub struct FloatValidator;

impl Validator for FloatValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        value
            .trim()
            .parse::<f64>()
            .map(|_| ())
            .map_err(|_| "Value cannot be converted to float".to_string())
    }
}

#[derive(Debug)]
pub struct IntegerValidator;

impl Validator for IntegerValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        value
            .trim()
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| "Value cannot be converted to an integer".to_string())
    }
}

#[derive(Debug)]
pub struct WktValidator;

impl Validator for WktValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Ok(());
        }
        geometry::validate_wkt(value).map_err(|e| format!("Value is not valid WKT: {e}"))
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn parse_json(value: &str) -> Result<Option<Value>, String> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(value)
        .map(Some)
        .map_err(|e| format!("Value is not valid JSON: {e}"))
}

#[derive(Debug)]
pub struct JsonDictValidator;

impl Validator for JsonDictValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        match parse_json(value)? {
            None | Some(Value::Object(_)) => Ok(()),
            Some(_) => Err("Value is not a JSON object".to_string()),
        }
    }
}

/// Element type accepted by [`JsonListValidator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonItemType {
    String,
    Integer,
    Number,
    Boolean,
    List,
    Dict,
}

impl JsonItemType {
    fn parse(name: &str) -> Result<Self, String> {
        match name {
            "str" | "string" => Ok(Self::String),
            "int" | "integer" => Ok(Self::Integer),
            "float" | "number" => Ok(Self::Number),
            "bool" | "boolean" => Ok(Self::Boolean),
            "list" | "array" => Ok(Self::List),
            "dict" | "object" => Ok(Self::Dict),
            other => Err(format!("unknown item_type \"{other}\"")),
        }
    }

    fn accepts(self, item: &Value) -> bool {
        match self {
            Self::String => item.is_string(),
            Self::Integer => item.is_i64() || item.is_u64(),
            Self::Number => item.is_number(),
            Self::Boolean => item.is_boolean(),
            Self::List => item.is_array(),
            Self::Dict => item.is_object(),
        }
    }
}

#[derive(Debug)]
pub struct JsonListValidator {
    item_type: Option<JsonItemType>,
    min_length: Option<usize>,
    max_length: Option<usize>,
}

impl JsonListValidator {
    fn from_args(args: &PluginArgs) -> Result<Self, String> {
        allow_args(args, &["item_type", "min_length", "max_length"])?;
        Ok(Self {
            item_type: opt_str(args, "item_type")?.map(JsonItemType::parse).transpose()?,
            min_length: opt_usize(args, "min_length")?,
            max_length: opt_usize(args, "max_length")?,
        })
    }
}

impl Validator for JsonListValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        let items = match parse_json(value)? {
            None => return Ok(()),
            Some(Value::Array(items)) => items,
            Some(_) => return Err("Value is not a JSON list".to_string()),
        };

        if let Some(min) = self.min_length {
            if items.len() < min {
                return Err(format!("List must contain at least {min} items"));
            }
        }
        if let Some(max) = self.max_length {
            if items.len() > max {
                return Err(format!("List must contain at most {max} items"));
            }
        }
        if let Some(item_type) = self.item_type {
            if let Some(pos) = items.iter().position(|item| !item_type.accepts(item)) {
                return Err(format!("List item {pos} has the wrong type"));
            }
        }
        Ok(())
    }
}
