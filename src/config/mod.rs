//! Algorithm configuration.
//!
//! An [`AlgorithmConfig`] is a named, versioned set of typed parameters
//! describing how a carrier type should be configured. Parameters carry an
//! ordered option set (literal values or inclusive numeric ranges) and are
//! validated on every assignment; a rejected assignment leaves the config
//! unmodified. Configs are cloned when a user customizes a registry preset
//! and treated as immutable once bound to an active carrier codec.

mod node;
mod registry;

pub use node::{ConfigNode, OptionNode, ParameterNode};
pub use registry::{
    AlgorithmRegistry, DIRECT_CHANNEL, RAW_BLOCK, STEALTH, TEXT_BLOCK,
};

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by configuration handling.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("parameter '{parameter}' rejected value {value}: no declared option allows it")]
    ValueRejected { parameter: String, value: ParamValue },

    #[error("parameter '{parameter}' expects type {expected}, got {got}")]
    TypeMismatch {
        parameter: String,
        expected: ParamType,
        got: ParamType,
    },

    #[error("parameter '{0}' is required and cannot be disabled")]
    RequiredParameter(String),

    #[error("duplicate parameter name '{0}'")]
    DuplicateParameter(String),

    #[error("unknown algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("malformed config node: {0}")]
    MalformedNode(String),
}

/// The type of a configuration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    String,
    Int,
    Long,
    Bool,
    Decimal,
    File,
}

impl ParamType {
    /// The lowercase name used in persisted nodes.
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Int => "int",
            ParamType::Long => "long",
            ParamType::Bool => "bool",
            ParamType::Decimal => "decimal",
            ParamType::File => "file",
        }
    }

    /// Parses a persisted type name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ParamType::String),
            "int" => Some(ParamType::Int),
            "long" => Some(ParamType::Long),
            "bool" => Some(ParamType::Bool),
            "decimal" => Some(ParamType::Decimal),
            "file" => Some(ParamType::File),
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    String(String),
    Int(i32),
    Long(i64),
    Bool(bool),
    Decimal(f64),
    File(PathBuf),
}

impl ParamValue {
    /// Returns the type of this value.
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::String(_) => ParamType::String,
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Long(_) => ParamType::Long,
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::Decimal(_) => ParamType::Decimal,
            ParamValue::File(_) => ParamType::File,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            ParamValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            ParamValue::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&PathBuf> {
        match self {
            ParamValue::File(p) => Some(p),
            _ => None,
        }
    }

    /// The numeric magnitude used for range checks, if any.
    fn numeric(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(i64::from(*v)),
            ParamValue::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => write!(f, "'{s}'"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Long(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Decimal(v) => write!(f, "{v}"),
            ParamValue::File(p) => write!(f, "'{}'", p.display()),
        }
    }
}

/// One allowed shape for a parameter's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamOption {
    /// Exactly this value is allowed.
    Literal(ParamValue),
    /// Any Int/Long value within the inclusive bounds.
    Range { min: i64, max: i64 },
    /// Any Decimal value within the inclusive bounds.
    DecimalRange { min: f64, max: f64 },
}

impl ParamOption {
    /// Returns true if `value` satisfies this option.
    pub fn allows(&self, value: &ParamValue) -> bool {
        match self {
            ParamOption::Literal(allowed) => allowed == value,
            ParamOption::Range { min, max } => value
                .numeric()
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
            ParamOption::DecimalRange { min, max } => value
                .as_decimal()
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
        }
    }
}

/// A single named, typed, validated configuration parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    param_type: ParamType,
    value: ParamValue,
    optional: bool,
    enabled: bool,
    description: String,
    options: Vec<ParamOption>,
}

impl Parameter {
    /// Creates a required, enabled parameter with no option constraints.
    pub fn new(name: &str, value: ParamValue, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: value.param_type(),
            value,
            optional: false,
            enabled: true,
            description: description.to_string(),
            options: Vec::new(),
        }
    }

    /// Marks the parameter optional (it may then be disabled).
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Adds an option to the ordered option set.
    pub fn with_option(mut self, option: ParamOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_type(&self) -> ParamType {
        self.param_type
    }

    pub fn value(&self) -> &ParamValue {
        &self.value
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn options(&self) -> &[ParamOption] {
        &self.options
    }

    /// Returns true if `value` satisfies at least one declared option.
    ///
    /// A parameter with no declared options accepts any value of its type.
    pub fn accepts(&self, value: &ParamValue) -> bool {
        if value.param_type() != self.param_type {
            return false;
        }
        if self.options.is_empty() {
            return true;
        }
        self.options.iter().any(|o| o.allows(value))
    }
}

/// A named, versioned, ordered set of parameters describing how a carrier
/// type should be configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    name: String,
    version: u32,
    preset_name: String,
    parameters: Vec<Parameter>,
}

impl AlgorithmConfig {
    /// Creates an empty config for the named algorithm.
    pub fn new(name: &str, version: u32) -> Self {
        Self {
            name: name.to_string(),
            version,
            preset_name: String::new(),
            parameters: Vec::new(),
        }
    }

    /// Sets the preset name this config was derived from.
    pub fn with_preset_name(mut self, preset_name: &str) -> Self {
        self.preset_name = preset_name.to_string();
        self
    }

    /// Appends a parameter, rejecting case-insensitive duplicates.
    pub fn with_parameter(mut self, parameter: Parameter) -> Result<Self, ConfigError> {
        if self
            .parameters
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(&parameter.name))
        {
            return Err(ConfigError::DuplicateParameter(parameter.name));
        }
        self.parameters.push(parameter);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn preset_name(&self) -> &str {
        &self.preset_name
    }

    /// Parameters in declaration order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Looks up a parameter case-insensitively.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Assigns a new value to a parameter.
    ///
    /// The assignment is validated against the parameter's type and option
    /// set first; on rejection the config is left unmodified and the error
    /// identifies the parameter and the rejected value.
    pub fn set_value(&mut self, name: &str, value: ParamValue) -> Result<(), ConfigError> {
        let index = self
            .parameters
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;

        let parameter = &self.parameters[index];
        if value.param_type() != parameter.param_type {
            return Err(ConfigError::TypeMismatch {
                parameter: parameter.name.clone(),
                expected: parameter.param_type,
                got: value.param_type(),
            });
        }
        if !parameter.accepts(&value) {
            return Err(ConfigError::ValueRejected {
                parameter: parameter.name.clone(),
                value,
            });
        }

        self.parameters[index].value = value;
        Ok(())
    }

    /// Enables or disables a parameter. Required parameters cannot be
    /// disabled.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), ConfigError> {
        let index = self
            .parameters
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;

        if !enabled && !self.parameters[index].optional {
            return Err(ConfigError::RequiredParameter(
                self.parameters[index].name.clone(),
            ));
        }

        self.parameters[index].enabled = enabled;
        Ok(())
    }

    /// Fetches an Int parameter value.
    pub fn int_param(&self, name: &str) -> Result<i32, ConfigError> {
        let parameter = self
            .get(name)
            .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;
        parameter
            .value
            .as_int()
            .ok_or_else(|| ConfigError::TypeMismatch {
                parameter: parameter.name.clone(),
                expected: ParamType::Int,
                got: parameter.value.param_type(),
            })
    }

    /// Fetches a Long parameter value.
    pub fn long_param(&self, name: &str) -> Result<i64, ConfigError> {
        let parameter = self
            .get(name)
            .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;
        parameter
            .value
            .as_long()
            .ok_or_else(|| ConfigError::TypeMismatch {
                parameter: parameter.name.clone(),
                expected: ParamType::Long,
                got: parameter.value.param_type(),
            })
    }

    /// Fetches a Bool parameter value.
    pub fn bool_param(&self, name: &str) -> Result<bool, ConfigError> {
        let parameter = self
            .get(name)
            .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;
        parameter
            .value
            .as_bool()
            .ok_or_else(|| ConfigError::TypeMismatch {
                parameter: parameter.name.clone(),
                expected: ParamType::Bool,
                got: parameter.value.param_type(),
            })
    }

    /// Fetches a String parameter value.
    pub fn str_param(&self, name: &str) -> Result<&str, ConfigError> {
        let parameter = self
            .get(name)
            .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;
        parameter
            .value
            .as_str()
            .ok_or_else(|| ConfigError::TypeMismatch {
                parameter: parameter.name.clone(),
                expected: ParamType::String,
                got: parameter.value.param_type(),
            })
    }

    /// Fetches a File parameter value.
    pub fn file_param(&self, name: &str) -> Result<&PathBuf, ConfigError> {
        let parameter = self
            .get(name)
            .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;
        parameter
            .value
            .as_file()
            .ok_or_else(|| ConfigError::TypeMismatch {
                parameter: parameter.name.clone(),
                expected: ParamType::File,
                got: parameter.value.param_type(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> AlgorithmConfig {
        AlgorithmConfig::new("direct-channel", 1)
            .with_parameter(
                Parameter::new(
                    "width",
                    ParamValue::Int(256),
                    "Carrier image width in pixels",
                )
                .with_option(ParamOption::Range { min: 1, max: 16384 }),
            )
            .unwrap()
            .with_parameter(
                Parameter::new(
                    "encoding",
                    ParamValue::String("base64".into()),
                    "Output text encoding",
                )
                .with_option(ParamOption::Literal(ParamValue::String("base64".into())))
                .with_option(ParamOption::Literal(ParamValue::String("hex".into()))),
            )
            .unwrap()
            .with_parameter(
                Parameter::new("secure", ParamValue::Bool(true), "Key-bind the body").optional(),
            )
            .unwrap()
    }

    #[test]
    fn test_set_value_in_range() {
        let mut config = sample_config();
        config.set_value("width", ParamValue::Int(512)).unwrap();
        assert_eq!(config.int_param("width").unwrap(), 512);
    }

    #[test]
    fn test_set_value_out_of_range_leaves_config_unmodified() {
        let mut config = sample_config();
        let result = config.set_value("width", ParamValue::Int(0));

        assert!(matches!(result, Err(ConfigError::ValueRejected { .. })));
        assert_eq!(config.int_param("width").unwrap(), 256);
    }

    #[test]
    fn test_set_value_rejects_foreign_literal() {
        let mut config = sample_config();
        let result = config.set_value("encoding", ParamValue::String("rot13".into()));

        assert!(matches!(result, Err(ConfigError::ValueRejected { .. })));
        assert_eq!(config.str_param("encoding").unwrap(), "base64");
    }

    #[test]
    fn test_set_value_type_mismatch() {
        let mut config = sample_config();
        let result = config.set_value("width", ParamValue::Bool(false));
        assert!(matches!(result, Err(ConfigError::TypeMismatch { .. })));
    }

    #[test]
    fn test_parameter_names_case_insensitive() {
        let mut config = sample_config();
        config.set_value("WIDTH", ParamValue::Int(128)).unwrap();
        assert_eq!(config.int_param("Width").unwrap(), 128);
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let result = sample_config().with_parameter(Parameter::new(
            "Width",
            ParamValue::Int(1),
            "duplicate under case folding",
        ));
        assert!(matches!(result, Err(ConfigError::DuplicateParameter(_))));
    }

    #[test]
    fn test_required_parameter_cannot_be_disabled() {
        let mut config = sample_config();
        let result = config.set_enabled("width", false);
        assert!(matches!(result, Err(ConfigError::RequiredParameter(_))));
        assert!(config.get("width").unwrap().is_enabled());
    }

    #[test]
    fn test_optional_parameter_can_be_disabled() {
        let mut config = sample_config();
        config.set_enabled("secure", false).unwrap();
        assert!(!config.get("secure").unwrap().is_enabled());
    }

    #[test]
    fn test_error_names_parameter_and_value() {
        let mut config = sample_config();
        let err = config
            .set_value("width", ParamValue::Int(99999))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("width"));
        assert!(message.contains("99999"));
    }
}
