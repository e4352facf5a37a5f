//! Config persistence nodes.
//!
//! The persistence surface is a collaborator: an external layer stores
//! configs in whatever document format it likes. The core only converts
//! between [`AlgorithmConfig`] and a neutral, serde-serializable node tree
//! whose values are strings, matching the attribute-style documents the
//! collaborator produces.

use serde::{Deserialize, Serialize};

use super::{
    AlgorithmConfig, ConfigError, ParamOption, ParamType, ParamValue, Parameter,
};

/// A persisted algorithm config: `name`, `version`, `preset_name`
/// attributes plus nested parameter nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigNode {
    pub name: String,
    pub version: String,
    pub preset_name: String,
    pub parameters: Vec<ParameterNode>,
}

/// A persisted parameter with stringly-typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterNode {
    pub name: String,
    pub param_type: String,
    pub value: String,
    pub optional: bool,
    pub enabled: bool,
    pub description: String,
    pub options: Vec<OptionNode>,
}

/// A persisted parameter option: either a literal value or a numeric
/// range with inclusive bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionNode {
    Literal { value: String },
    Range { min: String, max: String },
    DecimalRange { min: String, max: String },
}

impl AlgorithmConfig {
    /// Reconstructs a config from its persisted node.
    pub fn from_node(node: &ConfigNode) -> Result<Self, ConfigError> {
        let version: u32 = node
            .version
            .parse()
            .map_err(|_| ConfigError::MalformedNode(format!("bad version '{}'", node.version)))?;

        let mut config =
            AlgorithmConfig::new(&node.name, version).with_preset_name(&node.preset_name);

        for pnode in &node.parameters {
            let param_type = ParamType::from_name(&pnode.param_type).ok_or_else(|| {
                ConfigError::MalformedNode(format!(
                    "parameter '{}' has unknown type '{}'",
                    pnode.name, pnode.param_type
                ))
            })?;

            let value = parse_value(param_type, &pnode.value).ok_or_else(|| {
                ConfigError::MalformedNode(format!(
                    "parameter '{}' has unparseable {} value '{}'",
                    pnode.name, pnode.param_type, pnode.value
                ))
            })?;

            let mut parameter = Parameter::new(&pnode.name, value, &pnode.description);
            if pnode.optional {
                parameter = parameter.optional();
            }
            for onode in &pnode.options {
                parameter = parameter.with_option(parse_option(param_type, onode)?);
            }

            config = config.with_parameter(parameter)?;
            if !pnode.enabled {
                config.set_enabled(&pnode.name, false)?;
            }
        }

        Ok(config)
    }

    /// Serializes this config to its persisted node.
    pub fn to_node(&self) -> ConfigNode {
        ConfigNode {
            name: self.name().to_string(),
            version: self.version().to_string(),
            preset_name: self.preset_name().to_string(),
            parameters: self
                .parameters()
                .iter()
                .map(|p| ParameterNode {
                    name: p.name().to_string(),
                    param_type: p.param_type().name().to_string(),
                    value: render_value(p.value()),
                    optional: p.is_optional(),
                    enabled: p.is_enabled(),
                    description: p.description().to_string(),
                    options: p.options().iter().map(render_option).collect(),
                })
                .collect(),
        }
    }
}

fn parse_value(param_type: ParamType, raw: &str) -> Option<ParamValue> {
    match param_type {
        ParamType::String => Some(ParamValue::String(raw.to_string())),
        ParamType::Int => raw.parse().ok().map(ParamValue::Int),
        ParamType::Long => raw.parse().ok().map(ParamValue::Long),
        ParamType::Bool => raw.parse().ok().map(ParamValue::Bool),
        ParamType::Decimal => raw.parse().ok().map(ParamValue::Decimal),
        ParamType::File => Some(ParamValue::File(raw.into())),
    }
}

fn render_value(value: &ParamValue) -> String {
    match value {
        ParamValue::String(s) => s.clone(),
        ParamValue::Int(v) => v.to_string(),
        ParamValue::Long(v) => v.to_string(),
        ParamValue::Bool(v) => v.to_string(),
        ParamValue::Decimal(v) => v.to_string(),
        ParamValue::File(p) => p.display().to_string(),
    }
}

fn parse_option(param_type: ParamType, node: &OptionNode) -> Result<ParamOption, ConfigError> {
    match node {
        OptionNode::Literal { value } => {
            let value = parse_value(param_type, value).ok_or_else(|| {
                ConfigError::MalformedNode(format!("unparseable option literal '{value}'"))
            })?;
            Ok(ParamOption::Literal(value))
        }
        OptionNode::Range { min, max } => {
            let min = min.parse().map_err(|_| {
                ConfigError::MalformedNode(format!("bad range bound '{min}'"))
            })?;
            let max = max.parse().map_err(|_| {
                ConfigError::MalformedNode(format!("bad range bound '{max}'"))
            })?;
            Ok(ParamOption::Range { min, max })
        }
        OptionNode::DecimalRange { min, max } => {
            let min = min.parse().map_err(|_| {
                ConfigError::MalformedNode(format!("bad range bound '{min}'"))
            })?;
            let max = max.parse().map_err(|_| {
                ConfigError::MalformedNode(format!("bad range bound '{max}'"))
            })?;
            Ok(ParamOption::DecimalRange { min, max })
        }
    }
}

fn render_option(option: &ParamOption) -> OptionNode {
    match option {
        ParamOption::Literal(value) => OptionNode::Literal {
            value: render_value(value),
        },
        ParamOption::Range { min, max } => OptionNode::Range {
            min: min.to_string(),
            max: max.to_string(),
        },
        ParamOption::DecimalRange { min, max } => OptionNode::DecimalRange {
            min: min.to_string(),
            max: max.to_string(),
        },
    }
}
