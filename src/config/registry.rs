//! Built-in algorithm presets.
//!
//! The registry is an explicit value passed at startup, not process-wide
//! static state. Callers clone a preset and customize the clone; the
//! registry's own copies stay pristine.

use super::{AlgorithmConfig, ConfigError, ParamOption, ParamValue, Parameter};

/// Algorithm name: one payload byte per color channel of a fresh image.
pub const DIRECT_CHANNEL: &str = "direct-channel";

/// Algorithm name: difference-based embedding into pre-existing images.
pub const STEALTH: &str = "stealth";

/// Algorithm name: ASCII-safe text block output.
pub const TEXT_BLOCK: &str = "text-block";

/// Algorithm name: flat byte block with no output transform.
pub const RAW_BLOCK: &str = "raw-block";

/// Lookup of algorithm-name to default config.
#[derive(Debug, Clone)]
pub struct AlgorithmRegistry {
    presets: Vec<AlgorithmConfig>,
}

impl AlgorithmRegistry {
    /// The registry of built-in carrier algorithms.
    pub fn builtin() -> Self {
        Self {
            presets: vec![
                direct_channel_preset(),
                stealth_preset(),
                text_block_preset(),
                raw_block_preset(),
            ],
        }
    }

    /// Returns a fresh clone of the named algorithm's default config.
    pub fn default_config(&self, name: &str) -> Result<AlgorithmConfig, ConfigError> {
        self.presets
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownAlgorithm(name.to_string()))
    }

    /// The registered algorithm names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.presets.iter().map(|p| p.name()).collect()
    }
}

fn direct_channel_preset() -> AlgorithmConfig {
    AlgorithmConfig::new(DIRECT_CHANNEL, 1)
        .with_preset_name("default")
        .with_parameter(
            Parameter::new("width", ParamValue::Int(256), "Carrier image width in pixels")
                .with_option(ParamOption::Range { min: 1, max: 16384 }),
        )
        .and_then(|c| {
            c.with_parameter(
                Parameter::new(
                    "height",
                    ParamValue::Int(256),
                    "Carrier image height in pixels",
                )
                .with_option(ParamOption::Range { min: 1, max: 16384 }),
            )
        })
        .and_then(|c| {
            c.with_parameter(
                Parameter::new(
                    "secure",
                    ParamValue::Bool(true),
                    "Reseed the body from the key after the header",
                )
                .optional(),
            )
        })
        .expect("builtin preset is well-formed")
}

fn stealth_preset() -> AlgorithmConfig {
    AlgorithmConfig::new(STEALTH, 1)
        .with_preset_name("default")
        .with_parameter(
            Parameter::new(
                "pattern",
                ParamValue::String("checkerboard".into()),
                "Masking pattern that classifies data-bearing cells",
            )
            .with_option(ParamOption::Literal(ParamValue::String(
                "checkerboard".into(),
            )))
            .with_option(ParamOption::Literal(ParamValue::String("stride3".into()))),
        )
        .and_then(|c| {
            c.with_parameter(Parameter::new(
                "pool",
                ParamValue::File("carriers".into()),
                "Directory of clean input images, one consumed per carrier",
            ))
        })
        .and_then(|c| {
            c.with_parameter(
                Parameter::new(
                    "secure",
                    ParamValue::Bool(true),
                    "Reseed the body from the key after the header",
                )
                .optional(),
            )
        })
        .expect("builtin preset is well-formed")
}

fn text_block_preset() -> AlgorithmConfig {
    AlgorithmConfig::new(TEXT_BLOCK, 1)
        .with_preset_name("default")
        .with_parameter(
            Parameter::new("size", ParamValue::Int(4096), "Block capacity in bytes")
                .with_option(ParamOption::Range {
                    min: 1,
                    max: 64 * 1024 * 1024,
                }),
        )
        .and_then(|c| {
            c.with_parameter(
                Parameter::new(
                    "encoding",
                    ParamValue::String("base64".into()),
                    "ASCII-safe output encoding",
                )
                .with_option(ParamOption::Literal(ParamValue::String("base64".into())))
                .with_option(ParamOption::Literal(ParamValue::String("hex".into()))),
            )
        })
        .and_then(|c| {
            c.with_parameter(
                Parameter::new(
                    "secure",
                    ParamValue::Bool(true),
                    "Reseed the body from the key after the header",
                )
                .optional(),
            )
        })
        .expect("builtin preset is well-formed")
}

fn raw_block_preset() -> AlgorithmConfig {
    AlgorithmConfig::new(RAW_BLOCK, 1)
        .with_preset_name("default")
        .with_parameter(
            Parameter::new("size", ParamValue::Int(4096), "Block capacity in bytes")
                .with_option(ParamOption::Range {
                    min: 1,
                    max: 64 * 1024 * 1024,
                }),
        )
        .and_then(|c| {
            c.with_parameter(
                Parameter::new(
                    "secure",
                    ParamValue::Bool(true),
                    "Reseed the body from the key after the header",
                )
                .optional(),
            )
        })
        .expect("builtin preset is well-formed")
}
