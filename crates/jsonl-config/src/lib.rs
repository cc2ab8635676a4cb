// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for jsonlines stream stages.
//!
//! This crate provides [`StageConfig`], the queuing settings for both sides of
//! a stage plus a log filter, together with helpers for loading from TOML
//! files, applying `JSONL_*` environment overrides, merging overlays, and
//! producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// An environment override holds a value of the wrong shape.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Which side of a stage a queuing setting applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The writable (input) side.
    Input,
    /// The readable (output) side.
    Output,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Input => f.write_str("input"),
            Side::Output => f.write_str("output"),
        }
    }
}

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A high-water mark of zero: every chunk waits for a matching pull.
    ZeroHighWaterMark {
        /// Affected side.
        side: Side,
    },
    /// A high-water mark above the advisory threshold.
    LargeHighWaterMark {
        /// Affected side.
        side: Side,
        /// Configured value.
        value: usize,
    },
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::ZeroHighWaterMark { side } => {
                write!(f, "{side} high_water_mark is 0; writes wait for every pull")
            }
            ConfigWarning::LargeHighWaterMark { side, value } => {
                write!(f, "{side} high_water_mark is large ({value})")
            }
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// How the cost of a single chunk is measured.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SizeStrategy {
    /// Every chunk costs 1.
    #[default]
    Count,
    /// A chunk costs its length in bytes.
    ByteLength,
}

impl std::str::FromStr for SizeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Self::Count),
            "byte_length" => Ok(Self::ByteLength),
            other => Err(format!("unknown size strategy '{other}'")),
        }
    }
}

/// Queuing settings for one side of a stage.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct QueuingConfig {
    /// Buffered size at which backpressure is signalled. Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_water_mark: Option<usize>,

    /// Chunk cost function. Defaults to [`SizeStrategy::Count`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<SizeStrategy>,
}

impl QueuingConfig {
    /// Configured high-water mark, or the default of one chunk.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark.unwrap_or(DEFAULT_HIGH_WATER_MARK)
    }

    /// Configured strategy, or [`SizeStrategy::Count`].
    pub fn strategy(&self) -> SizeStrategy {
        self.strategy.unwrap_or_default()
    }
}

/// Top-level configuration for a generator-driven stage.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct StageConfig {
    /// Log filter directive (e.g. `"debug"`, `"jsonl.stream=trace"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Queuing for the writable (input) side.
    #[serde(default)]
    pub input: QueuingConfig,

    /// Queuing for the readable (output) side.
    #[serde(default)]
    pub output: QueuingConfig,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".into()),
            input: QueuingConfig::default(),
            output: QueuingConfig::default(),
        }
    }
}

impl StageConfig {
    /// Filter directive for a `tracing-subscriber` `EnvFilter`.
    pub fn log_directive(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Queuing settings for `side`.
    pub fn side(&self, side: Side) -> &QueuingConfig {
        match side {
            Side::Input => &self.input,
            Side::Output => &self.output,
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// High-water mark used when none is configured.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1;

/// Maximum high-water mark for [`SizeStrategy::Count`].
const MAX_COUNT_HIGH_WATER_MARK: usize = 65_536;

/// Maximum high-water mark for [`SizeStrategy::ByteLength`] (64 MiB).
const MAX_BYTE_HIGH_WATER_MARK: usize = 64 * 1024 * 1024;

/// Count threshold above which a warning is produced.
const LARGE_COUNT_THRESHOLD: usize = 1_024;

/// Byte threshold above which a warning is produced (1 MiB).
const LARGE_BYTE_THRESHOLD: usize = 1024 * 1024;

/// Recognised plain log levels. Anything containing `=` or `,` is treated as
/// a full filter directive and passed through.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace", "off"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`StageConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`StageConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<StageConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => StageConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Parse a TOML string into a [`StageConfig`].
pub fn parse_toml(content: &str) -> Result<StageConfig, ConfigError> {
    toml::from_str::<StageConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply overrides from the process environment.
///
/// Recognised variables:
/// - `JSONL_LOG_LEVEL`
/// - `JSONL_INPUT_HIGH_WATER_MARK`
/// - `JSONL_INPUT_STRATEGY`
/// - `JSONL_OUTPUT_HIGH_WATER_MARK`
/// - `JSONL_OUTPUT_STRATEGY`
pub fn apply_env_overrides(config: &mut StageConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, |var| std::env::var(var).ok())
}

/// Apply overrides using `lookup` in place of the process environment.
pub fn apply_overrides_from<F>(config: &mut StageConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("JSONL_LOG_LEVEL") {
        config.log_level = Some(val);
    }
    override_side(&mut config.input, "INPUT", &lookup)?;
    override_side(&mut config.output, "OUTPUT", &lookup)?;
    Ok(())
}

fn override_side<F>(side: &mut QueuingConfig, prefix: &str, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let hwm_var = format!("JSONL_{prefix}_HIGH_WATER_MARK");
    if let Some(val) = lookup(&hwm_var) {
        let hwm = val
            .trim()
            .parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnv {
                var: hwm_var.clone(),
                reason: e.to_string(),
            })?;
        side.high_water_mark = Some(hwm);
    }
    let strategy_var = format!("JSONL_{prefix}_STRATEGY");
    if let Some(val) = lookup(&strategy_var) {
        let strategy = val
            .trim()
            .parse::<SizeStrategy>()
            .map_err(|reason| ConfigError::InvalidEnv {
                var: strategy_var.clone(),
                reason,
            })?;
        side.strategy = Some(strategy);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (unknown log levels, out-of-range high-water marks) are
/// returned as a [`ConfigError::ValidationError`]; soft issues come back as
/// warnings.
pub fn validate_config(config: &StageConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    match config.log_level {
        Some(ref level) => {
            let is_directive = level.contains('=') || level.contains(',');
            if !is_directive && !VALID_LOG_LEVELS.contains(&level.as_str()) {
                errors.push(format!("invalid log_level '{level}'"));
            }
        }
        None => warnings.push(ConfigWarning::MissingOptionalField {
            field: "log_level".into(),
            hint: "the default filter 'info' will be used".into(),
        }),
    }

    for side in [Side::Input, Side::Output] {
        let queuing = config.side(side);
        let hwm = queuing.high_water_mark();
        let (max, large) = match queuing.strategy() {
            SizeStrategy::Count => (MAX_COUNT_HIGH_WATER_MARK, LARGE_COUNT_THRESHOLD),
            SizeStrategy::ByteLength => (MAX_BYTE_HIGH_WATER_MARK, LARGE_BYTE_THRESHOLD),
        };
        if hwm > max {
            errors.push(format!(
                "{side} high_water_mark {hwm} out of range (0..={max})"
            ));
        } else if hwm > large {
            warnings.push(ConfigWarning::LargeHighWaterMark { side, value: hwm });
        } else if hwm == 0 {
            warnings.push(ConfigWarning::ZeroHighWaterMark { side });
        }
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// JSON Schema describing the TOML layout of [`StageConfig`].
pub fn config_schema() -> schemars::Schema {
    schemars::schema_for!(StageConfig)
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations.  Values in `overlay` take precedence over `base`.
pub fn merge_configs(base: StageConfig, overlay: StageConfig) -> StageConfig {
    StageConfig {
        log_level: overlay.log_level.or(base.log_level),
        input: merge_queuing(base.input, overlay.input),
        output: merge_queuing(base.output, overlay.output),
    }
}

fn merge_queuing(base: QueuingConfig, overlay: QueuingConfig) -> QueuingConfig {
    QueuingConfig {
        high_water_mark: overlay.high_water_mark.or(base.high_water_mark),
        strategy: overlay.strategy.or(base.strategy),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn default_config_is_valid_without_warnings() {
        let warnings = validate_config(&StageConfig::default()).unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn default_config_uses_one_chunk() {
        let cfg = StageConfig::default();
        assert_eq!(cfg.input.high_water_mark(), 1);
        assert_eq!(cfg.output.strategy(), SizeStrategy::Count);
        assert_eq!(cfg.log_directive(), "info");
    }

    #[test]
    fn parse_full_toml() {
        let cfg = parse_toml(
            r#"
            log_level = "debug"

            [input]
            high_water_mark = 16

            [output]
            high_water_mark = 4096
            strategy = "byte_length"
        "#,
        )
        .unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.input.high_water_mark(), 16);
        assert_eq!(cfg.input.strategy(), SizeStrategy::Count);
        assert_eq!(cfg.output.high_water_mark(), 4096);
        assert_eq!(cfg.output.strategy(), SizeStrategy::ByteLength);
    }

    #[test]
    fn parse_empty_toml_leaves_sides_unset() {
        let cfg = parse_toml("").unwrap();
        assert_eq!(cfg.log_level, None);
        assert_eq!(cfg.input, QueuingConfig::default());
    }

    #[test]
    fn parse_unknown_strategy_is_parse_error() {
        let err = parse_toml("[input]\nstrategy = \"weight\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn parse_negative_high_water_mark_is_parse_error() {
        let err = parse_toml("[output]\nhigh_water_mark = -1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_rejects_unknown_log_level() {
        let cfg = StageConfig {
            log_level: Some("verbose".into()),
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_accepts_filter_directive() {
        let cfg = StageConfig {
            log_level: Some("warn,jsonl.stream=trace".into()),
            ..Default::default()
        };
        assert!(validate_config(&cfg).unwrap().is_empty());
    }

    #[test]
    fn validation_rejects_huge_count_high_water_mark() {
        let mut cfg = StageConfig::default();
        cfg.input.high_water_mark = Some(MAX_COUNT_HIGH_WATER_MARK + 1);
        match validate_config(&cfg).unwrap_err() {
            ConfigError::ValidationError { reasons } => {
                assert_eq!(reasons.len(), 1);
                assert!(reasons[0].starts_with("input high_water_mark"));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn byte_strategy_allows_larger_marks() {
        let mut cfg = StageConfig::default();
        cfg.output.high_water_mark = Some(MAX_COUNT_HIGH_WATER_MARK + 1);
        cfg.output.strategy = Some(SizeStrategy::ByteLength);
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn zero_and_large_marks_warn() {
        let mut cfg = StageConfig::default();
        cfg.input.high_water_mark = Some(0);
        cfg.output.high_water_mark = Some(LARGE_COUNT_THRESHOLD + 1);
        let warnings = validate_config(&cfg).unwrap();
        assert_eq!(
            warnings,
            vec![
                ConfigWarning::ZeroHighWaterMark { side: Side::Input },
                ConfigWarning::LargeHighWaterMark {
                    side: Side::Output,
                    value: LARGE_COUNT_THRESHOLD + 1,
                },
            ]
        );
    }

    #[test]
    fn missing_log_level_warns() {
        let cfg = StageConfig {
            log_level: None,
            ..Default::default()
        };
        let warnings = validate_config(&cfg).unwrap();
        assert!(matches!(
            warnings.as_slice(),
            [ConfigWarning::MissingOptionalField { field, .. }] if field == "log_level"
        ));
    }

    #[test]
    fn env_overrides_apply_per_side() {
        let mut cfg = StageConfig::default();
        apply_overrides_from(
            &mut cfg,
            env(&[
                ("JSONL_LOG_LEVEL", "trace"),
                ("JSONL_INPUT_HIGH_WATER_MARK", "8"),
                ("JSONL_OUTPUT_STRATEGY", "byte_length"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("trace"));
        assert_eq!(cfg.input.high_water_mark, Some(8));
        assert_eq!(cfg.input.strategy, None);
        assert_eq!(cfg.output.strategy, Some(SizeStrategy::ByteLength));
    }

    #[test]
    fn env_override_rejects_non_numeric_mark() {
        let mut cfg = StageConfig::default();
        let err = apply_overrides_from(&mut cfg, env(&[("JSONL_OUTPUT_HIGH_WATER_MARK", "lots")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidEnv { var, .. } => assert_eq!(var, "JSONL_OUTPUT_HIGH_WATER_MARK"),
            other => panic!("expected InvalidEnv, got {other:?}"),
        }
    }

    #[test]
    fn merge_overlay_wins_per_field() {
        let base = parse_toml("log_level = \"warn\"\n[input]\nhigh_water_mark = 4").unwrap();
        let overlay = parse_toml("[input]\nstrategy = \"byte_length\"").unwrap();
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.log_level.as_deref(), Some("warn"));
        assert_eq!(merged.input.high_water_mark, Some(4));
        assert_eq!(merged.input.strategy, Some(SizeStrategy::ByteLength));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nhigh_water_mark = 32").unwrap();
        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.output.high_water_mark(), 32);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let err = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn schema_lists_both_sides() {
        let schema = serde_json::to_value(config_schema()).unwrap();
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("input"));
        assert!(props.contains_key("output"));
        assert!(props.contains_key("log_level"));
    }

    #[test]
    fn warning_display() {
        let w = ConfigWarning::ZeroHighWaterMark { side: Side::Output };
        assert_eq!(
            w.to_string(),
            "output high_water_mark is 0; writes wait for every pull"
        );
    }
}
