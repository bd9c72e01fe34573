//! Bundle run configuration.
//!
//! Every bundle carries a `bundlerun.toml` at its top level describing how
//! the engine should run it:
//!
//! ```toml
//! name = "demo"
//! cmd = ["python", "main.py"]       # or a single string
//! entrypoint = "/bin/sh -c"         # optional, same shape as cmd
//!
//! [volumes]
//! "data.txt" = "/data.txt"          # shorthand: bind read-write
//! cache = { bind = "/cache", mode = "ro" }
//! ```
//!
//! Parsing goes through a `toml::Value` tree so every failure can name the
//! offending key. Volume shorthand is normalized during parsing, so a parsed
//! [`BundleConfig`] always holds fully expanded [`VolumeSpec`]s and
//! [`BundleConfig::dumps`] is the structural inverse of [`BundleConfig::parse`].

use crate::constants::MAX_CONFIG_SIZE;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use toml::Value;

// =============================================================================
// Commands
// =============================================================================

/// A `cmd` or `entrypoint` value: one string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    /// Single string, split into words when handed to the engine.
    Shell(String),
    /// Explicit argument vector.
    Exec(Vec<String>),
}

impl CommandSpec {
    /// Returns the argument vector for this command.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Shell(line) => split_words(line),
            Self::Exec(args) => args.clone(),
        }
    }

    fn from_value(key: &str, value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::Shell(s.clone())),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    item.as_str()
                        .map(String::from)
                        .ok_or_else(|| Error::InvalidType {
                            key: format!("{}[{}]", key, i),
                            expected: "a string (all values in the array must be strings)"
                                .to_string(),
                        })
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::Exec),
            _ => Err(Error::InvalidType {
                key: key.to_string(),
                expected: "a string or an array of strings".to_string(),
            }),
        }
    }
}

impl From<&str> for CommandSpec {
    fn from(s: &str) -> Self {
        Self::Shell(s.to_string())
    }
}

impl From<Vec<String>> for CommandSpec {
    fn from(args: Vec<String>) -> Self {
        Self::Exec(args)
    }
}

/// Splits a command line into words, honoring single quotes, double quotes
/// and backslash escapes.
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => match chars.next() {
                Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if in_word {
        words.push(current);
    }
    words
}

// =============================================================================
// Volumes
// =============================================================================

/// Mount mode of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeMode {
    /// Read-write (`rw`).
    #[serde(rename = "rw")]
    ReadWrite,
    /// Read-only (`ro`).
    #[serde(rename = "ro")]
    ReadOnly,
}

impl VolumeMode {
    /// Returns the config spelling (`rw` / `ro`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadWrite => "rw",
            Self::ReadOnly => "ro",
        }
    }

    /// Parses `rw` / `ro`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rw" => Some(Self::ReadWrite),
            "ro" => Some(Self::ReadOnly),
            _ => None,
        }
    }
}

impl fmt::Display for VolumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized volume entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Absolute path inside the container.
    pub bind: String,
    /// Mount mode.
    pub mode: VolumeMode,
}

impl VolumeSpec {
    /// Read-write volume bound at `bind` (the shorthand expansion).
    pub fn new(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            mode: VolumeMode::ReadWrite,
        }
    }

    /// Read-only volume bound at `bind`.
    pub fn read_only(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            mode: VolumeMode::ReadOnly,
        }
    }

    /// Parses and normalizes one `volumes` entry.
    ///
    /// Checks run in a fixed order: `bind` present, `bind` is a string,
    /// `mode` present, `mode` is `rw`/`ro`, then no extra keys.
    fn from_value(key: &str, value: &Value) -> Result<Self> {
        let context = format!("volumes entry '{}'", key);

        let table = match value {
            Value::String(bind) => return Ok(Self::new(bind.clone())),
            Value::Table(table) => table,
            _ => {
                return Err(Error::InvalidType {
                    key: format!("volumes.{}", key),
                    expected: "a string or a table".to_string(),
                });
            }
        };

        let bind = table.get("bind").ok_or_else(|| Error::MissingKey {
            key: "bind".to_string(),
            context: context.clone(),
        })?;
        let bind = bind.as_str().ok_or_else(|| Error::InvalidType {
            key: format!("volumes.{}.bind", key),
            expected: "a string".to_string(),
        })?;

        let mode = table.get("mode").ok_or_else(|| Error::MissingKey {
            key: "mode".to_string(),
            context: context.clone(),
        })?;
        let mode = mode
            .as_str()
            .and_then(VolumeMode::parse)
            .ok_or_else(|| Error::InvalidValue {
                key: format!("volumes.{}.mode", key),
                value: display_value(mode),
                reason: "expected 'rw' or 'ro'".to_string(),
            })?;

        if let Some(extra) = table.keys().find(|k| *k != "bind" && *k != "mode") {
            return Err(Error::InvalidKey {
                key: extra.clone(),
                context,
            });
        }

        Ok(Self {
            bind: bind.to_string(),
            mode,
        })
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// Bundle Configuration
// =============================================================================

/// Validated, normalized run configuration of a bundle.
///
/// Values are immutable; the `with_*` helpers return modified copies.
/// There is no `Deserialize` impl: every instance goes through
/// [`BundleConfig::from_value`] validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleConfig {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cmd: Option<CommandSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entrypoint: Option<CommandSpec>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<String, VolumeSpec>,
}

impl BundleConfig {
    /// Creates a config with only a name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            cmd: None,
            entrypoint: None,
            volumes: BTreeMap::new(),
        })
    }

    /// Parses TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        if text.len() as u64 > MAX_CONFIG_SIZE {
            return Err(Error::ConfigParse(format!(
                "config size {} exceeds limit of {} bytes",
                text.len(),
                MAX_CONFIG_SIZE
            )));
        }
        let doc: Value = text
            .parse::<toml::Table>()
            .map(Value::Table)
            .map_err(|e| Error::ConfigParse(e.to_string()))?;
        Self::from_value(&doc)
    }

    /// Reads and parses TOML from `reader`.
    pub fn load(reader: impl Read) -> Result<Self> {
        let mut text = String::new();
        reader.take(MAX_CONFIG_SIZE + 1).read_to_string(&mut text)?;
        Self::parse(&text)
    }

    /// Builds a config from an already-parsed TOML document.
    ///
    /// Unknown top-level keys are ignored.
    pub fn from_value(doc: &Value) -> Result<Self> {
        let table = doc.as_table().ok_or_else(|| Error::InvalidType {
            key: "bundle config".to_string(),
            expected: "a table".to_string(),
        })?;

        let name = table.get("name").ok_or_else(|| Error::MissingKey {
            key: "name".to_string(),
            context: "bundle config".to_string(),
        })?;
        let name = coerce_name(name)?;
        validate_name(&name)?;

        let cmd = table
            .get("cmd")
            .map(|v| CommandSpec::from_value("cmd", v))
            .transpose()?;

        let entrypoint = table
            .get("entrypoint")
            .map(|v| CommandSpec::from_value("entrypoint", v))
            .transpose()?;

        let volumes = match table.get("volumes") {
            None => BTreeMap::new(),
            Some(Value::Table(entries)) => entries
                .iter()
                .map(|(k, v)| VolumeSpec::from_value(k, v).map(|spec| (k.clone(), spec)))
                .collect::<Result<BTreeMap<_, _>>>()?,
            Some(_) => {
                return Err(Error::InvalidType {
                    key: "volumes".to_string(),
                    expected: "a table".to_string(),
                });
            }
        };

        Ok(Self {
            name,
            cmd,
            entrypoint,
            volumes,
        })
    }

    /// Serializes to TOML text.
    pub fn dumps(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Serializes to TOML and writes it to `writer`.
    pub fn dump(&self, mut writer: impl Write) -> Result<()> {
        writer.write_all(self.dumps()?.as_bytes())?;
        Ok(())
    }

    /// Bundle name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command passed to the engine, if any.
    pub fn cmd(&self) -> Option<&CommandSpec> {
        self.cmd.as_ref()
    }

    /// Entrypoint passed to the engine, if any.
    pub fn entrypoint(&self) -> Option<&CommandSpec> {
        self.entrypoint.as_ref()
    }

    /// Normalized volume entries keyed by bundle-relative path or volume name.
    pub fn volumes(&self) -> &BTreeMap<String, VolumeSpec> {
        &self.volumes
    }

    /// Returns a copy with `cmd` replaced.
    pub fn with_cmd(&self, cmd: Option<CommandSpec>) -> Self {
        Self {
            cmd,
            ..self.clone()
        }
    }

    /// Returns a copy with `entrypoint` replaced.
    pub fn with_entrypoint(&self, entrypoint: Option<CommandSpec>) -> Self {
        Self {
            entrypoint,
            ..self.clone()
        }
    }

    /// Returns a copy with one volume entry added or replaced.
    pub fn with_volume(&self, key: impl Into<String>, spec: VolumeSpec) -> Self {
        let mut volumes = self.volumes.clone();
        volumes.insert(key.into(), spec);
        Self {
            volumes,
            ..self.clone()
        }
    }
}

/// Coerces scalar TOML values to the name string.
fn coerce_name(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Datetime(d) => Ok(d.to_string()),
        Value::Array(_) | Value::Table(_) => Err(Error::InvalidType {
            key: "name".to_string(),
            expected: "a string".to_string(),
        }),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidValue {
            key: "name".to_string(),
            value: name.to_string(),
            reason: "name cannot be empty".to_string(),
        });
    }
    Ok(())
}
