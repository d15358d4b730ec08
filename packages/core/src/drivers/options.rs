//! Driver flag descriptors and the option bag drivers are configured from

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::environment::Environment;

/// A flag value as supplied on the command line or by defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    String(String),
    StringSlice(Vec<String>),
}

/// Describes one option a driver accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub name: String,
    pub usage: String,
    pub default: FlagValue,
    /// Environment variable consulted when the flag is not given explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl Flag {
    pub fn string(name: &str, usage: &str, default: &str) -> Self {
        Self::new(name, usage, FlagValue::String(default.to_string()))
    }

    pub fn int(name: &str, usage: &str, default: i64) -> Self {
        Self::new(name, usage, FlagValue::Int(default))
    }

    pub fn bool(name: &str, usage: &str) -> Self {
        Self::new(name, usage, FlagValue::Bool(false))
    }

    pub fn string_slice(name: &str, usage: &str) -> Self {
        Self::new(name, usage, FlagValue::StringSlice(Vec::new()))
    }

    fn new(name: &str, usage: &str, default: FlagValue) -> Self {
        Self {
            name: name.to_string(),
            usage: usage.to_string(),
            default,
            env_var: None,
        }
    }

    pub fn with_env(mut self, var: &str) -> Self {
        self.env_var = Some(var.to_string());
        self
    }
}

/// Typed bag of flag values handed to `Driver::set_config_from_flags`
///
/// Missing keys read as the zero value of the requested type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverOptions {
    values: BTreeMap<String, FlagValue>,
}

impl DriverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every flag with its environment override or its default
    pub fn from_flags(flags: &[Flag], env: &dyn Environment) -> Self {
        let mut options = Self::new();
        for flag in flags {
            let from_env = flag
                .env_var
                .as_deref()
                .and_then(|var| env.var(var))
                .and_then(|raw| Self::coerce(&flag.default, &raw));
            options
                .values
                .insert(flag.name.clone(), from_env.unwrap_or_else(|| flag.default.clone()));
        }
        options
    }

    pub fn set(&mut self, name: &str, value: FlagValue) {
        self.values.insert(name.to_string(), value);
    }

    /// Set a flag from its textual `name=value` form, typed after the flag's
    /// default. String slices accumulate.
    pub fn set_from_str(&mut self, flag: &Flag, raw: &str) -> Result<(), String> {
        if let FlagValue::StringSlice(_) = flag.default {
            match self.values.get_mut(&flag.name) {
                Some(FlagValue::StringSlice(items)) => items.push(raw.to_string()),
                _ => self.set(&flag.name, FlagValue::StringSlice(vec![raw.to_string()])),
            }
            return Ok(());
        }
        let value = Self::coerce(&flag.default, raw)
            .ok_or_else(|| format!("invalid value '{raw}' for option '{}'", flag.name))?;
        self.set(&flag.name, value);
        Ok(())
    }

    fn coerce(like: &FlagValue, raw: &str) -> Option<FlagValue> {
        match like {
            FlagValue::Bool(_) => match raw.to_lowercase().as_str() {
                "" | "1" | "true" | "yes" => Some(FlagValue::Bool(true)),
                "0" | "false" | "no" => Some(FlagValue::Bool(false)),
                _ => None,
            },
            FlagValue::Int(_) => raw.trim().parse().ok().map(FlagValue::Int),
            FlagValue::String(_) => Some(FlagValue::String(raw.to_string())),
            FlagValue::StringSlice(_) => Some(FlagValue::StringSlice(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            )),
        }
    }

    pub fn string(&self, name: &str) -> String {
        match self.values.get(name) {
            Some(FlagValue::String(value)) => value.clone(),
            _ => String::new(),
        }
    }

    pub fn int(&self, name: &str) -> i64 {
        match self.values.get(name) {
            Some(FlagValue::Int(value)) => *value,
            _ => 0,
        }
    }

    pub fn bool(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(FlagValue::Bool(true)))
    }

    pub fn string_slice(&self, name: &str) -> Vec<String> {
        match self.values.get(name) {
            Some(FlagValue::StringSlice(values)) => values.clone(),
            _ => Vec::new(),
        }
    }
}
