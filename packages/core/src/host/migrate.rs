//! On-disk host record versions
//!
//! Records are upgraded one version at a time on the generic JSON form, so a
//! step only touches the fields that changed at its boundary and the driver
//! payload passes through undecoded.
//!
//! - v1: `auth_options` and `engine_options` at the top level; a record
//!   without `config_version` is v1.
//! - v2: both moved under `host_options` as `auth` and `engine`.
//! - v3: `host_options.engine.labels` is a list of `key=value` strings
//!   instead of a map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::HostOptions;
use super::error::HostError;
use crate::version::CONFIG_VERSION;

/// A host as stored, with the driver payload left undecoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub config_version: u32,
    #[serde(default)]
    pub name: String,
    pub driver_name: String,
    #[serde(default)]
    pub driver: Value,
    #[serde(default)]
    pub host_options: HostOptions,
    /// Fields this version does not know about, written back unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const FIRST_VERSION: u32 = 1;

/// Bring a stored record up to [`CONFIG_VERSION`]
///
/// Returns the record and whether any migration step ran. `name` is the
/// store's name for the record and fills in a missing `name` field.
pub fn migrate_record(name: &str, data: Value) -> Result<(HostRecord, bool), HostError> {
    let Value::Object(mut fields) = data else {
        return Err(load_failed(name, "record is not a JSON object"));
    };

    let version = match fields.get("config_version") {
        None | Some(Value::Null) => FIRST_VERSION,
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| load_failed(name, format!("invalid config_version {value}")))?,
    };

    if version > CONFIG_VERSION {
        return Err(HostError::ConfigFromFuture {
            name: name.to_string(),
            version,
        });
    }

    let migrated = version < CONFIG_VERSION;
    for from in version..CONFIG_VERSION {
        tracing::debug!("Migrating host {} to config v{}", name, from + 1);
        match from {
            1 => v1_to_v2(&mut fields),
            2 => v2_to_v3(name, &mut fields)?,
            _ => {}
        }
        fields.insert("config_version".to_string(), Value::from(from + 1));
    }

    let mut record: HostRecord = serde_json::from_value(Value::Object(fields))
        .map_err(|e| load_failed(name, e.to_string()))?;
    if record.name.is_empty() {
        record.name = name.to_string();
    }
    Ok((record, migrated))
}

fn v1_to_v2(fields: &mut Map<String, Value>) {
    let mut options = match fields.remove("host_options") {
        Some(Value::Object(options)) => options,
        _ => Map::new(),
    };
    if let Some(auth) = fields.remove("auth_options") {
        options.insert("auth".to_string(), auth);
    }
    if let Some(engine) = fields.remove("engine_options") {
        options.insert("engine".to_string(), engine);
    }
    if !options.is_empty() {
        fields.insert("host_options".to_string(), Value::Object(options));
    }
}

fn v2_to_v3(name: &str, fields: &mut Map<String, Value>) -> Result<(), HostError> {
    let Some(labels) = fields
        .get_mut("host_options")
        .and_then(|options| options.get_mut("engine"))
        .and_then(|engine| engine.get_mut("labels"))
    else {
        return Ok(());
    };

    if let Value::Object(map) = labels {
        let list = map
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => Ok(Value::String(format!("{key}={s}"))),
                Value::Number(_) | Value::Bool(_) => Ok(Value::String(format!("{key}={value}"))),
                other => Err(load_failed(
                    name,
                    format!("label {key:?} has a non-scalar value {other}"),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        *labels = Value::Array(list);
    }
    Ok(())
}

fn load_failed(name: &str, message: impl Into<String>) -> HostError {
    HostError::LoadFailed {
        name: name.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_the_future_is_refused() {
        let data = json!({
            "config_version": CONFIG_VERSION + 1,
            "name": "default",
            "driver_name": "qemu",
            "driver": {"machine_name": "default"}
        });
        let err = migrate_record("default", data).unwrap_err();
        assert!(matches!(
            err,
            HostError::ConfigFromFuture { ref name, version } if name == "default" && version == CONFIG_VERSION + 1
        ));
    }

    #[test]
    fn test_current_record_round_trips() {
        let record = HostRecord {
            config_version: CONFIG_VERSION,
            name: "vm1".to_string(),
            driver_name: "qemu".to_string(),
            driver: json!({"machine_name": "vm1", "cpus": 2, "future_field": [1, 2]}),
            host_options: HostOptions::default(),
            extra: Map::new(),
        };
        let mut data = serde_json::to_value(&record).unwrap();
        data["annotation"] = json!("kept");

        let (loaded, migrated) = migrate_record("vm1", data.clone()).unwrap();
        assert!(!migrated);
        assert_eq!(loaded.driver, record.driver);
        assert_eq!(loaded.extra.get("annotation"), Some(&json!("kept")));
        assert_eq!(serde_json::to_value(&loaded).unwrap(), data);
    }

    #[test]
    fn test_v1_record_is_migrated() {
        let data = json!({
            "name": "old",
            "driver_name": "generic",
            "driver": {"machine_name": "old", "ip_address": "10.0.0.9", "unknown": true},
            "engine_options": {"labels": {"env": "prod"}, "storage_driver": "overlay"}
        });

        let (record, migrated) = migrate_record("old", data).unwrap();
        assert!(migrated);
        assert_eq!(record.config_version, CONFIG_VERSION);
        assert_eq!(record.host_options.engine.labels, vec!["env=prod"]);
        assert_eq!(record.host_options.engine.storage_driver, "overlay");
        assert_eq!(record.driver["unknown"], json!(true));
        assert!(!record.extra.contains_key("engine_options"));
    }

    #[test]
    fn test_v2_labels_become_list() {
        let data = json!({
            "config_version": 2,
            "driver_name": "none",
            "host_options": {"engine": {"labels": {"a": "1", "b": 2}}}
        });
        let (record, migrated) = migrate_record("vm2", data).unwrap();
        assert!(migrated);
        assert_eq!(record.name, "vm2");
        assert_eq!(record.host_options.engine.labels, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_v2_list_labels_left_alone() {
        let data = json!({
            "config_version": 2,
            "name": "vm3",
            "driver_name": "none",
            "host_options": {"engine": {"labels": ["a=1"]}}
        });
        let (record, _) = migrate_record("vm3", data).unwrap();
        assert_eq!(record.host_options.engine.labels, vec!["a=1"]);
    }

    #[test]
    fn test_malformed_records() {
        assert!(matches!(
            migrate_record("x", json!([1, 2])),
            Err(HostError::LoadFailed { .. })
        ));
        assert!(matches!(
            migrate_record("x", json!({"config_version": "three", "driver_name": "none"})),
            Err(HostError::LoadFailed { .. })
        ));
        assert!(matches!(
            migrate_record("x", json!({"config_version": CONFIG_VERSION})),
            Err(HostError::LoadFailed { .. })
        ));
    }
}
