//! `--filter key=value` handling for listings

use std::collections::HashMap;

use regex::Regex;

use super::ListError;
use crate::host::Host;

/// Parsed filters; values of one key are ORed, different keys are ANDed
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub driver_name: Vec<String>,
    pub state: Vec<String>,
    pub name: Vec<Regex>,
    pub labels: Vec<String>,
}

impl FilterOptions {
    pub fn is_empty(&self) -> bool {
        self.driver_name.is_empty()
            && self.state.is_empty()
            && self.name.is_empty()
            && self.labels.is_empty()
    }

    /// State filters query the driver, so hosts must be decoded first
    pub fn needs_state(&self) -> bool {
        !self.state.is_empty()
    }

    pub fn matches(&self, host: &Host) -> bool {
        matches_driver_name(host, &self.driver_name)
            && matches_state(host, &self.state)
            && matches_name(host, &self.name)
            && matches_label(host, &self.labels)
    }
}

/// Parse `key=value` strings; keys are case-insensitive, values keep any
/// further `=`
pub fn parse_filters(filters: &[String]) -> Result<FilterOptions, ListError> {
    let mut options = FilterOptions::default();
    for filter in filters {
        let (key, value) = filter
            .split_once('=')
            .ok_or_else(|| ListError::FilterSyntax(filter.clone()))?;

        match key.to_lowercase().as_str() {
            "driver" => options.driver_name.push(value.to_string()),
            "state" => options.state.push(value.to_string()),
            "name" => {
                let pattern = Regex::new(value).map_err(|e| ListError::InvalidNamePattern {
                    pattern: value.to_string(),
                    message: e.to_string(),
                })?;
                options.name.push(pattern);
            }
            "label" => options.labels.push(value.to_string()),
            other => return Err(ListError::UnsupportedFilterKey(other.to_string())),
        }
    }
    Ok(options)
}

pub fn filter_hosts(hosts: Vec<Host>, filters: &FilterOptions) -> Vec<Host> {
    if filters.is_empty() {
        return hosts;
    }
    hosts.into_iter().filter(|h| filters.matches(h)).collect()
}

fn matches_driver_name(host: &Host, driver_names: &[String]) -> bool {
    driver_names.is_empty()
        || driver_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&host.driver_name))
}

fn matches_state(host: &Host, states: &[String]) -> bool {
    if states.is_empty() {
        return true;
    }
    let state = host.state().unwrap_or_else(|e| {
        tracing::warn!("{}", e);
        Default::default()
    });
    states
        .iter()
        .any(|s| s.eq_ignore_ascii_case(state.as_str()))
}

fn matches_name(host: &Host, names: &[Regex]) -> bool {
    names.is_empty() || names.iter().any(|r| r.is_match(&host.name))
}

fn matches_label(host: &Host, labels: &[String]) -> bool {
    if labels.is_empty() {
        return true;
    }

    let engine_labels: HashMap<&str, &str> = host
        .host_options
        .engine
        .labels
        .iter()
        .map(|l| l.split_once('=').unwrap_or((l.as_str(), "")))
        .collect();

    labels.iter().any(|l| {
        let (key, value) = l.split_once('=').unwrap_or((l.as_str(), ""));
        engine_labels
            .get(key)
            .is_some_and(|v| v.eq_ignore_ascii_case(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fake::FakeDriver;
    use crate::host::HostOptions;
    use crate::state::State;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn host(name: &str, state: State, labels: &[&str]) -> Host {
        let mut options = HostOptions::default();
        options.engine.labels = strings(labels);
        Host::new(
            name,
            Box::new(FakeDriver::new(name).with_state(state)),
            options,
        )
    }

    fn names(hosts: &[Host]) -> Vec<&str> {
        hosts.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn test_parse_filters() {
        let options = parse_filters(&strings(&[
            "DRIVER=qemu",
            "state=Running",
            "name=^dev",
            "label=env=prod",
            "driver=none",
        ]))
        .unwrap();
        assert_eq!(options.driver_name, vec!["qemu", "none"]);
        assert_eq!(options.state, vec!["Running"]);
        assert_eq!(options.name[0].as_str(), "^dev");
        assert_eq!(options.labels, vec!["env=prod"]);
    }

    #[test]
    fn test_parse_filters_errors() {
        assert!(matches!(
            parse_filters(&strings(&["driver"])),
            Err(ListError::FilterSyntax(_))
        ));
        assert!(matches!(
            parse_filters(&strings(&["color=blue"])),
            Err(ListError::UnsupportedFilterKey(ref k)) if k == "color"
        ));
        assert!(matches!(
            parse_filters(&strings(&["name=("])),
            Err(ListError::InvalidNamePattern { .. })
        ));
    }

    #[test]
    fn test_no_filters_keeps_everything() {
        let hosts = vec![host("a", State::Running, &[]), host("b", State::Stopped, &[])];
        let kept = filter_hosts(hosts, &FilterOptions::default());
        assert_eq!(names(&kept), vec!["a", "b"]);
    }

    #[test]
    fn test_filter_by_state_and_name() {
        let hosts = vec![
            host("dev1", State::Running, &[]),
            host("dev2", State::Stopped, &[]),
            host("prod1", State::Running, &[]),
        ];
        let filters = parse_filters(&strings(&["state=running", "name=^dev"])).unwrap();
        assert_eq!(names(&filter_hosts(hosts, &filters)), vec!["dev1"]);
    }

    #[test]
    fn test_filter_by_driver_is_case_insensitive() {
        let hosts = vec![host("a", State::Running, &[])];
        let filters = parse_filters(&strings(&["driver=FAKE"])).unwrap();
        assert_eq!(filter_hosts(hosts, &filters).len(), 1);
    }

    #[test]
    fn test_filter_by_label() {
        let hosts = vec![
            host("a", State::Running, &["env=prod", "team=core"]),
            host("b", State::Running, &["env=dev"]),
            host("c", State::Running, &[]),
        ];
        let filters = parse_filters(&strings(&["label=env=PROD"])).unwrap();
        assert_eq!(names(&filter_hosts(hosts, &filters)), vec!["a"]);
    }
}
