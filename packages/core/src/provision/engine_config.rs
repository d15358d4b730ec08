//! Engine configuration templates
//!
//! One renderer per OS family. Each produces the file body and the remote
//! path it is uploaded to.

use std::fmt::Write;

use crate::auth::AuthOptions;
use crate::engine::EngineOptions;

/// Rendered engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub content: String,
    pub remote_path: String,
}

/// Engine labels plus `provider=<driver>`, unless a provider label is set
pub fn labels_with_provider(engine: &EngineOptions, driver_name: &str) -> Vec<String> {
    let mut labels = engine.labels.clone();
    if engine.label("provider").is_none() {
        labels.push(format!("provider={driver_name}"));
    }
    labels
}

/// `--label`, `--insecure-registry`, `--registry-mirror` and arbitrary flags
fn engine_flags(engine: &EngineOptions, labels: &[String]) -> Vec<String> {
    let mut flags = Vec::new();
    flags.extend(labels.iter().map(|l| format!("--label {l}")));
    flags.extend(
        engine
            .insecure_registry
            .iter()
            .map(|r| format!("--insecure-registry {r}")),
    );
    flags.extend(
        engine
            .registry_mirror
            .iter()
            .map(|m| format!("--registry-mirror {m}")),
    );
    flags.extend(engine.arbitrary_flags.iter().map(|f| format!("--{f}")));
    flags
}

fn env_exports(engine: &EngineOptions) -> String {
    engine
        .env
        .iter()
        .map(|e| format!("export {e:?}\n"))
        .collect()
}

/// `/var/lib/boot2podman/profile`, sourced by the boot2podman init scripts
pub(crate) fn render_boot2podman(
    dir: &str,
    auth: &AuthOptions,
    engine: &EngineOptions,
    labels: &[String],
) -> EngineConfig {
    let mut content = String::from("\nEXTRA_ARGS='\n");
    for flag in engine_flags(engine, labels) {
        let _ = writeln!(content, "{flag}");
    }
    content.push_str("'\n");
    let _ = writeln!(content, "CACERT={}", auth.ca_cert_remote_path);
    let _ = writeln!(content, "PODMAN_STORAGE={}", engine.storage_driver);
    content.push_str("PODMAN_TLS=auto\n");
    let _ = writeln!(content, "SERVERKEY={}", auth.server_key_remote_path);
    let _ = writeln!(content, "SERVERCERT={}", auth.server_cert_remote_path);
    content.push('\n');
    content.push_str(&env_exports(engine));

    EngineConfig {
        content,
        remote_path: format!("{dir}/profile"),
    }
}

/// Shell-style options file for systemd units on Debian-like systems
pub(crate) fn render_debian(
    options_file: &str,
    auth: &AuthOptions,
    engine: &EngineOptions,
    labels: &[String],
) -> EngineConfig {
    let mut content = String::from("\nENGINE_OPTS='\n");
    if !engine.storage_driver.is_empty() {
        let _ = writeln!(content, "--storage-driver {}", engine.storage_driver);
    }
    content.push_str("--tlsverify\n");
    let _ = writeln!(content, "--tlscacert {}", auth.ca_cert_remote_path);
    let _ = writeln!(content, "--tlscert {}", auth.server_cert_remote_path);
    let _ = writeln!(content, "--tlskey {}", auth.server_key_remote_path);
    for flag in engine_flags(engine, labels) {
        let _ = writeln!(content, "{flag}");
    }
    content.push_str("'\n");
    content.push_str(&env_exports(engine));

    EngineConfig {
        content,
        remote_path: options_file.to_string(),
    }
}

/// Single-line options plus an `Environment=` line for RedHat units
pub(crate) fn render_redhat(
    dir: &str,
    auth: &AuthOptions,
    engine: &EngineOptions,
    labels: &[String],
) -> EngineConfig {
    let mut options = Vec::new();
    if !engine.storage_driver.is_empty() {
        options.push(format!("--storage-driver {}", engine.storage_driver));
    }
    options.push("--tlsverify".to_string());
    options.push(format!("--tlscacert {}", auth.ca_cert_remote_path));
    options.push(format!("--tlscert {}", auth.server_cert_remote_path));
    options.push(format!("--tlskey {}", auth.server_key_remote_path));
    options.extend(engine_flags(engine, labels));

    let env: Vec<String> = engine.env.iter().map(|e| format!("{e:?}")).collect();
    let content = format!("{}\nEnvironment={}\n", options.join(" "), env.join(" "));

    EngineConfig {
        content,
        remote_path: format!("{dir}/profile"),
    }
}
