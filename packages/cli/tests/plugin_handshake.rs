//! The machina binary doubles as a driver plugin server

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use machina_core::drivers::{DriverError, DriverOptions, FlagValue};
use machina_core::plugin::{DriverFactory, PluginFactory, TransportError};
use machina_core::{Driver, State};
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_machina");

#[test]
fn plugin_mode_announces_socket_on_stdout() {
    let mut child = Command::new(BIN)
        .env("PLUGIN_MODE", "1")
        .env("PLUGIN_DRIVER_NAME", "none")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut line = String::new();
    BufReader::new(child.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    child.kill().unwrap();
    child.wait().unwrap();

    let addr = line.trim().strip_prefix("MACHINA_PLUGIN_ADDR=").unwrap();
    assert!(addr.ends_with(".sock"), "unexpected handshake: {line}");
}

#[test]
fn unknown_driver_exits_with_message() {
    let output = Command::new(BIN)
        .env("PLUGIN_MODE", "1")
        .env("PLUGIN_DRIVER_NAME", "virtualbox")
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unsupported driver: virtualbox"));
}

#[test]
fn driver_calls_cross_the_process_boundary() {
    let temp = TempDir::new().unwrap();
    let factory = PluginFactory::new(BIN);
    let mut driver = factory.new_driver("none", "ext", temp.path()).unwrap();

    assert_eq!(driver.driver_name(), "none");
    assert_eq!(driver.machine_name(), "ext");

    let mut options = DriverOptions::new();
    options.set("url", FlagValue::String("tcp://10.0.0.5:2376".to_string()));
    driver.set_config_from_flags(&options).unwrap();

    assert_eq!(driver.get_url().unwrap(), "tcp://10.0.0.5:2376");
    assert_eq!(driver.get_state().unwrap(), State::Running);
    assert!(matches!(
        driver.start(),
        Err(DriverError::NotSupported { .. })
    ));

    let raw = driver.to_raw().unwrap();
    assert_eq!(raw["url"], "tcp://10.0.0.5:2376");
}

#[test]
fn unknown_driver_is_a_transport_error() {
    let temp = TempDir::new().unwrap();
    let factory = PluginFactory::new(BIN);
    let err = factory
        .new_driver("virtualbox", "vm1", temp.path())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        DriverError::Transport(TransportError::UnknownDriver(ref name)) if name == "virtualbox"
    ));
}

fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[test]
fn dropping_the_driver_stops_the_plugin() {
    let temp = TempDir::new().unwrap();
    let driver = PluginFactory::new(BIN)
        .spawn_driver("none", "ext", temp.path())
        .unwrap();
    let pid = driver.plugin_pid().unwrap();
    assert!(pid_alive(pid));

    drop(driver);

    assert!(!pid_alive(pid), "plugin {pid} outlived its driver");
}

#[test]
fn killed_plugin_stays_connection_lost() {
    let temp = TempDir::new().unwrap();
    let driver = PluginFactory::new(BIN)
        .spawn_driver("none", "ext", temp.path())
        .unwrap();
    assert_eq!(driver.get_state().unwrap(), State::Running);

    let pid = driver.plugin_pid().unwrap();
    let status = Command::new("kill")
        .args(["-KILL", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    for _ in 0..2 {
        let err = driver.get_url().unwrap_err();
        assert!(
            matches!(err, DriverError::Transport(TransportError::ConnectionLost(_))),
            "unexpected error: {err}"
        );
    }
}
