//! Remote command channel
//!
//! Provisioning and certificate transfer only ever need "run this command and
//! give me stdout". [`SshCommander`] is that seam; [`ExternalSshClient`]
//! implements it with the system `ssh` binary.

#[cfg(test)]
pub(crate) mod fake;

use std::fs;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use thiserror::Error;

use crate::drivers::{Driver, DriverError};

/// Errors from running commands over SSH
#[derive(Error, Debug)]
pub enum SshError {
    /// Failed to spawn the ssh client
    #[error("Failed to spawn SSH: {0}")]
    Spawn(String),

    /// SSH could not reach or negotiate with the host
    #[error("SSH connection to {host} failed: {message}")]
    ConnectionFailed { host: String, message: String },

    /// Key rejected by the remote side
    #[error("SSH authentication failed for {user}@{host}")]
    AuthFailed { user: String, host: String },

    /// Remote command ran and exited non-zero
    #[error("Remote command `{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// ssh-keygen failed
    #[error("Failed to generate SSH key: {0}")]
    KeyGen(String),
}

/// Synchronous remote command execution
pub trait SshCommander: Send + Sync {
    /// Run `command` remotely and return its stdout
    fn run(&self, command: &str) -> Result<String, SshError>;
}

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub hostname: String,
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl SshTarget {
    pub fn from_driver(driver: &dyn Driver) -> Result<Self, DriverError> {
        let key = driver.get_ssh_key_path();
        Ok(Self {
            hostname: driver.get_ssh_hostname()?,
            port: driver.get_ssh_port()?,
            user: driver.get_ssh_username(),
            key_path: (!key.is_empty()).then(|| PathBuf::from(key)),
            connect_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// [`SshCommander`] backed by the OpenSSH client binary
#[derive(Debug, Clone)]
pub struct ExternalSshClient {
    target: SshTarget,
}

impl ExternalSshClient {
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }

    pub fn for_driver(driver: &dyn Driver) -> Result<Self, DriverError> {
        Ok(Self::new(SshTarget::from_driver(driver)?))
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Base `ssh` invocation for the target, without a remote command
    fn build_ssh_command(&self) -> Command {
        let target = &self.target;
        let mut cmd = Command::new("ssh");

        // Machines are recreated with fresh host keys, so don't pin them
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", target.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("LogLevel=quiet");

        cmd.arg("-p").arg(target.port.to_string());
        if let Some(key) = &target.key_path {
            cmd.arg("-o").arg("IdentitiesOnly=yes");
            cmd.arg("-i").arg(key);
        }

        cmd.arg(format!("{}@{}", target.user, target.hostname));
        cmd
    }
}

impl SshCommander for ExternalSshClient {
    fn run(&self, command: &str) -> Result<String, SshError> {
        let mut cmd = self.build_ssh_command();
        cmd.arg(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(
            "SSH {}@{}:{}: {}",
            self.target.user,
            self.target.hostname,
            self.target.port,
            summarize(command)
        );

        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SshError::Spawn("SSH not found. Install OpenSSH client.".to_string())
            } else {
                SshError::Spawn(e.to_string())
            }
        })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(255) if stderr.contains("Permission denied") => Err(SshError::AuthFailed {
                user: self.target.user.clone(),
                host: self.target.hostname.clone(),
            }),
            Some(255) | None => Err(SshError::ConnectionFailed {
                host: self.target.hostname.clone(),
                message: stderr,
            }),
            Some(code) => Err(SshError::CommandFailed {
                command: summarize(command),
                exit_code: code,
                stderr,
            }),
        }
    }
}

/// Opens a command channel to the machine behind a driver
pub trait SshConnector: Send + Sync {
    fn connect(&self, driver: &dyn Driver) -> Result<Box<dyn SshCommander>, DriverError>;
}

/// [`SshConnector`] handing out [`ExternalSshClient`]s
#[derive(Debug, Clone, Copy)]
pub struct ExternalConnector {
    pub connect_timeout: Duration,
}

impl Default for ExternalConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SshConnector for ExternalConnector {
    fn connect(&self, driver: &dyn Driver) -> Result<Box<dyn SshCommander>, DriverError> {
        let target = SshTarget::from_driver(driver)?.with_connect_timeout(self.connect_timeout);
        Ok(Box::new(ExternalSshClient::new(target)))
    }
}

/// First line of a command, clipped, for logs and error messages
fn summarize(command: &str) -> String {
    let first = command.lines().next().unwrap_or_default();
    let clipped: String = first.chars().take(120).collect();
    if clipped.len() < command.len() {
        format!("{clipped}...")
    } else {
        clipped
    }
}

/// Quote `value` for a POSIX shell as one single-quoted word
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Run one command on the machine behind `driver`
pub fn run_ssh_command_from_driver(driver: &dyn Driver, command: &str) -> Result<String, DriverError> {
    let client = ExternalSshClient::for_driver(driver)?;
    Ok(client.run(command)?)
}

/// Block until the machine accepts SSH logins
///
/// Retries with a fixed delay, forever when `attempts` is `None`. This only
/// runs right after a VM was created or started. A driver without SSH
/// support fails immediately.
pub fn wait_for_ssh(
    driver: &dyn Driver,
    interval: Duration,
    attempts: Option<u32>,
) -> Result<(), DriverError> {
    wait_for_ssh_with(driver, interval, attempts, probe_ssh)
}

fn wait_for_ssh_with<F>(
    driver: &dyn Driver,
    interval: Duration,
    attempts: Option<u32>,
    mut probe: F,
) -> Result<(), DriverError>
where
    F: FnMut(&dyn Driver) -> Result<(), DriverError>,
{
    tracing::info!("Waiting for SSH to be available...");
    let mut tried = 0u32;
    loop {
        let err = match probe(driver) {
            Ok(()) => {
                tracing::debug!("SSH is available on {}", driver.machine_name());
                return Ok(());
            }
            Err(e @ DriverError::NotSupported { .. }) => return Err(e),
            Err(e) => e,
        };
        tried += 1;
        if attempts.is_some_and(|max| tried >= max) {
            return Err(DriverError::Command(format!(
                "Too many retries waiting for SSH to be available. Last error: {err}"
            )));
        }
        tracing::debug!("SSH not ready: {}", err);
        std::thread::sleep(interval);
    }
}

fn probe_ssh(driver: &dyn Driver) -> Result<(), DriverError> {
    let target = SshTarget::from_driver(driver)?;
    let addr = (target.hostname.as_str(), target.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| DriverError::Command(format!("cannot resolve {}", target.hostname)))?;
    TcpStream::connect_timeout(&addr, target.connect_timeout)?;
    ExternalSshClient::new(target).run("exit 0")?;
    Ok(())
}

/// Create an RSA key pair at `path` (and `path.pub`) unless one exists
pub fn generate_ssh_key(path: &Path) -> Result<(), SshError> {
    if path.exists() {
        tracing::debug!("SSH key already present at {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SshError::KeyGen(e.to_string()))?;
    }
    let output = Command::new("ssh-keygen")
        .args(["-t", "rsa", "-b", "2048", "-N", "", "-q", "-f"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SshError::KeyGen(e.to_string()))?;
    if !output.status.success() {
        return Err(SshError::KeyGen(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fake::FakeDriver;

    fn target() -> SshTarget {
        SshTarget {
            hostname: "10.0.0.9".to_string(),
            port: 2222,
            user: "core".to_string(),
            key_path: Some(PathBuf::from("/keys/id_rsa")),
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_build_ssh_command_args() {
        let client = ExternalSshClient::new(target());
        let cmd = client.build_ssh_command();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/keys/id_rsa"));
        assert_eq!(args.last().unwrap(), "core@10.0.0.9");
    }

    #[test]
    fn test_build_ssh_command_without_key() {
        let mut target = target();
        target.key_path = None;
        let client = ExternalSshClient::new(target);
        let args: Vec<String> = client
            .build_ssh_command()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn test_target_from_driver() {
        let driver = FakeDriver::new("vm1").with_ip("192.168.64.3");
        let target = SshTarget::from_driver(&driver).unwrap();
        assert_eq!(target.hostname, "192.168.64.3");
        assert_eq!(target.port, 22);
        assert_eq!(target.user, "root");
        assert_eq!(target.key_path, None);
    }

    #[test]
    fn test_wait_for_ssh_gives_up_after_attempts() {
        let driver = FakeDriver::new("vm1");
        let mut probes = 0;
        let err = wait_for_ssh_with(&driver, Duration::from_millis(1), Some(3), |_| {
            probes += 1;
            Err(DriverError::Command("connection refused".to_string()))
        })
        .unwrap_err();
        assert_eq!(probes, 3);
        assert!(err.to_string().contains("Too many retries"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_wait_for_ssh_unbounded_retries_until_ready() {
        let driver = FakeDriver::new("vm1");
        let mut probes = 0;
        wait_for_ssh_with(&driver, Duration::from_millis(1), None, |_| {
            probes += 1;
            if probes < 5 {
                Err(DriverError::Command("connection refused".to_string()))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(probes, 5);
    }

    #[test]
    fn test_wait_for_ssh_stops_on_unsupported() {
        let driver = FakeDriver::new("vm1");
        let err = wait_for_ssh_with(&driver, Duration::from_millis(1), None, |_| {
            Err(DriverError::not_supported("none", "ssh"))
        })
        .unwrap_err();
        assert!(matches!(err, DriverError::NotSupported { .. }));
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_summarize_clips_multiline() {
        assert_eq!(summarize("exit 0"), "exit 0");
        assert_eq!(summarize("printf '%s' 'line1\nline2'"), "printf '%s' 'line1...");
    }
}
