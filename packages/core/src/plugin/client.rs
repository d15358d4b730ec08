//! Parent side of the plugin channel
//!
//! [`PluginProcess`] starts a driver server and reads its handshake;
//! [`RpcDriver`] is the [`Driver`] proxy that forwards each call over the
//! socket. Once the channel fails, the proxy stays failed: every later call
//! returns the same connection-lost error.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use super::protocol::{Request, Response};
use super::{HANDSHAKE_PREFIX, PLUGIN_DRIVER_VAR, PLUGIN_MODE_VAR, TransportError};
use crate::drivers::{Driver, DriverError, DriverOptions, Flag};
use crate::state::State;

const STDERR_TAIL_LINES: usize = 20;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// A running plugin child; killed and reaped on drop
pub struct PluginProcess {
    driver_name: String,
    child: Child,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_thread: Option<JoinHandle<()>>,
}

impl PluginProcess {
    /// Start `executable` in plugin mode for `driver_name` and wait for its
    /// socket address
    pub fn spawn(
        executable: &Path,
        driver_name: &str,
        handshake_timeout: Duration,
    ) -> Result<(Self, PathBuf), TransportError> {
        tracing::debug!("Launching plugin server for driver {}", driver_name);
        let mut child = Command::new(executable)
            .env(PLUGIN_MODE_VAR, "1")
            .env(PLUGIN_DRIVER_VAR, driver_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Spawn {
                driver: driver_name.to_string(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));

        let stderr_thread = stderr.map(|stderr| {
            let tail = stderr_tail.clone();
            let driver = driver_name.to_string();
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    tracing::debug!("({}) {}", driver, line);
                    let mut tail = tail.lock().unwrap_or_else(|p| p.into_inner());
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        let mut process = Self {
            driver_name: driver_name.to_string(),
            child,
            stderr_tail,
            stderr_thread,
        };

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = stdout {
            std::thread::spawn(move || {
                let mut sent = false;
                for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                    match line.strip_prefix(HANDSHAKE_PREFIX) {
                        Some(addr) if !sent => {
                            sent = tx.send(PathBuf::from(addr.trim())).is_ok();
                        }
                        _ => tracing::debug!("plugin stdout: {}", line),
                    }
                }
            });
        }

        match rx.recv_timeout(handshake_timeout) {
            Ok(addr) => {
                tracing::debug!("Plugin for {} is at {}", driver_name, addr.display());
                Ok((process, addr))
            }
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Handshake(format!(
                "driver {driver_name} did not announce an address within {}s",
                handshake_timeout.as_secs()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(process.exited_early()),
        }
    }

    /// Classify a child that closed stdout without a handshake
    fn exited_early(&mut self) -> TransportError {
        let status = self.child.wait();
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        let output = self.stderr_output();

        if output.contains("Unsupported driver") {
            return TransportError::UnknownDriver(self.driver_name.clone());
        }
        let status = match status {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        };
        TransportError::Handshake(format!("plugin exited ({status}): {output}"))
    }

    /// Last lines the plugin wrote to stderr, joined with spaces
    pub fn stderr_output(&self) -> String {
        let tail = self.stderr_tail.lock().unwrap_or_else(|p| p.into_inner());
        tail.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for PluginProcess {
    fn drop(&mut self) {
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                tracing::debug!("Stopping plugin server for {}", self.driver_name);
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
        }
    }
}

struct Connection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    lost: Option<String>,
}

impl Connection {
    fn open(socket_path: &Path) -> Result<Self, TransportError> {
        let writer = UnixStream::connect(socket_path).map_err(|e| {
            TransportError::Handshake(format!("cannot connect to {}: {e}", socket_path.display()))
        })?;
        let reader = writer
            .try_clone()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            lost: None,
        })
    }

    fn call(&mut self, request: &Request) -> Result<Response, TransportError> {
        if let Some(reason) = &self.lost {
            return Err(TransportError::ConnectionLost(reason.clone()));
        }
        let result = self.exchange(request);
        if let Err(TransportError::ConnectionLost(reason)) = &result {
            self.lost = Some(reason.clone());
        }
        result
    }

    fn exchange(&mut self, request: &Request) -> Result<Response, TransportError> {
        let mut frame =
            serde_json::to_string(request).map_err(|e| TransportError::Protocol(e.to_string()))?;
        frame.push('\n');
        self.writer
            .write_all(frame.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
        if read == 0 {
            return Err(TransportError::ConnectionLost(
                "plugin closed the connection".to_string(),
            ));
        }
        serde_json::from_str(&line).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

/// [`Driver`] proxy for a driver living in a plugin process
pub struct RpcDriver {
    driver_name: String,
    machine_name: String,
    conn: Mutex<Connection>,
    process: Option<PluginProcess>,
}

impl RpcDriver {
    /// Connect to a plugin socket and initialise its driver for one machine
    pub fn connect(
        socket_path: &Path,
        driver_name: &str,
        machine_name: &str,
        store_path: &Path,
    ) -> Result<Self, TransportError> {
        let driver = Self {
            driver_name: driver_name.to_string(),
            machine_name: machine_name.to_string(),
            conn: Mutex::new(Connection::open(socket_path)?),
            process: None,
        };
        let init = Request::Init {
            machine_name: machine_name.to_string(),
            store_path: store_path.to_string_lossy().to_string(),
        };
        let response = driver.lock().call(&init)?;
        match response {
            Response::Unit => Ok(driver),
            Response::Err { message, .. } => Err(TransportError::Handshake(message)),
            other => Err(unexpected(&init, &other)),
        }
    }

    /// Tie the plugin child's lifetime to this proxy
    pub fn with_process(mut self, process: PluginProcess) -> Self {
        self.process = Some(process);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn call(&self, request: Request) -> Result<Response, DriverError> {
        let response = self.lock().call(&request).map_err(|e| self.with_stderr(e))?;
        match response {
            Response::Err { message, kind } => {
                Err(Response::into_driver_error(message, kind, request.method()))
            }
            other => Ok(other),
        }
    }

    /// Attach what the plugin printed before dying to a connection-lost error
    fn with_stderr(&self, err: TransportError) -> TransportError {
        match (err, &self.process) {
            (TransportError::ConnectionLost(reason), Some(process)) => {
                let output = process.stderr_output();
                if output.is_empty() || reason.contains(&output) {
                    TransportError::ConnectionLost(reason)
                } else {
                    TransportError::ConnectionLost(format!("{reason}: {output}"))
                }
            }
            (err, _) => err,
        }
    }

    fn call_unit(&self, request: Request) -> Result<(), DriverError> {
        match self.call(request.clone())? {
            Response::Unit => Ok(()),
            other => Err(unexpected(&request, &other).into()),
        }
    }

    fn call_text(&self, request: Request) -> Result<String, DriverError> {
        match self.call(request.clone())? {
            Response::Text(text) => Ok(text),
            other => Err(unexpected(&request, &other).into()),
        }
    }
}

fn unexpected(request: &Request, response: &Response) -> TransportError {
    TransportError::Protocol(format!(
        "unexpected reply to {}: {:?}",
        request.method(),
        response
    ))
}

impl Driver for RpcDriver {
    fn driver_name(&self) -> String {
        self.driver_name.clone()
    }

    fn plugin_pid(&self) -> Option<u32> {
        self.process.as_ref().map(PluginProcess::id)
    }

    fn machine_name(&self) -> String {
        self.machine_name.clone()
    }

    fn create_flags(&self) -> Vec<Flag> {
        match self.call(Request::CreateFlags) {
            Ok(Response::Flags(flags)) => flags,
            Ok(other) => {
                tracing::warn!("{}", unexpected(&Request::CreateFlags, &other));
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Could not get flags for driver {}: {}", self.driver_name, e);
                Vec::new()
            }
        }
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> Result<(), DriverError> {
        self.call_unit(Request::SetConfigFromFlags {
            options: options.clone(),
        })
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        self.call_text(Request::GetIp)
    }

    fn get_url(&self) -> Result<String, DriverError> {
        self.call_text(Request::GetUrl)
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        self.call_text(Request::GetSshHostname)
    }

    fn get_ssh_port(&self) -> Result<u16, DriverError> {
        match self.call(Request::GetSshPort)? {
            Response::Port(port) => Ok(port),
            other => Err(unexpected(&Request::GetSshPort, &other).into()),
        }
    }

    fn get_ssh_username(&self) -> String {
        self.call_text(Request::GetSshUsername).unwrap_or_else(|e| {
            tracing::warn!("Could not get SSH username: {}", e);
            String::new()
        })
    }

    fn get_ssh_key_path(&self) -> String {
        self.call_text(Request::GetSshKeyPath).unwrap_or_else(|e| {
            tracing::warn!("Could not get SSH key path: {}", e);
            String::new()
        })
    }

    fn get_state(&self) -> Result<State, DriverError> {
        match self.call(Request::GetState)? {
            Response::State(state) => Ok(state),
            other => Err(unexpected(&Request::GetState, &other).into()),
        }
    }

    fn pre_create_check(&self) -> Result<(), DriverError> {
        self.call_unit(Request::PreCreateCheck)
    }

    fn create(&mut self) -> Result<(), DriverError> {
        self.call_unit(Request::Create)
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.call_unit(Request::Start)
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.call_unit(Request::Stop)
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        self.call_unit(Request::Kill)
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        self.call_unit(Request::Remove)
    }

    fn restart(&mut self) -> Result<(), DriverError> {
        self.call_unit(Request::Restart)
    }

    fn to_raw(&self) -> Result<serde_json::Value, DriverError> {
        match self.call(Request::GetConfigRaw)? {
            Response::Raw(raw) => Ok(raw),
            other => Err(unexpected(&Request::GetConfigRaw, &other).into()),
        }
    }

    fn load_raw(&mut self, raw: &serde_json::Value) -> Result<(), DriverError> {
        self.call_unit(Request::SetConfigRaw { raw: raw.clone() })
    }
}

impl Drop for RpcDriver {
    /// Ask the server to stop; the child itself is killed when `process` drops
    fn drop(&mut self) {
        let mut conn = self.lock();
        if conn.lost.is_some() {
            return;
        }
        let _ = conn.reader.get_ref().set_read_timeout(Some(CLOSE_TIMEOUT));
        if let Err(e) = conn.call(&Request::Close) {
            tracing::debug!("Plugin close failed: {}", e);
        }
    }
}
