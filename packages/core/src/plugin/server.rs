//! Driver server mode
//!
//! A process started with the plugin environment variables binds a fresh
//! Unix socket, announces it on stdout, and serves exactly one client until
//! that client sends `Close` or disconnects. Driver calls block, so each runs
//! on the blocking pool while the connection task waits for it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use super::protocol::{Request, Response};
use super::{HANDSHAKE_PREFIX, TransportError};
use crate::drivers::{self, Driver, DriverError};

type DriverSlot = Arc<Mutex<Option<Box<dyn Driver>>>>;

/// How long a freshly started plugin waits for its parent to connect
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Listening side of one plugin session
pub struct PluginServer {
    driver_name: String,
    listener: UnixListener,
    socket_path: PathBuf,
}

impl PluginServer {
    /// Bind a socket in the temp directory for `driver_name`
    ///
    /// Fails with [`TransportError::UnknownDriver`] before binding anything
    /// when the driver is not compiled in.
    pub fn bind(driver_name: &str) -> Result<Self, TransportError> {
        let suffix: u32 = rand::rng().random();
        let socket_path = std::env::temp_dir().join(format!(
            "machina-plugin-{}-{:08x}.sock",
            std::process::id(),
            suffix
        ));
        Self::bind_at(driver_name, &socket_path)
    }

    pub fn bind_at(driver_name: &str, socket_path: &Path) -> Result<Self, TransportError> {
        if !drivers::BUILTIN_DRIVERS.contains(&driver_name) {
            return Err(TransportError::UnknownDriver(driver_name.to_string()));
        }
        let listener = UnixListener::bind(socket_path).map_err(|e| TransportError::Spawn {
            driver: driver_name.to_string(),
            message: format!("cannot bind {}: {e}", socket_path.display()),
        })?;
        tracing::debug!("Plugin for {} listening on {}", driver_name, socket_path.display());
        Ok(Self {
            driver_name: driver_name.to_string(),
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Line the parent waits for on our stdout
    pub fn handshake_line(&self) -> String {
        format!("{HANDSHAKE_PREFIX}{}", self.socket_path.display())
    }

    /// Accept one client and answer its requests until it is done
    pub async fn serve(self, accept_timeout: Duration) -> Result<(), TransportError> {
        let (stream, _) = tokio::time::timeout(accept_timeout, self.listener.accept())
            .await
            .map_err(|_| TransportError::Handshake("no client connected".to_string()))?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        tracing::debug!("Plugin client connected");

        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let slot: DriverSlot = Arc::new(Mutex::new(None));

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?
        {
            if line.trim().is_empty() {
                continue;
            }
            let (response, done) = match serde_json::from_str::<Request>(&line) {
                Ok(Request::Close) => (Response::Unit, true),
                Ok(request) => {
                    tracing::debug!("Plugin call: {}", request.method());
                    let slot = slot.clone();
                    let driver_name = self.driver_name.clone();
                    let response = tokio::task::spawn_blocking(move || {
                        dispatch(&driver_name, &slot, request)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Response::from_error(&DriverError::Command(format!(
                            "driver call panicked: {e}"
                        )))
                    });
                    (response, false)
                }
                Err(e) => (
                    Response::from_error(&DriverError::Decode(format!("bad request: {e}"))),
                    false,
                ),
            };

            let mut frame = serde_json::to_string(&response)
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
            frame.push('\n');
            write_half
                .write_all(frame.as_bytes())
                .await
                .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;

            if done {
                break;
            }
        }

        tracing::debug!("Plugin session for {} finished", self.driver_name);
        Ok(())
    }
}

impl Drop for PluginServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            tracing::debug!("Could not remove {}: {}", self.socket_path.display(), e);
        }
    }
}

/// Entry point for a process running in plugin mode
///
/// Prints the handshake line to stdout; everything else goes to the log.
pub async fn run(driver_name: &str, accept_timeout: Duration) -> Result<(), TransportError> {
    let server = PluginServer::bind(driver_name)?;

    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", server.handshake_line())
            .and_then(|_| stdout.flush())
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
    }

    server.serve(accept_timeout).await
}

fn lock(slot: &DriverSlot) -> MutexGuard<'_, Option<Box<dyn Driver>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn dispatch(driver_name: &str, slot: &DriverSlot, request: Request) -> Response {
    let mut guard = lock(slot);

    if let Request::Init {
        machine_name,
        store_path,
    } = request
    {
        return match drivers::new_builtin(driver_name, &machine_name, Path::new(&store_path)) {
            Some(driver) => {
                *guard = Some(driver);
                Response::Unit
            }
            None => Response::from_error(&DriverError::InvalidConfig(format!(
                "Unsupported driver: {driver_name}"
            ))),
        };
    }

    match guard.as_mut() {
        Some(driver) => handle(driver.as_mut(), request),
        None => Response::from_error(&DriverError::InvalidConfig(
            "plugin driver used before init".to_string(),
        )),
    }
}

fn reply<T>(result: Result<T, DriverError>, wrap: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => wrap(value),
        Err(e) => Response::from_error(&e),
    }
}

fn unit(result: Result<(), DriverError>) -> Response {
    reply(result, |()| Response::Unit)
}

fn handle(driver: &mut dyn Driver, request: Request) -> Response {
    match request {
        Request::DriverName => Response::Text(driver.driver_name()),
        Request::MachineName => Response::Text(driver.machine_name()),
        Request::CreateFlags => Response::Flags(driver.create_flags()),
        Request::SetConfigFromFlags { options } => unit(driver.set_config_from_flags(&options)),
        Request::SetConfigRaw { raw } => unit(driver.load_raw(&raw)),
        Request::GetConfigRaw => reply(driver.to_raw(), Response::Raw),
        Request::GetIp => reply(driver.get_ip(), Response::Text),
        Request::GetUrl => reply(driver.get_url(), Response::Text),
        Request::GetSshHostname => reply(driver.get_ssh_hostname(), Response::Text),
        Request::GetSshPort => reply(driver.get_ssh_port(), Response::Port),
        Request::GetSshUsername => Response::Text(driver.get_ssh_username()),
        Request::GetSshKeyPath => Response::Text(driver.get_ssh_key_path()),
        Request::GetState => reply(driver.get_state(), Response::State),
        Request::PreCreateCheck => unit(driver.pre_create_check()),
        Request::Create => unit(driver.create()),
        Request::Start => unit(driver.start()),
        Request::Stop => unit(driver.stop()),
        Request::Kill => unit(driver.kill()),
        Request::Remove => unit(driver.remove()),
        Request::Restart => unit(driver.restart()),
        Request::Init { .. } | Request::Close => Response::Unit,
    }
}
