//! Local QEMU hypervisor driver
//!
//! The VM is daemonised by QEMU itself; the driver tracks it through the
//! pidfile and talks to it over the QMP monitor socket in the machine dir.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::image::{BOOT_IMAGE_FILENAME, BootImageStore, LocalImageCache};
use super::{
    BaseDriver, Driver, DriverError, DriverOptions, Flag, WaitPolicy, decode_state, encode_state,
    wait_for, wait_for_state,
};
use crate::process::{is_process_running, signal_process};
use crate::ssh::generate_ssh_key;
use crate::state::State;

pub const DRIVER_NAME: &str = "qemu";

const DEFAULT_SSH_USER: &str = "tc";
const GUEST_ENGINE_PORT: u16 = 2376;
const QMP_TIMEOUT: Duration = Duration::from_secs(5);
const DISK_FORMAT_MARKER: &str = "boot2podman, please format-me";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QemuDriver {
    #[serde(flatten)]
    pub base: BaseDriver,
    #[serde(default)]
    pub engine_port: u16,
    pub memory: i64,
    pub disk_size: i64,
    pub cpu: i64,
    pub program: String,
    #[serde(default)]
    pub display: bool,
    #[serde(default)]
    pub display_type: String,
    #[serde(default)]
    pub nographic: bool,
    #[serde(default)]
    pub virtio_drives: bool,
    pub network: String,
    #[serde(default)]
    pub network_interface: String,
    #[serde(default)]
    pub network_address: String,
    #[serde(default)]
    pub network_bridge: String,
    #[serde(default)]
    pub boot_image_url: String,
    #[serde(default)]
    pub cache_mode: String,
    #[serde(default)]
    pub io_mode: String,
    #[serde(default)]
    pub local_ports: String,
}

impl QemuDriver {
    pub fn new(machine_name: &str, store_path: &Path) -> Self {
        let mut base = BaseDriver::new(machine_name, store_path);
        base.ssh_user = DEFAULT_SSH_USER.to_string();
        Self {
            base,
            engine_port: 0,
            memory: 1024,
            disk_size: 20000,
            cpu: 1,
            program: "qemu-system-x86_64".to_string(),
            display: false,
            display_type: String::new(),
            nographic: false,
            virtio_drives: false,
            network: "user".to_string(),
            network_interface: "tap0".to_string(),
            network_address: String::new(),
            network_bridge: "br0".to_string(),
            boot_image_url: String::new(),
            cache_mode: "default".to_string(),
            io_mode: "threads".to_string(),
            local_ports: String::new(),
        }
    }

    fn pidfile_path(&self) -> PathBuf {
        self.base.resolve_store_path("qemu.pid")
    }

    fn monitor_path(&self) -> PathBuf {
        self.base.resolve_store_path("monitor")
    }

    fn disk_path(&self) -> PathBuf {
        self.base.resolve_store_path("disk.qcow2")
    }

    fn iso_path(&self) -> PathBuf {
        self.base.resolve_store_path(BOOT_IMAGE_FILENAME)
    }

    fn user_network(&self) -> bool {
        self.network == "user"
    }

    fn read_pid(&self) -> Result<Option<u32>, DriverError> {
        let path = self.pidfile_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let pid = contents
            .trim()
            .parse::<u32>()
            .map_err(|e| DriverError::Command(format!("invalid pidfile {}: {e}", path.display())))?;
        Ok(Some(pid))
    }

    /// Arguments for `qemu-system-*`; `kvm` adds `-enable-kvm`
    fn start_args(&self, kvm: bool) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        if self.display {
            if !self.display_type.is_empty() {
                args.extend(["-display".into(), self.display_type.clone()]);
            }
        } else if self.nographic {
            args.push("-nographic".into());
        } else {
            args.extend(["-display".into(), "none".into()]);
        }

        args.extend([
            "-m".into(),
            self.memory.to_string(),
            "-smp".into(),
            self.cpu.to_string(),
            "-boot".into(),
            "d".into(),
        ]);

        let iso = self.iso_path().display().to_string();
        if self.virtio_drives {
            args.extend([
                "-drive".into(),
                format!("file={iso},index=2,media=cdrom,if=virtio"),
            ]);
        } else {
            args.extend(["-cdrom".into(), iso]);
        }

        args.extend([
            "-qmp".into(),
            format!("unix:{},server,nowait", self.monitor_path().display()),
            "-pidfile".into(),
            self.pidfile_path().display().to_string(),
        ]);

        let netdev = match self.network.as_str() {
            "user" => {
                let mut netdev = format!(
                    "user,id=net0,hostname={},hostfwd=tcp:127.0.0.1:{}-:22",
                    self.base.machine_name, self.base.ssh_port
                );
                if self.engine_port != 0 {
                    netdev.push_str(&format!(
                        ",hostfwd=tcp:127.0.0.1:{}-:{GUEST_ENGINE_PORT}",
                        self.engine_port
                    ));
                }
                Some(netdev)
            }
            "tap" => Some(format!(
                "tap,id=net0,ifname={},script=no,downscript=no",
                self.network_interface
            )),
            "bridge" => Some(format!("bridge,id=net0,br={}", self.network_bridge)),
            other => {
                tracing::error!("Unknown network: {}", other);
                None
            }
        };
        if let Some(netdev) = netdev {
            args.extend([
                "-netdev".into(),
                netdev,
                "-device".into(),
                "virtio-net-pci,netdev=net0".into(),
            ]);
        }

        args.push("-daemonize".into());
        if kvm {
            args.push("-enable-kvm".into());
        }

        let disk = self.disk_path().display().to_string();
        let mut drive_opts = Vec::new();
        if self.cache_mode != "default" && !self.cache_mode.is_empty() {
            drive_opts.push(format!("cache={}", self.cache_mode));
        }
        if !self.io_mode.is_empty() && self.io_mode != "threads" {
            drive_opts.push(format!("aio={}", self.io_mode));
        }
        if self.virtio_drives || !drive_opts.is_empty() {
            let interface = if self.virtio_drives { "virtio" } else { "ide" };
            let mut spec = format!("file={disk},index=0,media=disk,if={interface}");
            for opt in drive_opts {
                spec.push(',');
                spec.push_str(&opt);
            }
            args.extend(["-drive".into(), spec]);
        } else {
            args.push(disk);
        }

        args
    }

    fn generate_disk_image(&self) -> Result<(), DriverError> {
        tracing::debug!("Creating {} MB hard disk image...", self.disk_size);
        let public_key = fs::read(format!("{}.pub", self.get_ssh_key_path()))?;
        let seed = disk_seed_archive(&public_key)?;

        let disk = self.disk_path();
        let raw = disk.with_extension("qcow2.raw");
        fs::write(&raw, seed)?;

        let raw_arg = raw.display().to_string();
        let disk_arg = disk.display().to_string();
        run_command(
            "qemu-img",
            &["convert", "-f", "raw", "-O", "qcow2", &raw_arg, &disk_arg],
        )?;
        run_command(
            "qemu-img",
            &["resize", &disk_arg, &format!("+{}M", self.disk_size)],
        )?;
        if let Err(e) = fs::remove_file(&raw) {
            tracing::debug!("Could not remove {}: {}", raw.display(), e);
        }
        Ok(())
    }

    /// Issue a QMP command and return its `return` payload
    fn qmp(&self, command: &str) -> Result<serde_json::Value, DriverError> {
        qmp_command(&self.monitor_path(), command)
    }

    fn wait_for_ssh_port(&self) -> Result<(), DriverError> {
        let host = self.get_ssh_hostname()?;
        let port = self.base.get_ssh_port();
        tracing::info!(
            "Waiting for VM to start (ssh -p {} {}@{})...",
            port,
            self.base.get_ssh_username(),
            host
        );
        wait_for(
            || TcpStream::connect((host.as_str(), port)).is_ok(),
            WaitPolicy {
                attempts: 120,
                interval: Duration::from_secs(1),
            },
        )
    }
}

impl Driver for QemuDriver {
    fn driver_name(&self) -> String {
        DRIVER_NAME.to_string()
    }

    fn machine_name(&self) -> String {
        self.base.machine_name.clone()
    }

    fn create_flags(&self) -> Vec<Flag> {
        vec![
            Flag::int("qemu-memory", "Size of memory for host in MB", 1024),
            Flag::int("qemu-disk-size", "Size of disk for host in MB", 20000),
            Flag::int("qemu-cpu-count", "Number of CPUs", 1),
            Flag::string("qemu-program", "Name of program to run", "qemu-system-x86_64"),
            Flag::bool("qemu-display", "Enable a graphical display"),
            Flag::string("qemu-display-type", "Select type of display", ""),
            Flag::bool("qemu-nographic", "Use -nographic instead of -display none"),
            Flag::bool("qemu-virtio-drives", "Use virtio for drives (cdrom and disk)"),
            Flag::string("qemu-network", "Name of network to connect to (user, tap, bridge)", "user"),
            Flag::string("qemu-boot2podman-url", "The URL or path of the boot2podman image", "")
                .with_env("QEMU_BOOT2PODMAN_URL"),
            Flag::string("qemu-network-interface", "Name of the network interface to be used for networking (for tap)", "tap0"),
            Flag::string("qemu-network-address", "IP of the network address to be used for networking (for tap)", ""),
            Flag::string("qemu-network-bridge", "Name of the network bridge to be used for networking (for bridge)", "br0"),
            Flag::string("qemu-cache-mode", "Disk cache mode: default, none, writethrough, writeback, directsync, unsafe", "default"),
            Flag::string("qemu-io-mode", "Disk IO mode: threads, native", "threads"),
            Flag::string("qemu-ssh-user", "SSH username", DEFAULT_SSH_USER).with_env("QEMU_SSH_USER"),
            Flag::string("qemu-localports", "Port range to bind local SSH and engine ports (min-max)", "")
                .with_env("QEMU_LOCALPORTS"),
        ]
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> Result<(), DriverError> {
        self.memory = options.int("qemu-memory");
        self.disk_size = options.int("qemu-disk-size");
        self.cpu = options.int("qemu-cpu-count");
        self.program = options.string("qemu-program");
        self.display = options.bool("qemu-display");
        self.display_type = options.string("qemu-display-type");
        self.nographic = options.bool("qemu-nographic");
        self.virtio_drives = options.bool("qemu-virtio-drives");
        self.network = options.string("qemu-network");
        self.boot_image_url = options.string("qemu-boot2podman-url");
        self.network_interface = options.string("qemu-network-interface");
        self.network_address = options.string("qemu-network-address");
        self.network_bridge = options.string("qemu-network-bridge");
        self.cache_mode = options.string("qemu-cache-mode");
        self.io_mode = options.string("qemu-io-mode");
        self.base.ssh_user = options.string("qemu-ssh-user");
        self.local_ports = options.string("qemu-localports");
        self.base.ssh_port = 22;

        if self.memory <= 0 || self.cpu <= 0 || self.disk_size <= 0 {
            return Err(DriverError::InvalidConfig(
                "qemu memory, cpu count and disk size must be positive".to_string(),
            ));
        }
        if self.program.is_empty() {
            self.program = "qemu-system-x86_64".to_string();
        }
        if !self.user_network() && self.network_address.is_empty() {
            tracing::warn!(
                "Network {} selected without --qemu-network-address; the machine will have no IP",
                self.network
            );
        }
        parse_port_range(&self.local_ports)?;
        Ok(())
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        if self.user_network() {
            return Ok("127.0.0.1".to_string());
        }
        Ok(self.network_address.clone())
    }

    fn get_url(&self) -> Result<String, DriverError> {
        if !self.pidfile_path().exists() {
            return Ok(String::new());
        }
        let ip = self.get_ip()?;
        if ip.is_empty() {
            return Ok(String::new());
        }
        let port = if self.user_network() {
            self.engine_port
        } else {
            GUEST_ENGINE_PORT
        };
        if port == 0 {
            return Ok(format!("tcp://{ip}"));
        }
        Ok(format!("tcp://{ip}:{port}"))
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        if self.user_network() {
            return Ok("localhost".to_string());
        }
        self.get_ip()
    }

    fn get_ssh_port(&self) -> Result<u16, DriverError> {
        Ok(self.base.get_ssh_port())
    }

    fn get_ssh_username(&self) -> String {
        if self.base.ssh_user.is_empty() {
            return DEFAULT_SSH_USER.to_string();
        }
        self.base.ssh_user.clone()
    }

    fn get_ssh_key_path(&self) -> String {
        self.base.resolve_store_path("id_rsa").display().to_string()
    }

    fn get_state(&self) -> Result<State, DriverError> {
        let Some(pid) = self.read_pid()? else {
            return Ok(State::Stopped);
        };
        if !is_process_running(pid) {
            if let Err(e) = fs::remove_file(self.pidfile_path()) {
                tracing::debug!("Could not remove stale pidfile: {}", e);
            }
            return Ok(State::Stopped);
        }
        let status = self.qmp("query-status")?;
        Ok(run_state(status.get("status").and_then(|s| s.as_str()).unwrap_or_default()))
    }

    fn create(&mut self) -> Result<(), DriverError> {
        if self.user_network() {
            let (min, max) = parse_port_range(&self.local_ports)?;
            tracing::debug!("port range: {} -> {}", min, max);
            self.base.ssh_port = allocate_port(min, max)?;
            self.engine_port = loop {
                let port = allocate_port(min, max)?;
                if port != self.base.ssh_port {
                    break port;
                }
            };
        }

        let source = (!self.boot_image_url.is_empty()).then_some(self.boot_image_url.as_str());
        LocalImageCache::new(&self.base.store_path)
            .copy_to_machine_dir(source, &self.base.machine_name)?;

        tracing::info!("Creating SSH key...");
        generate_ssh_key(Path::new(&self.get_ssh_key_path()))?;

        tracing::info!("Creating disk image...");
        self.generate_disk_image()?;

        tracing::info!("Starting QEMU VM...");
        self.start()
    }

    fn start(&mut self) -> Result<(), DriverError> {
        let kvm = Path::new("/dev/kvm").exists();
        let args = self.start_args(kvm);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_command(&self.program, &arg_refs)?;
        self.wait_for_ssh_port()
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.qmp("system_powerdown")?;
        Ok(())
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        let Err(e) = self.qmp("quit") else {
            return Ok(());
        };
        // Monitor gone or wedged: signal the pid QEMU recorded
        let Some(pid) = self.read_pid()? else {
            return Err(e);
        };
        if !is_process_running(pid) {
            return Err(e);
        }
        tracing::warn!("QMP quit failed ({}), sending SIGKILL to {}", e, pid);
        signal_process(pid, "KILL")?;
        if let Err(e) = fs::remove_file(self.pidfile_path()) {
            tracing::debug!("Could not remove pidfile: {}", e);
        }
        Ok(())
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        let Some(pid) = self.read_pid()? else {
            return Ok(());
        };
        if is_process_running(pid) {
            self.kill()?;
        }
        Ok(())
    }

    fn restart(&mut self) -> Result<(), DriverError> {
        if self.get_state()? == State::Running {
            self.stop()?;
            wait_for_state(&*self, State::Stopped, WaitPolicy::default())?;
        }
        self.start()
    }

    fn to_raw(&self) -> Result<serde_json::Value, DriverError> {
        encode_state(self)
    }

    fn load_raw(&mut self, raw: &serde_json::Value) -> Result<(), DriverError> {
        *self = decode_state(raw)?;
        Ok(())
    }
}

/// Map a QMP `RunState` to a machine state
fn run_state(status: &str) -> State {
    match status {
        "running" => State::Running,
        "paused" | "suspended" => State::Paused,
        "shutdown" => State::Stopped,
        "save-vm" | "restore-vm" => State::Saved,
        "internal-error" | "io-error" | "guest-panicked" => State::Error,
        _ => State::None,
    }
}

/// Parse `min-max`; empty means any port
fn parse_port_range(raw: &str) -> Result<(u16, u16), DriverError> {
    if raw.is_empty() {
        return Ok((0, 65535));
    }
    let invalid = || DriverError::InvalidConfig("Invalid port range".to_string());
    let (min, max) = raw.split_once('-').ok_or_else(invalid)?;
    let min: u16 = min.trim().parse().map_err(|_| invalid())?;
    let max: u16 = max.trim().parse().map_err(|_| invalid())?;
    if max < min {
        return Err(invalid());
    }
    if max - min < 2 {
        return Err(DriverError::InvalidConfig(
            "Port range must be minimum 2 ports".to_string(),
        ));
    }
    Ok((min, max))
}

/// Find a free local TCP port inside `[min, max)`
fn allocate_port(min: u16, max: u16) -> Result<u16, DriverError> {
    if min == 0 && max == 65535 {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        return Ok(listener.local_addr()?.port());
    }
    let mut rng = rand::rng();
    for _ in 0..=10 {
        let port = rng.random_range(min..max);
        tracing::debug!("testing port: {}", port);
        match TcpListener::bind(("127.0.0.1", port)) {
            Ok(_) => return Ok(port),
            Err(_) => tracing::debug!("port already in use: {}", port),
        }
    }
    Err(DriverError::Command("unable to allocate tcp port".to_string()))
}

/// Tar payload the guest's automount script formats the disk from
fn disk_seed_archive(public_key: &[u8]) -> Result<Vec<u8>, DriverError> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut marker = tar::Header::new_gnu();
    marker.set_size(DISK_FORMAT_MARKER.len() as u64);
    marker.set_mode(0o644);
    builder.append_data(&mut marker, DISK_FORMAT_MARKER, DISK_FORMAT_MARKER.as_bytes())?;

    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_size(0);
    dir.set_mode(0o700);
    builder.append_data(&mut dir, ".ssh", std::io::empty())?;

    for name in [".ssh/authorized_keys", ".ssh/authorized_keys2"] {
        let mut header = tar::Header::new_gnu();
        header.set_size(public_key.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, public_key)?;
    }

    Ok(builder.into_inner()?)
}

/// Run a host command, failing on non-zero exit or an `error:` on stderr
fn run_command(program: &str, args: &[&str]) -> Result<String, DriverError> {
    tracing::debug!("executing: {} {}", program, args.join(" "));
    let output = Command::new(program).args(args).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DriverError::Command(format!("{program} not found in PATH"))
        } else {
            DriverError::Io(e)
        }
    })?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    tracing::debug!("STDOUT: {}", stdout);
    tracing::debug!("STDERR: {}", stderr);
    if !output.status.success() || stderr.contains("error:") {
        return Err(DriverError::Command(format!(
            "{program} {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(stdout)
}

fn qmp_command(monitor: &Path, command: &str) -> Result<serde_json::Value, DriverError> {
    let mut stream = UnixStream::connect(monitor)?;
    stream.set_read_timeout(Some(QMP_TIMEOUT))?;
    stream.set_write_timeout(Some(QMP_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    // Greeting: {"QMP": {...}}
    read_qmp_message(&mut reader)?;

    send_qmp(&mut stream, "qmp_capabilities")?;
    let ack = read_qmp_reply(&mut reader)?;
    if ack.as_object().is_some_and(|o| !o.is_empty()) {
        return Err(DriverError::Command(format!("qmp_capabilities failed: {ack}")));
    }

    send_qmp(&mut stream, command)?;
    let reply = read_qmp_reply(&mut reader)?;
    if !command.starts_with("query-") && reply.as_object().is_some_and(|o| !o.is_empty()) {
        return Err(DriverError::Command(format!("{command} failed: {reply}")));
    }
    Ok(reply)
}

fn send_qmp(stream: &mut UnixStream, command: &str) -> Result<(), DriverError> {
    let mut line = json!({ "execute": command }).to_string();
    line.push('\n');
    stream.write_all(line.as_bytes())?;
    Ok(())
}

fn read_qmp_message(reader: &mut impl BufRead) -> Result<serde_json::Value, DriverError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(DriverError::Command("QMP monitor closed the connection".to_string()));
    }
    serde_json::from_str(line.trim()).map_err(|e| DriverError::Command(format!("invalid QMP message: {e}")))
}

/// Next `return`/`error` message, skipping asynchronous events
fn read_qmp_reply(reader: &mut impl BufRead) -> Result<serde_json::Value, DriverError> {
    loop {
        let message = read_qmp_message(reader)?;
        if let Some(value) = message.get("return") {
            return Ok(value.clone());
        }
        if let Some(error) = message.get("error") {
            let desc = error
                .get("desc")
                .and_then(|d| d.as_str())
                .unwrap_or("unknown QMP error");
            return Err(DriverError::Command(desc.to_string()));
        }
        tracing::debug!("Skipping QMP event: {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::FlagValue;
    use crate::environment::MapEnvironment;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    fn configured(store: &Path) -> QemuDriver {
        let mut driver = QemuDriver::new("vm1", store);
        let options = DriverOptions::from_flags(&driver.create_flags(), &MapEnvironment::new());
        driver.set_config_from_flags(&options).unwrap();
        driver
    }

    #[test]
    fn test_parse_port_range() {
        assert_eq!(parse_port_range("").unwrap(), (0, 65535));
        assert_eq!(parse_port_range("4000-4100").unwrap(), (4000, 4100));
        assert!(parse_port_range("4100-4000").is_err());
        assert!(parse_port_range("abc-4000").is_err());
        assert!(parse_port_range("4000").is_err());
        let err = parse_port_range("4000-4001").unwrap_err();
        assert!(err.to_string().contains("minimum 2 ports"));
    }

    #[test]
    fn test_allocate_port_in_range() {
        let port = allocate_port(0, 65535).unwrap();
        assert!(port > 0);
    }

    #[test]
    fn test_defaults_from_flags() {
        let driver = configured(Path::new("/store"));
        assert_eq!(driver.memory, 1024);
        assert_eq!(driver.cpu, 1);
        assert_eq!(driver.get_ssh_username(), "tc");
        assert_eq!(driver.get_ip().unwrap(), "127.0.0.1");
        assert_eq!(driver.get_ssh_hostname().unwrap(), "localhost");
        assert_eq!(driver.get_ssh_key_path(), "/store/machines/vm1/id_rsa");
    }

    #[test]
    fn test_rejects_bad_local_ports() {
        let mut driver = QemuDriver::new("vm1", Path::new("/store"));
        let mut options = DriverOptions::from_flags(&driver.create_flags(), &MapEnvironment::new());
        options.set("qemu-localports", FlagValue::String("10-11".to_string()));
        assert!(driver.set_config_from_flags(&options).is_err());
    }

    #[test]
    fn test_start_args_user_network() {
        let mut driver = configured(Path::new("/store"));
        driver.base.ssh_port = 40022;
        driver.engine_port = 40376;
        let args = driver.start_args(false);
        let joined = args.join(" ");
        assert!(joined.contains("-display none"));
        assert!(joined.contains("-m 1024 -smp 1 -boot d"));
        assert!(joined.contains("-cdrom /store/machines/vm1/boot2podman.iso"));
        assert!(joined.contains("hostfwd=tcp:127.0.0.1:40022-:22"));
        assert!(joined.contains("hostfwd=tcp:127.0.0.1:40376-:2376"));
        assert!(joined.contains("-daemonize"));
        assert!(!joined.contains("-enable-kvm"));
        assert_eq!(args.last().unwrap(), "/store/machines/vm1/disk.qcow2");
    }

    #[test]
    fn test_start_args_virtio_and_kvm() {
        let mut driver = configured(Path::new("/store"));
        driver.virtio_drives = true;
        driver.nographic = true;
        let joined = driver.start_args(true).join(" ");
        assert!(joined.contains("-nographic"));
        assert!(joined.contains("media=cdrom,if=virtio"));
        assert!(joined.contains("file=/store/machines/vm1/disk.qcow2,index=0,media=disk,if=virtio"));
        assert!(joined.contains("-enable-kvm"));
    }

    #[test]
    fn test_state_without_pidfile_is_stopped() {
        let temp = TempDir::new().unwrap();
        let driver = configured(temp.path());
        assert_eq!(driver.get_state().unwrap(), State::Stopped);
        assert_eq!(driver.get_url().unwrap(), "");
    }

    #[test]
    fn test_stale_pidfile_is_removed() {
        let temp = TempDir::new().unwrap();
        let driver = configured(temp.path());
        fs::create_dir_all(driver.base.machine_dir()).unwrap();
        fs::write(driver.pidfile_path(), "4000000000").unwrap();
        assert_eq!(driver.get_state().unwrap(), State::Stopped);
        assert!(!driver.pidfile_path().exists());
    }

    #[test]
    fn test_kill_signals_pid_when_monitor_is_missing() {
        use std::os::unix::process::ExitStatusExt;

        let temp = TempDir::new().unwrap();
        let mut driver = configured(temp.path());
        fs::create_dir_all(driver.base.machine_dir()).unwrap();
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        fs::write(driver.pidfile_path(), child.id().to_string()).unwrap();

        driver.remove().unwrap();

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(9));
        assert!(!driver.pidfile_path().exists());
    }

    #[test]
    fn test_kill_without_process_reports_monitor_error() {
        let temp = TempDir::new().unwrap();
        let mut driver = configured(temp.path());
        assert!(driver.kill().is_err());
        assert!(driver.remove().is_ok());
    }

    #[test]
    fn test_url_uses_forwarded_engine_port() {
        let temp = TempDir::new().unwrap();
        let mut driver = configured(temp.path());
        driver.engine_port = 40376;
        fs::create_dir_all(driver.base.machine_dir()).unwrap();
        fs::write(driver.pidfile_path(), "1").unwrap();
        assert_eq!(driver.get_url().unwrap(), "tcp://127.0.0.1:40376");
    }

    #[test]
    fn test_disk_seed_archive_layout() {
        let archive = disk_seed_archive(b"ssh-rsa AAAA test").unwrap();
        let mut tar = tar::Archive::new(&archive[..]);
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names[0], DISK_FORMAT_MARKER);
        assert!(names.iter().any(|n| n == ".ssh/authorized_keys"));
        assert!(names.iter().any(|n| n == ".ssh/authorized_keys2"));
    }

    #[test]
    fn test_run_state_mapping() {
        assert_eq!(run_state("running"), State::Running);
        assert_eq!(run_state("paused"), State::Paused);
        assert_eq!(run_state("shutdown"), State::Stopped);
        assert_eq!(run_state("prelaunch"), State::None);
    }

    #[test]
    fn test_qmp_handshake_and_query() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("monitor");
        let listener = UnixListener::bind(&socket).unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            stream
                .write_all(b"{\"QMP\": {\"version\": {}, \"capabilities\": []}}\r\n")
                .unwrap();
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert!(line.contains("qmp_capabilities"));
            stream.write_all(b"{\"return\": {}}\r\n").unwrap();
            line.clear();
            reader.read_line(&mut line).unwrap();
            assert!(line.contains("query-status"));
            stream
                .write_all(b"{\"event\": \"RESUME\", \"data\": {}}\r\n")
                .unwrap();
            stream
                .write_all(b"{\"return\": {\"status\": \"running\", \"running\": true}}\r\n")
                .unwrap();
        });

        let reply = qmp_command(&socket, "query-status").unwrap();
        assert_eq!(reply["status"], "running");
        server.join().unwrap();
    }

    #[test]
    fn test_qmp_error_reply() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("monitor");
        let listener = UnixListener::bind(&socket).unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            stream.write_all(b"{\"QMP\": {}}\r\n").unwrap();
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            stream.write_all(b"{\"return\": {}}\r\n").unwrap();
            line.clear();
            reader.read_line(&mut line).unwrap();
            stream
                .write_all(b"{\"error\": {\"class\": \"GenericError\", \"desc\": \"no such command\"}}\r\n")
                .unwrap();
        });

        let err = qmp_command(&socket, "bogus").unwrap_err();
        assert_eq!(err.to_string(), "no such command");
        server.join().unwrap();
    }
}
