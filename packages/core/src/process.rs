//! Local process helpers

/// Check if a process with the given PID is currently running
///
/// Uses `kill -0` on Unix, falling back to `/proc` on Linux when `kill`
/// itself cannot be spawned.
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        match std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(_) => {
                #[cfg(target_os = "linux")]
                {
                    std::path::Path::new(&format!("/proc/{pid}")).exists()
                }
                #[cfg(not(target_os = "linux"))]
                {
                    false
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Send a signal by name (`TERM`, `KILL`) to a process
#[cfg(unix)]
pub fn signal_process(pid: u32, signal: &str) -> std::io::Result<()> {
    let status = std::process::Command::new("kill")
        .arg(format!("-{signal}"))
        .arg(pid.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!(
            "kill -{signal} {pid} exited with {status}"
        )))
    }
}
