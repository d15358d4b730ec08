//! Scripted SSH commander for provisioning tests
//!
//! Understands the few command shapes the provisioners use to read, write
//! and move remote files, backed by an in-memory file map. Anything else
//! answers from the scripted responses, or with empty output.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{SshCommander, SshError};

#[derive(Default)]
pub struct FakeSshCommander {
    responses: HashMap<String, String>,
    failures: Vec<String>,
    files: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSshCommander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact command -> stdout
    pub fn respond(mut self, command: &str, output: &str) -> Self {
        self.responses.insert(command.to_string(), output.to_string());
        self
    }

    /// Any command containing `pattern` fails
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.failures.push(pattern.to_string());
        self
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn write(&self, command: &str) -> Option<()> {
        let rest = command.strip_prefix("printf '%s' ")?;
        let split = rest.rfind("' | sudo tee ")?;
        let content = unquote(&rest[..=split]);
        let path = rest[split + "' | sudo tee ".len()..]
            .trim_end_matches(" > /dev/null")
            .trim();
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content);
        Some(())
    }

    fn moves(&self, command: &str) -> Option<()> {
        let mut files = self.files.lock().unwrap();
        for part in command.split(" && ") {
            let args = part.strip_prefix("sudo mv -f ")?;
            let (from, to) = args.split_once(' ')?;
            let content = files.remove(from)?;
            files.insert(to.to_string(), content);
        }
        Some(())
    }
}

fn unquote(quoted: &str) -> String {
    quoted
        .strip_prefix('\'')
        .and_then(|q| q.strip_suffix('\''))
        .unwrap_or(quoted)
        .replace(r"'\''", "'")
}

impl SshCommander for FakeSshCommander {
    fn run(&self, command: &str) -> Result<String, SshError> {
        self.calls.lock().unwrap().push(command.to_string());

        if self.failures.iter().any(|p| command.contains(p.as_str())) {
            return Err(SshError::CommandFailed {
                command: command.to_string(),
                exit_code: 1,
                stderr: "scripted failure".to_string(),
            });
        }
        if let Some(output) = self.responses.get(command) {
            return Ok(output.clone());
        }
        if let Some(path) = command.strip_prefix("cat ") {
            return self.file(path.trim()).ok_or_else(|| SshError::CommandFailed {
                command: command.to_string(),
                exit_code: 1,
                stderr: format!("cat: {path}: No such file or directory"),
            });
        }
        if command.starts_with("printf '%s' ") && self.write(command).is_some() {
            return Ok(String::new());
        }
        if command.starts_with("sudo mv -f ") && self.moves(command).is_none() {
            return Err(SshError::CommandFailed {
                command: command.to_string(),
                exit_code: 1,
                stderr: "mv: cannot stat".to_string(),
            });
        }
        Ok(String::new())
    }
}
