use std::io;
use std::process::Stdio;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

/// A long-lived shell with piped stdin, the stand-in for a user-visible
/// terminal window. At most one command is in flight per session.
pub struct TerminalSession {
    child: Child,
    stdin: ChildStdin,
}

impl TerminalSession {
    fn spawn() -> io::Result<Self> {
        let mut child = Command::new("sh")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "shell stdin not piped"))?;
        Ok(Self { child, stdin })
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Write one command line to the shell.
    pub async fn send_text(&mut self, line: &str) -> io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }
}

/// Registry of named terminal sessions. A session is reused while its shell
/// is still running and replaced once it has exited.
#[derive(Default)]
pub struct TerminalRegistry {
    sessions: DashMap<String, Arc<Mutex<TerminalSession>>>,
}

impl TerminalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find_or_create(&self, name: &str) -> io::Result<Arc<Mutex<TerminalSession>>> {
        if let Some(entry) = self.sessions.get(name) {
            let session = Arc::clone(entry.value());
            drop(entry);
            if session.lock().await.is_alive() {
                return Ok(session);
            }
            self.sessions.remove(name);
        }
        let session = Arc::new(Mutex::new(TerminalSession::spawn()?));
        self.sessions.insert(name.to_string(), Arc::clone(&session));
        Ok(session)
    }
}
