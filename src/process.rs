//! Child process hosting.
//!
//! Spawns a peer process with piped stdio and bridges to it: messages are
//! written to the child's stdin, its stdout is decoded by a [`LineBridge`],
//! and each line it writes to stderr is reported to `on_error` as
//! [`BridgeError::Peer`].

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::bridge::{BridgeHandlers, BridgeOptions, LineBridge, ListenerHandle, MessageSender};
use crate::error::BridgeError;

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The program was not found.
    #[error("Program not found")]
    NotFound,
    /// Permission denied when spawning.
    #[error("Permission denied")]
    PermissionDenied,
    /// The script passed to the interpreter does not exist.
    #[error("File does not exist at path: {0}")]
    ScriptNotFound(PathBuf),
    /// A stdio pipe was not captured.
    #[error("Child {0} not available")]
    MissingPipe(&'static str),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Builder for the command that starts the peer.
#[derive(Debug, Clone, Default)]
pub struct ChildCommand {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    script: Option<PathBuf>,
}

impl ChildCommand {
    /// Run `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Run a script file with an interpreter, e.g. `python3 worker.py`.
    ///
    /// The script must exist when the child is spawned.
    #[must_use]
    pub fn script(interpreter: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            program: interpreter.into(),
            args: vec![path.to_string_lossy().into_owned()],
            working_dir: None,
            script: Some(path),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory for the child.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get the program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the arguments.
    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the script path, if built with [`script`](Self::script).
    #[must_use]
    pub fn get_script(&self) -> Option<&Path> {
        self.script.as_deref()
    }
}

/// A running child process bridged over its stdio.
#[derive(Debug)]
pub struct ChildBridge {
    child: Child,
    bridge: LineBridge<ChildStdout, ChildStdin>,
    program: String,
}

impl ChildBridge {
    /// Spawn the child and connect a bridge to it.
    ///
    /// The listener is not started; call [`start`](Self::start) or use
    /// [`LineBridge::read_message`] through [`bridge`](Self::bridge).
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the script is missing or the process fails
    /// to spawn.
    pub fn spawn(
        command: &ChildCommand,
        handlers: BridgeHandlers,
        options: BridgeOptions,
    ) -> Result<Self, SpawnError> {
        if let Some(script) = &command.script {
            if !script.exists() {
                return Err(SpawnError::ScriptNotFound(script.clone()));
            }
        }

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(SpawnError::from_io)?;
        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(SpawnError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SpawnError::MissingPipe("stderr"))?;

        if options.logging {
            tracing::info!(
                program = %command.program,
                args = ?command.args,
                pid = ?child.id(),
                "Process started"
            );
        }

        tokio::spawn(forward_stderr(stderr, handlers.clone(), options.logging));

        Ok(Self {
            child,
            bridge: LineBridge::new(stdout, stdin, handlers, options),
            program: command.program.clone(),
        })
    }

    /// The bridge connected to the child's stdout and stdin.
    #[must_use]
    pub fn bridge(&self) -> &LineBridge<ChildStdout, ChildStdin> {
        &self.bridge
    }

    /// A sender writing to the child's stdin.
    #[must_use]
    pub fn sender(&self) -> MessageSender<ChildStdin> {
        self.bridge.sender()
    }

    /// Start listening to the child's stdout.
    ///
    /// # Errors
    ///
    /// See [`LineBridge::start`].
    pub fn start(&self) -> Result<ListenerHandle, BridgeError> {
        self.bridge.start()
    }

    /// Send one message to the child.
    ///
    /// # Errors
    ///
    /// See [`MessageSender::send`].
    pub async fn send(&self, message: &str) -> Result<(), BridgeError> {
        self.bridge.send(message).await
    }

    /// Close the child's stdin, signalling end of input.
    ///
    /// # Errors
    ///
    /// See [`MessageSender::close`].
    pub async fn close(&self) -> Result<(), BridgeError> {
        self.bridge.close().await
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        if self.bridge.options().logging {
            tracing::info!(program = %self.program, code = ?status.code(), "Process closed");
        }
        Ok(status)
    }

    /// Forcefully kill the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id() else {
            return Ok(());
        };

        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        let _ = kill(nix_pid, Signal::SIGTERM);

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => self.child.kill().await,
        }
    }
}

/// Report each stderr line of the child to `on_error`.
async fn forward_stderr(stderr: ChildStderr, handlers: BridgeHandlers, logging: bool) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if logging {
                    tracing::warn!(line = %line, "Peer wrote to stderr");
                }
                handlers.report_error(&BridgeError::Peer(line));
            }
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading peer stderr");
                break;
            }
        }
    }
}
