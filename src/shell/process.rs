use crate::config::ShellConfig;
use crate::error::{ApiError, ErrorCode, PipeError, PipeResult};
use crate::shell::ShellBackend;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{Duration, timeout};

const EXIT_GRACE: Duration = Duration::from_secs(5);

pub struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    exit_command: String,
}

impl ShellProcess {
    pub fn spawn(config: &ShellConfig) -> PipeResult<Self> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                ApiError::new(ErrorCode::ProcessLaunch, "Failed to start shell")
                    .with_details(format!("{}: {err}", config.program))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ApiError::new(ErrorCode::ProcessLaunch, "Shell stdin was not captured")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ApiError::new(ErrorCode::ProcessLaunch, "Shell stdout was not captured")
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(line = %line, "Shell stderr");
                }
            });
        }

        tracing::debug!(
            program = %config.program,
            args = ?config.args,
            pid = child.id(),
            "Shell started"
        );
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            exit_command: config.exit_command.clone(),
        })
    }

    fn log_exit_status(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) if status.success() => tracing::info!("Shell exited"),
            Ok(Some(status)) => tracing::warn!(status = %status, "Shell exited abnormally"),
            Ok(None) => tracing::warn!("Shell closed its output but is still running"),
            Err(err) => tracing::warn!(error = %err, "Failed to query shell exit status"),
        }
    }
}

fn write_error(err: std::io::Error) -> PipeError {
    if err.kind() == ErrorKind::BrokenPipe {
        ApiError::new(ErrorCode::BrokenSession, "Shell is no longer accepting input")
            .with_details(err.to_string())
            .into()
    } else {
        ApiError::new(ErrorCode::BrokenSession, "Shell write failed")
            .with_details(err.to_string())
            .into()
    }
}

#[async_trait]
impl ShellBackend for ShellProcess {
    async fn write_line(&mut self, line: &str) -> PipeResult<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(write_error)?;
        self.stdin.write_all(b"\n").await.map_err(write_error)?;
        self.stdin.flush().await.map_err(write_error)?;
        Ok(())
    }

    async fn read_line(&mut self) -> PipeResult<Option<String>> {
        let mut buf = Vec::new();
        let read = self.stdout.read_until(b'\n', &mut buf).await.map_err(|err| {
            ApiError::new(ErrorCode::BrokenSession, "Shell read failed")
                .with_details(err.to_string())
        })?;
        if read == 0 {
            self.log_exit_status();
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        // The client charset is not always UTF-8.
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    async fn close(&mut self) -> PipeResult<()> {
        if !self.exit_command.is_empty() {
            let exit_command = self.exit_command.clone();
            if let Err(err) = self.write_line(&exit_command).await {
                tracing::debug!(error = %err, "Shell exit command not delivered");
            }
        }
        match timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(status = %status, "Shell stopped");
                Ok(())
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => {
                tracing::warn!("Shell ignored exit command; killing it");
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}
