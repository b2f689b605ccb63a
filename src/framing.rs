//! Delimits the output of one command batch inside the shell's continuous
//! output stream.
//!
//! The shell gives no structured reply boundaries, so [`SentinelFramer`]
//! brackets each batch with echo commands whose text embeds the request id and
//! then scans the stream for those lines. Everything outside the brackets
//! (banners, leftovers of an earlier timed-out batch, reconnect chatter) is
//! dropped.

use crate::config::ShellConfig;
use crate::error::{ApiError, ErrorCode, PipeResult};
use crate::shell::ShellBackend;
use async_trait::async_trait;

pub type RequestId = i64;

/// Id used for reconnect batches, whose output is thrown away.
pub const RECONNECT_REQUEST_ID: RequestId = -1;

#[async_trait]
pub trait OutputFramer: Send + Sync {
    async fn submit(
        &self,
        shell: &mut dyn ShellBackend,
        commands: &[String],
        request_id: RequestId,
    ) -> PipeResult<()>;

    /// Output produced between the brackets of `request_id`.
    ///
    /// Fails with `BrokenSession` if the shell output ends before the closing
    /// bracket is seen.
    async fn capture(&self, shell: &mut dyn ShellBackend, request_id: RequestId)
    -> PipeResult<String>;
}

#[derive(Debug, Clone)]
pub struct SentinelFramer {
    clear_command: String,
    echo_command: String,
}

impl SentinelFramer {
    pub fn new(clear_command: impl Into<String>, echo_command: impl Into<String>) -> Self {
        Self {
            clear_command: clear_command.into(),
            echo_command: echo_command.into(),
        }
    }

    pub fn from_config(config: &ShellConfig) -> Self {
        Self::new(config.clear_command.clone(), config.echo_command.clone())
    }

    pub fn start_marker(request_id: RequestId) -> String {
        format!("##### start of out {request_id} #####")
    }

    pub fn end_marker(request_id: RequestId) -> String {
        format!("##### end of out {request_id} #####")
    }

    fn echo(&self, text: &str) -> String {
        format!("{} {}", self.echo_command, text)
    }
}

impl Default for SentinelFramer {
    fn default() -> Self {
        Self::new("clear screen", "prompt")
    }
}

#[async_trait]
impl OutputFramer for SentinelFramer {
    async fn submit(
        &self,
        shell: &mut dyn ShellBackend,
        commands: &[String],
        request_id: RequestId,
    ) -> PipeResult<()> {
        if !self.clear_command.is_empty() {
            shell.write_line(&self.clear_command).await?;
        }
        shell
            .write_line(&self.echo(&Self::start_marker(request_id)))
            .await?;
        for command in commands {
            shell.write_line(command).await?;
        }
        shell
            .write_line(&self.echo(&Self::end_marker(request_id)))
            .await?;
        Ok(())
    }

    async fn capture(
        &self,
        shell: &mut dyn ShellBackend,
        request_id: RequestId,
    ) -> PipeResult<String> {
        let start = Self::start_marker(request_id);
        let end = Self::end_marker(request_id);
        let mut output = String::new();
        let mut started = false;

        while let Some(line) = shell.read_line().await? {
            if started {
                if line.contains(&end) {
                    return Ok(output);
                }
                output.push_str(&line);
                output.push('\n');
            } else if line.contains(&start) {
                started = true;
            } else {
                tracing::trace!(request_id, line = %line, "Discarding unframed output");
            }
        }

        Err(ApiError::new(
            ErrorCode::BrokenSession,
            "Shell output ended before the command finished",
        )
        .with_details(format!(
            "request {request_id}, {} bytes captured",
            output.len()
        ))
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::ScriptedShell;

    #[tokio::test]
    async fn submit_brackets_commands_in_order() {
        let mut shell = ScriptedShell::with_output(&[]);
        let journal = shell.journal();
        let framer = SentinelFramer::default();
        framer
            .submit(
                &mut shell,
                &["select 1 from dual".to_string(), "/".to_string()],
                7,
            )
            .await
            .expect("submit");
        assert_eq!(
            journal.lines(),
            vec![
                "clear screen",
                "prompt ##### start of out 7 #####",
                "select 1 from dual",
                "/",
                "prompt ##### end of out 7 #####",
            ]
        );
    }

    #[tokio::test]
    async fn capture_returns_text_between_markers_only() {
        let mut shell = ScriptedShell::with_output(&[
            "leftover",
            "",
            "##### start of out 3 #####",
            "",
            "row one",
            "",
            "row two",
            "##### end of out 3 #####",
            "",
            "trailing",
        ]);
        let framer = SentinelFramer::default();
        let output = framer.capture(&mut shell, 3).await.expect("capture");
        assert_eq!(output, "\nrow one\n\nrow two\n");
    }

    #[tokio::test]
    async fn capture_ignores_markers_of_other_requests() {
        let mut shell = ScriptedShell::with_output(&[
            "##### start of out 1 #####",
            "stale",
            "##### end of out 1 #####",
            "##### start of out 12 #####",
            "fresh",
            "##### end of out 12 #####",
        ]);
        let framer = SentinelFramer::default();
        let output = framer.capture(&mut shell, 12).await.expect("capture");
        assert_eq!(output, "fresh\n");
    }

    #[tokio::test]
    async fn capture_without_end_marker_is_broken_session() {
        let mut shell = ScriptedShell::with_output(&["##### start of out 4 #####", "partial"]);
        shell.close().await.expect("close");
        let framer = SentinelFramer::default();
        let err = framer.capture(&mut shell, 4).await.expect_err("no end marker");
        assert_eq!(err.code(), ErrorCode::BrokenSession);
    }

    #[tokio::test]
    async fn reconnect_id_frames_like_any_other() {
        let mut shell = ScriptedShell::with_output(&[]);
        let framer = SentinelFramer::default();
        framer
            .submit(&mut shell, &["conn a/b@c".to_string()], RECONNECT_REQUEST_ID)
            .await
            .expect("submit");
        let output = framer
            .capture(&mut shell, RECONNECT_REQUEST_ID)
            .await
            .expect("capture");
        assert_eq!(output, "Connected.\n");
    }
}
