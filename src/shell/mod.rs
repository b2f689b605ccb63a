mod process;

use crate::error::PipeResult;
use async_trait::async_trait;

pub use process::ShellProcess;

#[async_trait]
pub trait ShellBackend: Send {
    async fn write_line(&mut self, line: &str) -> PipeResult<()>;

    async fn read_line(&mut self) -> PipeResult<Option<String>>;

    async fn close(&mut self) -> PipeResult<()>;
}

pub async fn wait_for_ready(shell: &mut dyn ShellBackend, marker: &str) -> PipeResult<bool> {
    let marker = marker.to_lowercase();
    while let Some(line) = shell.read_line().await? {
        tracing::trace!(line = %line, "Shell startup output");
        if line.to_lowercase().contains(&marker) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::ShellBackend;
    use crate::error::{ApiError, ErrorCode, PipeResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    pub struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        pub fn lines(&self) -> Vec<String> {
            self.0.lock().expect("journal mutex poisoned").clone()
        }

        pub fn connects(&self) -> usize {
            self.lines()
                .iter()
                .filter(|line| line.starts_with("conn "))
                .count()
        }

        fn push(&self, line: &str) {
            self.0
                .lock()
                .expect("journal mutex poisoned")
                .push(line.to_string());
        }
    }

    /// In-memory stand-in for SQL*Plus in silent mode: echoes `prompt` text,
    /// answers `conn` and a canned query, and ignores everything else.
    #[derive(Default)]
    pub struct ScriptedShell {
        journal: Journal,
        pending: VecDeque<String>,
        pub startup: Vec<String>,
        started: bool,
        connected: bool,
        csv: bool,
        pub hang_on: Option<String>,
        hanging: bool,
        pub die_on: Option<String>,
        dead: bool,
    }

    impl ScriptedShell {
        pub fn new() -> Self {
            Self {
                startup: vec!["SP2-0640: Not connected".to_string()],
                ..Self::default()
            }
        }

        pub fn with_output(lines: &[&str]) -> Self {
            let mut shell = Self::new();
            shell.started = true;
            shell.pending = lines.iter().map(|line| line.to_string()).collect();
            shell
        }

        pub fn journal(&self) -> Journal {
            self.journal.clone()
        }

        fn respond(&mut self, line: &str) {
            if let Some(rest) = line.strip_prefix("prompt ") {
                self.pending.push_back(rest.to_string());
            } else if line.starts_with("conn ") {
                self.connected = true;
                self.pending.push_back("Connected.".to_string());
            } else if line == "set markup csv on" {
                self.csv = true;
            } else if line == "set markup csv off" {
                self.csv = false;
            } else if line.eq_ignore_ascii_case("select 1 from dual") {
                if !self.connected {
                    self.pending.push_back("SP2-0640: Not connected".to_string());
                } else if self.csv {
                    self.pending.push_back("\"1\"".to_string());
                    self.pending.push_back("1".to_string());
                } else {
                    self.pending.push_back("         1".to_string());
                    self.pending.push_back("----------".to_string());
                    self.pending.push_back("         1".to_string());
                }
            } else if line.starts_with("begin") {
                self.pending.push_back(String::new());
                self.pending
                    .push_back("PL/SQL procedure successfully completed.".to_string());
            }
        }
    }

    #[async_trait]
    impl ShellBackend for ScriptedShell {
        async fn write_line(&mut self, line: &str) -> PipeResult<()> {
            if self.dead {
                return Err(ApiError::new(ErrorCode::BrokenSession, "Shell input closed").into());
            }
            self.journal.push(line);
            if self.die_on.as_deref() == Some(line) {
                self.dead = true;
                return Ok(());
            }
            if self.hang_on.as_deref() == Some(line) {
                self.hanging = true;
                return Ok(());
            }
            if !self.hanging {
                self.respond(line);
            }
            Ok(())
        }

        async fn read_line(&mut self) -> PipeResult<Option<String>> {
            if !self.started {
                self.started = true;
                let startup = std::mem::take(&mut self.startup);
                self.pending.extend(startup);
            }
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            if self.dead {
                return Ok(None);
            }
            // Nothing buffered: behave like a blocked pipe until the hang is lifted.
            self.hanging = false;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        async fn close(&mut self) -> PipeResult<()> {
            self.dead = true;
            Ok(())
        }
    }
}
