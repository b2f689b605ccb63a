use crate::error::{ApiError, PipeError, PipeResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const SHUTDOWN_TARGET: &str = "###stop server###";

static QUERY_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(select|with)(\W|$)").expect("query shape regex"));

static CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[^@]+").expect("credentials regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    #[serde(rename = "conn")]
    pub target: String,
    #[serde(rename = "sqlCmd", default)]
    pub command_lines: Vec<String>,
    #[serde(rename = "isSelect", default)]
    pub is_query_shape: bool,
}

impl Request {
    pub fn new(target: impl Into<String>, command_lines: Vec<String>) -> Self {
        let is_query_shape = command_lines
            .first()
            .is_some_and(|line| is_query_shape(line));
        Self {
            target: target.into(),
            command_lines,
            is_query_shape,
        }
    }

    pub fn shutdown() -> Self {
        Self {
            target: SHUTDOWN_TARGET.to_string(),
            command_lines: Vec::new(),
            is_query_shape: false,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        is_shutdown(&self.target)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Ok { output: String },
    Error { error: ApiError },
}

impl Reply {
    pub fn ok(output: impl Into<String>) -> Self {
        Reply::Ok {
            output: output.into(),
        }
    }

    pub fn from_error(err: &PipeError) -> Self {
        Reply::Error {
            error: err.to_api_error(),
        }
    }

    pub fn into_result(self) -> PipeResult<String> {
        match self {
            Reply::Ok { output } => Ok(output),
            Reply::Error { error } => Err(error.into()),
        }
    }
}

pub fn is_query_shape(line: &str) -> bool {
    QUERY_SHAPE.is_match(line)
}

pub fn is_shutdown(target: &str) -> bool {
    target.eq_ignore_ascii_case(SHUTDOWN_TARGET)
}

pub fn needs_reconnect(current: &str, requested: &str) -> bool {
    normalize_target(current) != normalize_target(requested)
}

fn normalize_target(target: &str) -> String {
    target.to_lowercase()
}

pub fn mask_credentials(target: &str) -> String {
    CREDENTIALS.replace_all(target, "/***").into_owned()
}
