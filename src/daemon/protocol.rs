//! Wire protocol between the CLI and the daemon: one JSON line per
//! request, one per response.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A command with its dashed arguments and ordered free arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub args: HashMap<String, String>,
    #[serde(default)]
    pub free: Vec<String>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Request {
            command: command.into(),
            args: HashMap::new(),
            free: Vec::new(),
        }
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_free(mut self, value: impl Into<String>) -> Self {
        self.free.push(value.into());
        self
    }
}

/// Every reply is a single `result` string; multi-line results are joined
/// with newlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub result: String,
}

impl Response {
    pub fn new(result: impl Into<String>) -> Self {
        Response {
            result: result.into(),
        }
    }

    pub fn joined(lines: Vec<String>) -> Self {
        Response {
            result: lines.join("\n"),
        }
    }
}
