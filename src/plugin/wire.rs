//! JSON wire types crossing the host/plugin boundary.
//!
//! Every argument and return is a JSON-serialized string; functions that
//! only need a status return a code instead ([`STATUS_OK`]/[`STATUS_ERR`]).

use serde::{Deserialize, Serialize};

pub use crate::handler::HelpInfo;

/// Status code for host functions that return a bare code: success.
pub const STATUS_OK: u32 = 0;
/// Status code for host functions that return a bare code: failure.
pub const STATUS_ERR: u32 = 1;

/// Input to `handle-message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInput {
    /// For a command dispatch, the text after the command name; for a
    /// wildcard dispatch, the full message body.
    pub message: String,
    pub sender: String,
    pub info: MessageInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    pub timestamp: u64,
    pub push_name: String,
    pub is_group: bool,
}

/// Output of `handle-message`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

/// Input to `handle-cli`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliInput {
    pub args: Vec<String>,
}

/// Output of `handle-cli`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output of the `list-directory` host function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListDirectoryOutput {
    pub success: bool,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Input to the `send-image` host function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendImageInput {
    pub recipient: String,
    pub path: String,
}

/// Output of the `get-cache` / `get-store` host functions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvGetOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Input to the `set-cache` / `set-store` host functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvSetInput {
    pub key: String,
    pub value: String,
}

/// Output of the `list-store` host function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListStoreOutput {
    pub success: bool,
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Input to the `exec-command` host function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecInput {
    pub command: String,
    #[serde(default)]
    pub stdin: String,
}

/// Output of the `exec-command` host function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecOutput {
    pub(crate) fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: -1,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Serialize a wire value, falling back to a failure-shaped literal if
/// encoding itself fails (it cannot for these types, but the host never
/// raises into a plugin).
pub(crate) fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| r#"{"success":false}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_output_tolerates_missing_fields() {
        let out: MessageOutput = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(out.success);
        assert_eq!(out.error, None);
        assert_eq!(out.reply, None);
    }

    #[test]
    fn exec_input_stdin_defaults_empty() {
        let input: ExecInput = serde_json::from_str(r#"{"command":"echo hi"}"#).unwrap();
        assert_eq!(input.command, "echo hi");
        assert_eq!(input.stdin, "");
    }

    #[test]
    fn message_input_shape() {
        let input = MessageInput {
            message: "args".into(),
            sender: "a@host".into(),
            info: MessageInfo {
                id: "m1".into(),
                timestamp: 7,
                push_name: "A".into(),
                is_group: false,
            },
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["info"]["push_name"], "A");
        assert_eq!(json["info"]["is_group"], false);
    }
}
