//! Task-request validation.
//!
//! Nothing in an inbound message is trusted until [`accept`] has run. The
//! envelope checks (`type`, `payload`) fail fast; the per-field checks
//! collect every violation so the host gets the complete list in one
//! `TASK_FILE_INVALID` error.
//!
//! Environment values are screened for shell metacharacters even though the
//! adapter never invokes a shell itself: downstream tooling inside the
//! container may interpolate them.

use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::acp::envelope::ErrorCode;
use crate::models::task::TaskRequest;

/// Required `type` of the inbound message.
pub const TASK_REQUEST_TYPE: &str = "task-request";

/// Required payload fields, in reporting order.
pub const REQUIRED_FIELDS: [&str; 3] = ["taskFilePath", "branchName", "repoUrl"];

const BRANCH_NAME_PATTERN: &str = "^[a-zA-Z0-9][a-zA-Z0-9/_-]*$";
const ENV_KEY_PATTERN: &str = "^[A-Z_][A-Z0-9_]*$";

/// Characters rejected anywhere in an env value.
const FORBIDDEN_ENV_CHARS: &[char] = &['\n', '\r', '\0', ';', '`'];

/// Substrings rejected anywhere in an env value.
const FORBIDDEN_ENV_SEQUENCES: &[&str] = &["&&", "||", "$("];

// An invalid pattern leaves the slot empty, which rejects every input.
static BRANCH_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(BRANCH_NAME_PATTERN).ok());
static ENV_KEY_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(ENV_KEY_PATTERN).ok());

/// Why a message was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Wrong message type or missing payload object.
    Malformed(String),
    /// One or more field violations, in reporting order.
    Invalid(Vec<String>),
}

impl Rejection {
    /// Error code reported to the host.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) => ErrorCode::InvalidInput,
            Self::Invalid(_) => ErrorCode::TaskFileInvalid,
        }
    }
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => f.write_str(msg),
            Self::Invalid(violations) => write!(
                f,
                "Task request validation failed: {}",
                violations.join("; ")
            ),
        }
    }
}

/// Validate a decoded inbound message and build the [`TaskRequest`].
///
/// # Errors
///
/// Returns [`Rejection::Malformed`] when `type` is not `task-request` or
/// `payload` is not an object, and [`Rejection::Invalid`] listing every
/// field violation otherwise.
pub fn accept(message: &Value) -> Result<TaskRequest, Rejection> {
    let kind = message.get("type");
    if kind.and_then(Value::as_str) != Some(TASK_REQUEST_TYPE) {
        let got = match kind {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "None".to_owned(),
        };
        return Err(Rejection::Malformed(format!(
            "Expected message type '{TASK_REQUEST_TYPE}', got '{got}'"
        )));
    }

    let Some(payload) = message.get("payload").and_then(Value::as_object) else {
        return Err(Rejection::Malformed(
            "Missing or invalid 'payload' in task-request".into(),
        ));
    };

    let violations = validate_payload(payload);
    if !violations.is_empty() {
        return Err(Rejection::Invalid(violations));
    }

    serde_json::from_value(Value::Object(payload.clone()))
        .map_err(|e| Rejection::Malformed(format!("task-request payload unreadable: {e}")))
}

/// Collect every violation in a task-request payload.
///
/// An empty result means the payload is acceptable.
#[must_use]
pub fn validate_payload(payload: &Map<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();

    for field in REQUIRED_FIELDS {
        if !payload.contains_key(field) {
            errors.push(format!("Missing required field: {field}"));
        }
    }

    if let Some(path) = payload.get("taskFilePath") {
        if !path.as_str().is_some_and(is_valid_task_file_path) {
            errors.push("taskFilePath must end with .json".to_owned());
        }
    }

    if let Some(branch) = payload.get("branchName") {
        if !branch.as_str().is_some_and(is_valid_branch_name) {
            errors.push(format!("branchName must match {BRANCH_NAME_PATTERN}"));
        }
    }

    if let Some(url) = payload.get("repoUrl") {
        if !url.as_str().is_some_and(is_valid_repo_url) {
            errors.push("repoUrl must start with https:// or git@".to_owned());
        }
    }

    if let Some(env_vars) = payload.get("envVars") {
        match env_vars.as_object() {
            None => errors.push("envVars must be an object".to_owned()),
            Some(vars) => {
                for (key, value) in vars {
                    if !is_valid_env_key(key) {
                        errors.push(format!("envVars key '{key}' must match {ENV_KEY_PATTERN}"));
                    }
                    match value.as_str() {
                        None => errors.push(format!("envVars value for '{key}' must be a string")),
                        Some(v) if !is_safe_env_value(v) => errors.push(format!(
                            "envVars value for '{key}' contains a forbidden character or sequence"
                        )),
                        Some(_) => {}
                    }
                }
            }
        }
    }

    errors
}

/// `taskFilePath` must name a JSON file.
#[must_use]
pub fn is_valid_task_file_path(path: &str) -> bool {
    path.ends_with(".json")
}

/// `branchName` must start alphanumeric and use only `[A-Za-z0-9/_-]`.
#[must_use]
pub fn is_valid_branch_name(name: &str) -> bool {
    BRANCH_NAME_RE.as_ref().is_some_and(|re| re.is_match(name))
}

/// `repoUrl` must be an HTTPS or SSH git URL.
#[must_use]
pub fn is_valid_repo_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("git@")
}

/// Env keys are upper-case shell identifiers.
#[must_use]
pub fn is_valid_env_key(key: &str) -> bool {
    ENV_KEY_RE.as_ref().is_some_and(|re| re.is_match(key))
}

/// Env values must be free of line breaks, NUL and shell control syntax.
#[must_use]
pub fn is_safe_env_value(value: &str) -> bool {
    !value.contains(FORBIDDEN_ENV_CHARS)
        && !FORBIDDEN_ENV_SEQUENCES.iter().any(|seq| value.contains(seq))
}
