//! Issue and outcome model.

use crate::messages::{render, MessageId};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "information",
        };
        write!(f, "{s}")
    }
}

/// FHIR `issue-type` vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCode {
    Invalid,
    Structure,
    Required,
    Value,
    Invariant,
    Security,
    Login,
    Unknown,
    Expired,
    Forbidden,
    Suppressed,
    Processing,
    NotSupported,
    Duplicate,
    MultipleMatches,
    NotFound,
    Deleted,
    TooLong,
    CodeInvalid,
    Extension,
    TooCostly,
    BusinessRule,
    Conflict,
    Transient,
    LockError,
    NoStore,
    Exception,
    Timeout,
    Incomplete,
    Throttled,
    Informational,
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::Structure => "structure",
            Self::Required => "required",
            Self::Value => "value",
            Self::Invariant => "invariant",
            Self::Security => "security",
            Self::Login => "login",
            Self::Unknown => "unknown",
            Self::Expired => "expired",
            Self::Forbidden => "forbidden",
            Self::Suppressed => "suppressed",
            Self::Processing => "processing",
            Self::NotSupported => "not-supported",
            Self::Duplicate => "duplicate",
            Self::MultipleMatches => "multiple-matches",
            Self::NotFound => "not-found",
            Self::Deleted => "deleted",
            Self::TooLong => "too-long",
            Self::CodeInvalid => "code-invalid",
            Self::Extension => "extension",
            Self::TooCostly => "too-costly",
            Self::BusinessRule => "business-rule",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::LockError => "lock-error",
            Self::NoStore => "no-store",
            Self::Exception => "exception",
            Self::Timeout => "timeout",
            Self::Incomplete => "incomplete",
            Self::Throttled => "throttled",
            Self::Informational => "informational",
        };
        write!(f, "{s}")
    }
}

/// Line/column position supplied by an external JSON locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPosition {
    pub line: u32,
    pub column: u32,
}

/// One diagnostic, anchored to a path inside the instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    pub message_id: MessageId,
    pub diagnostics: String,
    /// FHIRPath-style expressions locating the issue.
    pub expression: Vec<String>,
    pub location: Option<TextPosition>,
}

impl ValidationIssue {
    /// Build an issue from the catalog, rendering `{name}` placeholders.
    pub fn new(message_id: MessageId, args: &[(&str, &str)]) -> Self {
        let descriptor = message_id.descriptor();
        Self {
            severity: descriptor.severity,
            code: descriptor.code,
            message_id,
            diagnostics: render(descriptor.template, args),
            expression: Vec::new(),
            location: None,
        }
    }

    pub fn at(mut self, expression: impl Into<String>) -> Self {
        self.expression = vec![expression.into()];
        self
    }

    /// Override the catalog severity (constraint severities follow the
    /// ElementDefinition, not the catalog).
    pub fn with_severity(mut self, severity: IssueSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_position(mut self, position: TextPosition) -> Self {
        self.location = Some(position);
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, IssueSeverity::Fatal | IssueSeverity::Error)
    }

    pub(crate) fn to_json(&self) -> Value {
        let mut issue = serde_json::json!({
            "severity": self.severity.to_string(),
            "code": self.code.to_string(),
            "diagnostics": format!("[{}] {}", self.message_id.as_str(), self.diagnostics),
        });
        if !self.expression.is_empty() {
            issue["expression"] = serde_json::json!(self.expression);
        }
        if let Some(pos) = self.location {
            issue["location"] = serde_json::json!([format!("line {}, column {}", pos.line, pos.column)]);
        }
        issue
    }
}

/// Counters collected over one validation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    /// Root plus nested resources visited by the walker.
    pub resources_visited: usize,
    /// Profiles applied across all visited resources.
    pub profiles_applied: usize,
    pub duration: Duration,
}

/// Result of validating one resource.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub resource_type: Option<String>,
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub stats: Option<ValidationStats>,
}

impl ValidationOutcome {
    pub fn has_errors(&self) -> bool {
        !self.valid
    }

    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .count()
    }

    /// Render as an `OperationOutcome` resource.
    pub fn to_operation_outcome(&self) -> Value {
        let issues: Vec<Value> = if self.issues.is_empty() {
            vec![serde_json::json!({
                "severity": "information",
                "code": "informational",
                "diagnostics": "All OK"
            })]
        } else {
            self.issues.iter().map(|i| i.to_json()).collect()
        };
        serde_json::json!({
            "resourceType": "OperationOutcome",
            "issue": issues
        })
    }
}

/// Pool of issue buffers with clear-on-release semantics.
///
/// Buffers keep their capacity across validations; the pool itself is
/// bounded so a burst of large outcomes cannot pin memory forever.
pub(crate) struct IssuePool {
    buffers: Mutex<Vec<Vec<ValidationIssue>>>,
    max_pooled: usize,
}

impl IssuePool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    pub fn acquire(&self) -> Vec<ValidationIssue> {
        self.buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_default()
    }

    pub fn release(&self, mut buffer: Vec<ValidationIssue>) {
        buffer.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        if buffers.len() < self.max_pooled {
            buffers.push(buffer);
        }
    }
}
