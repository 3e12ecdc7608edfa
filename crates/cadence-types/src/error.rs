//! Error taxonomy shared across the engine.
//!
//! Two families live here:
//! - `ErrorDetail` -- the structured, user-visible error record attached to
//!   terminal step executions. Codes come from a fixed catalog so callers can
//!   render consistent guidance without knowing engine internals.
//! - `RepositoryError` -- failures from the persistence collaborator, used by
//!   the port traits in `cadence-core`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Broad category of a step-level error, used for rendering and retry hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Auth,
    NotFound,
    RateLimit,
    Server,
    Validation,
    Execution,
    System,
}

/// Severity of a step-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    Error,
    Fatal,
}

// ---------------------------------------------------------------------------
// ErrorDetail
// ---------------------------------------------------------------------------

/// Structured error record carried by terminal step executions.
///
/// The `code` is always one of the catalog codes below (or a raw sandbox
/// code passed through when the catalog has no entry). Category, severity,
/// and remediation are derived from the catalog so that every surface
/// renders the same guidance for the same failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable machine-readable code (e.g. "connection-refused").
    pub code: String,
    /// Broad classification of the failure.
    pub category: ErrorCategory,
    /// How serious the failure is for the execution.
    pub severity: ErrorSeverity,
    /// Human-readable message describing what happened.
    pub message: String,
    /// Suggested remediation from the catalog, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

/// One entry of the fixed code catalog.
struct CatalogEntry {
    code: &'static str,
    category: ErrorCategory,
    severity: ErrorSeverity,
    remediation: &'static str,
}

/// Fixed code -> explanation catalog.
///
/// Kept small and append-only: downstream consumers match on these codes.
const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        code: "connection-refused",
        category: ErrorCategory::Network,
        severity: ErrorSeverity::Error,
        remediation: "Check that the target host is reachable and the service is listening.",
    },
    CatalogEntry {
        code: "timeout",
        category: ErrorCategory::Timeout,
        severity: ErrorSeverity::Error,
        remediation: "Increase the step timeout or reduce the work the step performs.",
    },
    CatalogEntry {
        code: "unauthorized",
        category: ErrorCategory::Auth,
        severity: ErrorSeverity::Error,
        remediation: "Verify the credential or token configured for this step.",
    },
    CatalogEntry {
        code: "forbidden",
        category: ErrorCategory::Auth,
        severity: ErrorSeverity::Error,
        remediation: "The credential is valid but lacks permission for this resource.",
    },
    CatalogEntry {
        code: "not-found",
        category: ErrorCategory::NotFound,
        severity: ErrorSeverity::Error,
        remediation: "Check the URL or resource identifier for typos.",
    },
    CatalogEntry {
        code: "rate-limited",
        category: ErrorCategory::RateLimit,
        severity: ErrorSeverity::Warning,
        remediation: "Reduce request frequency or add a retry policy with backoff.",
    },
    CatalogEntry {
        code: "server-error",
        category: ErrorCategory::Server,
        severity: ErrorSeverity::Error,
        remediation: "The remote service failed; retrying may succeed.",
    },
    CatalogEntry {
        code: "script-error",
        category: ErrorCategory::Execution,
        severity: ErrorSeverity::Error,
        remediation: "Inspect the script's stderr output for the failing command.",
    },
    CatalogEntry {
        code: "invalid-config",
        category: ErrorCategory::Validation,
        severity: ErrorSeverity::Fatal,
        remediation: "Fix the step configuration; this error will not resolve on retry.",
    },
    CatalogEntry {
        code: "cancelled",
        category: ErrorCategory::Execution,
        severity: ErrorSeverity::Warning,
        remediation: "The execution was cancelled by the caller.",
    },
];

impl ErrorDetail {
    /// Build an `ErrorDetail` from a catalog code and a context message.
    ///
    /// Unknown codes fall back to the `system` category with no remediation,
    /// so raw sandbox codes pass through without being lost.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        match CATALOG.iter().find(|e| e.code == code) {
            Some(entry) => Self {
                code: entry.code.to_string(),
                category: entry.category,
                severity: entry.severity,
                message: message.into(),
                remediation: Some(entry.remediation.to_string()),
            },
            None => Self {
                code: code.to_string(),
                category: ErrorCategory::System,
                severity: ErrorSeverity::Error,
                message: message.into(),
                remediation: None,
            },
        }
    }

    /// Build an `ErrorDetail` from an HTTP status code returned by the sandbox.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let code = match status {
            401 => "unauthorized",
            403 => "forbidden",
            404 => "not-found",
            429 => "rate-limited",
            s if s >= 500 => "server-error",
            _ => "server-error",
        };
        Self::from_code(code, message)
    }

    /// Whether this error can never succeed on retry.
    pub fn is_permanent(&self) -> bool {
        matches!(self.category, ErrorCategory::Validation)
    }
}

// ---------------------------------------------------------------------------
// RepositoryError
// ---------------------------------------------------------------------------

/// Errors from persistence operations (used by port traits in cadence-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_code_lookup() {
        let detail = ErrorDetail::from_code("connection-refused", "connect to 10.0.0.5:22 failed");
        assert_eq!(detail.code, "connection-refused");
        assert_eq!(detail.category, ErrorCategory::Network);
        assert_eq!(detail.severity, ErrorSeverity::Error);
        assert!(detail.remediation.is_some());
        assert!(detail.message.contains("10.0.0.5"));
    }

    #[test]
    fn test_unknown_code_passes_through() {
        let detail = ErrorDetail::from_code("EXOTIC_SANDBOX_CODE", "something odd");
        assert_eq!(detail.code, "EXOTIC_SANDBOX_CODE");
        assert_eq!(detail.category, ErrorCategory::System);
        assert!(detail.remediation.is_none());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorDetail::from_http_status(401, "").code, "unauthorized");
        assert_eq!(ErrorDetail::from_http_status(403, "").code, "forbidden");
        assert_eq!(ErrorDetail::from_http_status(404, "").code, "not-found");
        assert_eq!(ErrorDetail::from_http_status(429, "").code, "rate-limited");
        assert_eq!(ErrorDetail::from_http_status(500, "").code, "server-error");
        assert_eq!(ErrorDetail::from_http_status(503, "").code, "server-error");
    }

    #[test]
    fn test_invalid_config_is_permanent() {
        let detail = ErrorDetail::from_code("invalid-config", "missing url");
        assert!(detail.is_permanent());
        assert_eq!(detail.severity, ErrorSeverity::Fatal);

        let detail = ErrorDetail::from_code("timeout", "deadline elapsed");
        assert!(!detail.is_permanent());
    }

    #[test]
    fn test_error_detail_serde_roundtrip() {
        let detail = ErrorDetail::from_code("rate-limited", "429 from api.example.com");
        let json = serde_json::to_string(&detail).unwrap();
        assert!(json.contains("\"rate_limit\""));
        let parsed: ErrorDetail = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, detail);
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
