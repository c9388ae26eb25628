use thiserror::Error;

use crate::messages::GeneralError;

pub const AUDIT_GUIDANCE: &str = "OpenAPI has failed Security Audit. Please run API Security \
     Audit, fix the issues and try running the Scan again.";

pub const RATE_LIMIT_GUIDANCE: &str = "You have reached your maximum number of APIs. Please \
     contact support@42crunch.com to upgrade your account.";

/// Everything that can end a scan run short of a report. Cleanup of the
/// temporary API is owned by the orchestrator and is deliberately not a
/// variant here: a cleanup fault is logged and never becomes the run result.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The temporary API could not be created; nothing to clean up.
    #[error("failed to provision a temporary API: {0}")]
    Provision(#[source] anyhow::Error),

    /// The platform refused to create more APIs.
    #[error("{}", RATE_LIMIT_GUIDANCE)]
    RateLimited,

    /// The audit resolved to a state other than `valid`.
    #[error("{}", AUDIT_GUIDANCE)]
    AuditInvalid,

    /// The audit never completed within the assessment window.
    #[error("timed out waiting for the security audit: {0}")]
    AuditTimeout(#[source] anyhow::Error),

    /// The audit status could not be read at all.
    #[error("failed to check the security audit: {0}")]
    AuditCheck(#[source] anyhow::Error),

    #[error("failed to publish the scan configuration: {0}")]
    ConfigPublish(#[source] anyhow::Error),

    /// The selected runner could not dispatch or complete the scan.
    #[error("{message}")]
    Dispatch {
        message: String,
        log: Option<String>,
    },

    #[error("Failed to load scan report from the platform")]
    ReportTimeout,

    #[error("failed to read the scan report: {0}")]
    ReportFetch(#[source] anyhow::Error),

    #[error("scan run was cancelled")]
    Cancelled,
}

impl ScanError {
    /// Reduce to the flat caller-facing shape. Internal error kinds are not
    /// exposed beyond message, optional code, and optional details.
    pub fn into_general_error(self) -> GeneralError {
        match self {
            ScanError::AuditInvalid => GeneralError {
                message: AUDIT_GUIDANCE.to_string(),
                code: Some("audit-error".to_string()),
                details: None,
            },
            ScanError::RateLimited => GeneralError::new(RATE_LIMIT_GUIDANCE),
            ScanError::Dispatch { message, log } => GeneralError {
                message,
                code: None,
                details: log,
            },
            ScanError::ReportTimeout => {
                GeneralError::new("Failed to load scan report from the platform")
            }
            ScanError::Cancelled => GeneralError::new("Scan run was cancelled"),
            err @ (ScanError::Provision(_)
            | ScanError::AuditTimeout(_)
            | ScanError::AuditCheck(_)
            | ScanError::ConfigPublish(_)
            | ScanError::ReportFetch(_)) => {
                GeneralError::new(format!("Failed to run scan: {err}"))
            }
        }
    }
}
