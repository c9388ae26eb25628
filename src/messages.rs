use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which scan-configuration schema the platform API expects for this run.
/// Picked once at run start, never inferred from response shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanConfigVariant {
    #[default]
    Legacy,
    V2,
}

/// Input assembled by the caller: the raw OpenAPI document, the scan
/// configuration to publish, and the environment handed to the scan workload
/// (values may contain `{{name}}` references into the environment store).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRunRequest {
    pub raw_oas: String,
    pub config: Value,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub variant: ScanConfigVariant,
}

/// The single flat error shape surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl GeneralError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReportPayload {
    pub report: Value,
    pub path: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Value>,
}

/// Complete output contract of a scan run; everything upstream of this shape
/// is a presentation concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "camelCase")]
pub enum ScanViewMessage {
    ShowScanReport(ScanReportPayload),
    ShowGeneralError(GeneralError),
}

impl ScanViewMessage {
    pub fn report(report: Value) -> Self {
        ScanViewMessage::ShowScanReport(ScanReportPayload {
            report,
            path: "/".to_string(),
            method: "get".to_string(),
            security: None,
        })
    }
}
