use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as Base64Engine;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{PlatformConnection, ScanTimings};
use crate::messages::ScanConfigVariant;
use crate::poller::{self, PollOutcome, PollResult};

/// Disposable registration of a specification on the platform, alive for one
/// scan run. The owning orchestrator deletes it exactly once on every exit
/// path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempApi {
    pub api_id: String,
    pub collection_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditState {
    Valid,
    Invalid,
    Pending,
}

#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub state: AuditState,
    pub report: Value,
}

/// Short-lived credential for one scan execution. Never persisted beyond the
/// run; Debug keeps the value out of logs.
#[derive(Clone)]
pub struct ScanConfigToken(String);

impl ScanConfigToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ScanConfigToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScanConfigToken(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRef {
    pub task_id: String,
    pub variant: ScanConfigVariant,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    /// Recognized "limit reached" refusal (HTTP 409, body code 109).
    #[error("platform API limit reached")]
    RateLimited,

    /// The audit never completed within the assessment window.
    #[error("timed out while waiting for the assessment report for API ID: {api_id}")]
    AuditTimeout { api_id: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The remote scanning platform, at its interface boundary.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn create_temp_api(&self, raw_oas: &str) -> Result<TempApi, PlatformError>;

    /// Idempotent-tolerant: deleting an already-deleted resource succeeds.
    async fn delete_temp_api(&self, api: &TempApi) -> Result<(), PlatformError>;

    /// Blocks internally until the assessment is processed and newer than the
    /// baseline captured at creation, then reads the audit report. Raises
    /// [`PlatformError::AuditTimeout`] if the assessment never completes.
    async fn get_audit_report(
        &self,
        api_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AuditOutcome, PlatformError>;

    async fn publish_scan_config(
        &self,
        api_id: &str,
        variant: ScanConfigVariant,
        config: &Value,
    ) -> Result<ScanConfigToken, PlatformError>;

    async fn list_scan_reports(
        &self,
        api_id: &str,
        variant: ScanConfigVariant,
    ) -> Result<Vec<ReportRef>, PlatformError>;

    /// Returns the base64-encoded report payload.
    async fn read_scan_report(&self, report: &ReportRef) -> Result<String, PlatformError>;
}

pub struct PlatformClient {
    client: reqwest::Client,
    connection: PlatformConnection,
    timings: ScanTimings,
    assessment_baselines: DashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceResponse {
    desc: ResourceDescriptor,
    #[serde(default)]
    assessment: Option<AssessmentSummary>,
}

#[derive(Debug, Deserialize)]
struct ResourceDescriptor {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentSummary {
    #[serde(default)]
    last: Option<DateTime<Utc>>,
    #[serde(default)]
    is_processed: bool,
}

impl PlatformClient {
    pub fn new(connection: PlatformConnection, timings: ScanTimings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build platform client")?;
        Ok(Self {
            client,
            connection,
            timings,
            assessment_baselines: DashMap::new(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!(
            "{}/{}",
            self.connection.platform_url.trim_end_matches('/'),
            path
        )
    }

    fn api_base(variant: ScanConfigVariant) -> &'static str {
        match variant {
            ScanConfigVariant::Legacy => "api/v1",
            ScanConfigVariant::V2 => "api/v2",
        }
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, PlatformError> {
        let mut request = self
            .client
            .request(method, self.endpoint(path))
            .header("Accept", "application/json");
        if let Some(token) = &self.connection.api_token {
            request = request.header("X-API-KEY", token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to contact the platform at {path}"))?;
        let status = response.status();

        if status == StatusCode::CONFLICT {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            if body.get("code").and_then(Value::as_i64) == Some(109) {
                return Err(PlatformError::RateLimited);
            }
            return Err(anyhow!("platform request to {path} failed with 409: {body}").into());
        }
        if !status.is_success() {
            return Err(anyhow!("platform request to {path} failed with {status}").into());
        }
        if response.content_length() == Some(0) {
            return Ok(Value::Null);
        }
        Ok(response
            .json()
            .await
            .with_context(|| format!("failed to decode the platform response from {path}"))?)
    }

    /// Delete tolerating 404, so a second delete of the same resource is a
    /// no-op rather than a fault.
    async fn delete_resource(&self, path: &str) -> Result<(), PlatformError> {
        let mut request = self
            .client
            .delete(self.endpoint(path))
            .header("Accept", "application/json");
        if let Some(token) = &self.connection.api_token {
            request = request.header("X-API-KEY", token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to contact the platform at {path}"))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(anyhow!("platform delete of {path} failed with {status}").into())
    }

    async fn read_assessment(&self, api_id: &str) -> Result<Option<AssessmentSummary>, PlatformError> {
        let value = self
            .request_json(Method::GET, &format!("api/v1/apis/{api_id}"), None)
            .await?;
        let parsed: ResourceResponse = serde_json::from_value(value)
            .context("failed to decode the platform API record")?;
        Ok(parsed.assessment)
    }

    fn baseline_for(&self, api_id: &str) -> DateTime<Utc> {
        self.assessment_baselines
            .get(api_id)
            .map(|entry| *entry.value())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn create_temp_api(&self, raw_oas: &str) -> Result<TempApi, PlatformError> {
        let name = format!("tmp-{}", Uuid::new_v4().simple());

        let collection = self
            .request_json(
                Method::POST,
                "api/v1/collections",
                Some(&json!({ "name": name, "isShared": false })),
            )
            .await?;
        let collection: ResourceResponse = serde_json::from_value(collection)
            .context("failed to decode the created collection")?;

        let api = self
            .request_json(
                Method::POST,
                "api/v1/apis",
                Some(&json!({
                    "cid": collection.desc.id,
                    "name": name,
                    "specfile": Base64Engine.encode(raw_oas),
                })),
            )
            .await?;
        let api: ResourceResponse =
            serde_json::from_value(api).context("failed to decode the created API")?;

        // Baseline captured before any audit read: a report older than this
        // belongs to a previous assessment of a reused id and is never valid.
        let baseline = api
            .assessment
            .as_ref()
            .and_then(|assessment| assessment.last)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        self.assessment_baselines
            .insert(api.desc.id.clone(), baseline);

        Ok(TempApi {
            api_id: api.desc.id,
            collection_id: collection.desc.id,
        })
    }

    async fn delete_temp_api(&self, api: &TempApi) -> Result<(), PlatformError> {
        self.delete_resource(&format!("api/v1/apis/{}", api.api_id))
            .await?;
        self.delete_resource(&format!("api/v1/collections/{}", api.collection_id))
            .await?;
        self.assessment_baselines.remove(&api.api_id);
        Ok(())
    }

    async fn get_audit_report(
        &self,
        api_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AuditOutcome, PlatformError> {
        let baseline = self.baseline_for(api_id);

        let ready = poller::poll::<(), PlatformError, _, _>(
            || async move {
                match self.read_assessment(api_id).await? {
                    Some(assessment) if assessment.is_processed => match assessment.last {
                        Some(last) if last > baseline => Ok(PollOutcome::Ready(())),
                        _ => Ok(PollOutcome::Pending),
                    },
                    _ => Ok(PollOutcome::Pending),
                }
            },
            self.timings.audit_interval,
            self.timings.audit_deadline,
            cancel,
        )
        .await?;

        match ready {
            PollResult::Completed(()) => {}
            PollResult::TimedOut => {
                return Err(PlatformError::AuditTimeout {
                    api_id: api_id.to_string(),
                })
            }
            PollResult::Cancelled => return Err(PlatformError::Cancelled),
        }

        let value = self
            .request_json(
                Method::GET,
                &format!("api/v1/apis/{api_id}/assessmentreport"),
                None,
            )
            .await?;
        let encoded = value
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("assessment report response is missing its data field"))?;
        let decoded = Base64Engine
            .decode(encoded.trim())
            .context("failed to decode the assessment report payload")?;
        let report: Value = serde_json::from_slice(&decoded)
            .context("failed to parse the assessment report payload")?;

        let state = match report.get("openapiState").and_then(Value::as_str) {
            Some("valid") => AuditState::Valid,
            Some("pending") => AuditState::Pending,
            _ => AuditState::Invalid,
        };

        Ok(AuditOutcome { state, report })
    }

    async fn publish_scan_config(
        &self,
        api_id: &str,
        variant: ScanConfigVariant,
        config: &Value,
    ) -> Result<ScanConfigToken, PlatformError> {
        let base = Self::api_base(variant);

        let body = match variant {
            ScanConfigVariant::Legacy => json!({
                "name": "updated",
                "file": Base64Engine.encode(config.to_string()),
            }),
            ScanConfigVariant::V2 => json!({
                "name": "updated",
                "configuration": config,
            }),
        };
        self.request_json(
            Method::POST,
            &format!("{base}/apis/{api_id}/scanConfigurations"),
            Some(&body),
        )
        .await?;

        let configs = self
            .request_json(
                Method::GET,
                &format!("{base}/apis/{api_id}/scanConfigurations"),
                None,
            )
            .await?;
        let first = configs
            .pointer("/list/0")
            .ok_or_else(|| anyhow!("no scan configuration listed for API {api_id}"))?;
        let config_id = match variant {
            ScanConfigVariant::Legacy => first.get("scanConfigurationId"),
            ScanConfigVariant::V2 => first.pointer("/configuration/id"),
        }
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("scan configuration listing is missing its id"))?;

        let detail = self
            .request_json(
                Method::GET,
                &format!("{base}/scanConfigurations/{config_id}"),
                None,
            )
            .await?;
        let token = match variant {
            ScanConfigVariant::Legacy => detail.get("scanConfigurationToken"),
            ScanConfigVariant::V2 => detail.get("token"),
        }
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("scan configuration {config_id} carries no token"))?;

        Ok(ScanConfigToken(token.to_string()))
    }

    async fn list_scan_reports(
        &self,
        api_id: &str,
        variant: ScanConfigVariant,
    ) -> Result<Vec<ReportRef>, PlatformError> {
        let base = Self::api_base(variant);
        let value = self
            .request_json(Method::GET, &format!("{base}/apis/{api_id}/scanReports"), None)
            .await?;
        let entries = value
            .pointer("/list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut reports = Vec::with_capacity(entries.len());
        for entry in &entries {
            let task_id = match variant {
                ScanConfigVariant::Legacy => entry.get("taskId"),
                ScanConfigVariant::V2 => entry.pointer("/report/taskId"),
            }
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("scan report listing is missing its task id"))?;
            reports.push(ReportRef {
                task_id: task_id.to_string(),
                variant,
            });
        }
        Ok(reports)
    }

    async fn read_scan_report(&self, report: &ReportRef) -> Result<String, PlatformError> {
        let base = Self::api_base(report.variant);
        let value = self
            .request_json(
                Method::GET,
                &format!("{base}/scanReports/{}", report.task_id),
                None,
            )
            .await?;
        let data = value
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("scan report response is missing its data field"))?;
        Ok(data.to_string())
    }
}
