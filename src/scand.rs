use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ScandManagerConnection;

/// Remote job status as reported by scand-manager. Anything the service
/// reports that we do not recognize keeps the poller waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
    Unknown,
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "pending" => JobStatus::Pending,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        })
    }
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanJob {
    pub name: String,
    pub status: JobStatus,
}

/// The scand-manager job service, at its interface boundary.
#[async_trait]
pub trait JobServiceApi: Send + Sync {
    async fn create_job(
        &self,
        token: &str,
        platform_service: &str,
        scan_image: &str,
        env: &HashMap<String, String>,
    ) -> Result<ScanJob>;

    async fn read_job_status(&self, name: &str) -> Result<JobStatus>;

    async fn read_job_log(&self, name: &str) -> Result<String>;

    async fn delete_job_status(&self, name: &str) -> Result<()>;
}

pub struct ScandManagerClient {
    client: reqwest::Client,
    connection: ScandManagerConnection,
}

impl ScandManagerClient {
    pub fn new(connection: ScandManagerConnection) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build scand-manager client")?;
        Ok(Self { client, connection })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.connection.url.trim_end_matches('/'), path)
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((name, value)) = &self.connection.auth_header {
            request.header(name, value)
        } else {
            request
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: JobStatus,
}

#[async_trait]
impl JobServiceApi for ScandManagerClient {
    async fn create_job(
        &self,
        token: &str,
        platform_service: &str,
        scan_image: &str,
        env: &HashMap<String, String>,
    ) -> Result<ScanJob> {
        let payload = json!({
            "token": token,
            "platformService": platform_service,
            "scandImage": scan_image,
            "env": env,
        });
        let response = self
            .auth(self.client.post(self.endpoint("api/job")))
            .json(&payload)
            .send()
            .await
            .context("failed to contact scand-manager")?
            .error_for_status()
            .context("scand-manager rejected the job")?;
        response
            .json()
            .await
            .context("failed to decode scand-manager job")
    }

    async fn read_job_status(&self, name: &str) -> Result<JobStatus> {
        let response = self
            .auth(self.client.get(self.endpoint(&format!("api/job/{name}"))))
            .send()
            .await
            .context("failed to reach scand-manager for job status")?
            .error_for_status()
            .context("scand-manager rejected the status read")?;
        let parsed: JobStatusResponse = response
            .json()
            .await
            .context("failed to decode scand-manager job status")?;
        Ok(parsed.status)
    }

    async fn read_job_log(&self, name: &str) -> Result<String> {
        let response = self
            .auth(self.client.get(self.endpoint(&format!("api/logs/{name}"))))
            .send()
            .await
            .context("failed to reach scand-manager for job logs")?
            .error_for_status()
            .context("scand-manager rejected the log fetch")?;
        response.text().await.context("failed to read the log body")
    }

    async fn delete_job_status(&self, name: &str) -> Result<()> {
        self.auth(
            self.client
                .delete(self.endpoint(&format!("api/job/{name}"))),
        )
        .send()
        .await
        .context("failed to reach scand-manager for job deletion")?
        .error_for_status()
        .context("scand-manager rejected the job deletion")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_statuses_map_to_unknown() {
        let status: JobStatus = serde_json::from_str("\"starting\"").unwrap();
        assert_eq!(status, JobStatus::Unknown);
        let status: JobStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert_eq!(status, JobStatus::Succeeded);
    }
}
