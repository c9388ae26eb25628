use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as Base64Engine;
use base64::Engine;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ScanTimings;
use crate::error::ScanError;
use crate::messages::{ScanConfigVariant, ScanRunRequest, ScanViewMessage};
use crate::platform::{AuditState, PlatformApi, PlatformError, ReportRef, TempApi};
use crate::poller::{self, PollOutcome, PollResult};
use crate::runner::ScanRunner;

/// Sequences one scan run: provision a temporary API, gate on the security
/// audit, publish the scan configuration, dispatch execution, wait for the
/// report, and reclaim the temporary API on every exit path.
///
/// Runs are independent; any number may proceed concurrently, each owning its
/// own temporary API.
pub struct ScanOrchestrator {
    platform: Arc<dyn PlatformApi>,
    runner: Arc<dyn ScanRunner>,
    timings: ScanTimings,
}

impl ScanOrchestrator {
    pub fn new(
        platform: Arc<dyn PlatformApi>,
        runner: Arc<dyn ScanRunner>,
        timings: ScanTimings,
    ) -> Self {
        Self {
            platform,
            runner,
            timings,
        }
    }

    /// Run to a terminal state and reduce the outcome to the caller contract.
    pub async fn run(&self, request: ScanRunRequest, cancel: &CancellationToken) -> ScanViewMessage {
        match self.execute(request, cancel).await {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(error = %err, "scan run failed");
                ScanViewMessage::ShowGeneralError(err.into_general_error())
            }
        }
    }

    async fn execute(
        &self,
        request: ScanRunRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanViewMessage, ScanError> {
        tracing::info!("starting API conformance scan");

        let api = self
            .platform
            .create_temp_api(&request.raw_oas)
            .await
            .map_err(|err| match err {
                PlatformError::RateLimited => ScanError::RateLimited,
                other => ScanError::Provision(other.into()),
            })?;

        tracing::info!(api_id = %api.api_id, "created temporary API, waiting for security audit");

        let outcome = self.run_with_api(&api, request, cancel).await;

        // Exactly one deletion per created API, on every exit path. A fault
        // here is logged and never replaces the primary outcome.
        if let Err(err) = self.platform.delete_temp_api(&api).await {
            tracing::warn!(?err, api_id = %api.api_id, "failed to clean up temporary API");
        }

        outcome
    }

    async fn run_with_api(
        &self,
        api: &TempApi,
        request: ScanRunRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanViewMessage, ScanError> {
        let audit = self
            .platform
            .get_audit_report(&api.api_id, cancel)
            .await
            .map_err(|err| match err {
                PlatformError::Cancelled => ScanError::Cancelled,
                timeout @ PlatformError::AuditTimeout { .. } => {
                    ScanError::AuditTimeout(timeout.into())
                }
                other => ScanError::AuditCheck(other.into()),
            })?;
        if audit.state != AuditState::Valid {
            return Err(ScanError::AuditInvalid);
        }

        tracing::info!(api_id = %api.api_id, "security audit check is successful");

        let token = self
            .platform
            .publish_scan_config(&api.api_id, request.variant, &request.config)
            .await
            .map_err(|err| match err {
                PlatformError::Cancelled => ScanError::Cancelled,
                other => ScanError::ConfigPublish(other.into()),
            })?;

        if let Some(failure) = self
            .runner
            .run(token.as_str(), &request.env, cancel)
            .await?
        {
            return Err(ScanError::Dispatch {
                message: failure.message,
                log: failure.log,
            });
        }

        let report_ref = self.wait_for_report(api, request.variant, cancel).await?;

        let encoded = self
            .platform
            .read_scan_report(&report_ref)
            .await
            .map_err(|err| ScanError::ReportFetch(err.into()))?;
        let report = decode_report(&encoded)?;

        tracing::info!(api_id = %api.api_id, "finished API conformance scan");
        Ok(ScanViewMessage::report(report))
    }

    async fn wait_for_report(
        &self,
        api: &TempApi,
        variant: ScanConfigVariant,
        cancel: &CancellationToken,
    ) -> Result<ReportRef, ScanError> {
        let platform = Arc::clone(&self.platform);
        let api_id = api.api_id.clone();
        let waited = poller::poll(
            move || {
                let platform = Arc::clone(&platform);
                let api_id = api_id.clone();
                async move {
                    let mut reports = platform.list_scan_reports(&api_id, variant).await?;
                    if reports.is_empty() {
                        tracing::debug!(api_id = %api_id, "waiting for the scan report to become available");
                        Ok(PollOutcome::Pending)
                    } else {
                        Ok(PollOutcome::Ready(reports.remove(0)))
                    }
                }
            },
            self.timings.report_interval,
            self.timings.report_deadline,
            cancel,
        )
        .await
        .map_err(|err: PlatformError| ScanError::ReportFetch(err.into()))?;

        match waited {
            PollResult::Completed(report) => Ok(report),
            PollResult::TimedOut => Err(ScanError::ReportTimeout),
            PollResult::Cancelled => Err(ScanError::Cancelled),
        }
    }
}

/// Scan reports travel base64-encoded over the wire.
fn decode_report(encoded: &str) -> Result<Value, ScanError> {
    let bytes = Base64Engine
        .decode(encoded.trim())
        .map_err(|err| ScanError::ReportFetch(anyhow::Error::new(err)))?;
    serde_json::from_slice(&bytes).map_err(|err| ScanError::ReportFetch(anyhow::Error::new(err)))
}
