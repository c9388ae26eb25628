use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::envstore::{resolve_map, EnvStore};
use crate::error::ScanError;
use crate::poller::{self, PollOutcome, PollResult};
use crate::runner::{DispatchFailure, ScanRunner};
use crate::scand::{JobServiceApi, JobStatus};

/// Submits the scan workload to scand-manager and waits for a terminal job
/// status, fetching the job log when the job fails.
pub struct JobServiceRunner {
    scand: Arc<dyn JobServiceApi>,
    env_store: Arc<EnvStore>,
    platform_service: String,
    scan_image: String,
    interval: Duration,
    deadline: Duration,
}

impl JobServiceRunner {
    pub fn new(
        scand: Arc<dyn JobServiceApi>,
        env_store: Arc<EnvStore>,
        platform_service: String,
        scan_image: String,
        interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            scand,
            env_store,
            platform_service,
            scan_image,
            interval,
            deadline,
        }
    }
}

#[async_trait]
impl ScanRunner for JobServiceRunner {
    async fn run(
        &self,
        token: &str,
        env: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Option<DispatchFailure>, ScanError> {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let resolved = resolve_map(env, &self.env_store.resolve_all());

        let job = match self
            .scand
            .create_job(token, &self.platform_service, &self.scan_image, &resolved)
            .await
        {
            Ok(job) => job,
            Err(err) => {
                return Ok(Some(DispatchFailure::new(format!(
                    "Failed to create scand-manager job: {err:#}"
                ))))
            }
        };

        tracing::info!(job = %job.name, "created scand-manager job");

        if job.status == JobStatus::Failed {
            return Ok(Some(DispatchFailure::new(format!(
                "Failed to create scand-manager job \"{}\", received unexpected status: {}",
                job.name,
                job.status.as_str()
            ))));
        }

        let scand = Arc::clone(&self.scand);
        let name = job.name.clone();
        let waited = poller::poll::<Option<DispatchFailure>, anyhow::Error, _, _>(
            move || {
                let scand = Arc::clone(&scand);
                let name = name.clone();
                async move {
                    match scand.read_job_status(&name).await? {
                        JobStatus::Succeeded => Ok(PollOutcome::Ready(None)),
                        JobStatus::Failed => {
                            let log = match scand.read_job_log(&name).await {
                                Ok(log) => Some(log),
                                Err(err) => {
                                    tracing::warn!(?err, job = %name, "failed to fetch the job log");
                                    None
                                }
                            };
                            Ok(PollOutcome::Ready(Some(DispatchFailure {
                                message: format!("Scand-manager job \"{name}\" has failed"),
                                log,
                            })))
                        }
                        JobStatus::Pending | JobStatus::Unknown => Ok(PollOutcome::Pending),
                    }
                }
            },
            self.interval,
            self.deadline,
            cancel,
        )
        .await;

        match waited {
            Err(err) => Ok(Some(DispatchFailure::new(format!(
                "Failed to read scand-manager job status: {err:#}"
            )))),
            Ok(PollResult::TimedOut) => Ok(Some(DispatchFailure::new(format!(
                "Timed out waiting for scand-manager job \"{}\" to finish",
                job.name
            )))),
            Ok(PollResult::Cancelled) => Err(ScanError::Cancelled),
            Ok(PollResult::Completed(Some(failure))) => Ok(Some(failure)),
            Ok(PollResult::Completed(None)) => {
                // The job finished; its status record is only observability
                // residue, so deletion is best-effort.
                if let Err(err) = self.scand.delete_job_status(&job.name).await {
                    tracing::warn!(?err, job = %job.name, "failed to delete scand-manager job status");
                }
                Ok(None)
            }
        }
    }
}
