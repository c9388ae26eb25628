use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use scan_host::envstore::EnvStore;
use scan_host::runner::{JobServiceRunner, ScanRunner};
use scan_host::scand::{JobServiceApi, JobStatus, ScanJob};

struct FakeJobService {
    initial_status: JobStatus,
    fail_submission: bool,
    statuses: Mutex<VecDeque<JobStatus>>,
    log: String,
    status_reads: AtomicUsize,
    deletions: AtomicUsize,
    submitted_env: Mutex<Option<HashMap<String, String>>>,
}

impl FakeJobService {
    fn new(initial_status: JobStatus, statuses: Vec<JobStatus>) -> Self {
        Self {
            initial_status,
            fail_submission: false,
            statuses: Mutex::new(statuses.into()),
            log: "scand: engine exited with failure".to_string(),
            status_reads: AtomicUsize::new(0),
            deletions: AtomicUsize::new(0),
            submitted_env: Mutex::new(None),
        }
    }
}

#[async_trait]
impl JobServiceApi for FakeJobService {
    async fn create_job(
        &self,
        _token: &str,
        _platform_service: &str,
        _scan_image: &str,
        env: &HashMap<String, String>,
    ) -> Result<ScanJob> {
        if self.fail_submission {
            return Err(anyhow!("connection refused"));
        }
        *self.submitted_env.lock().await = Some(env.clone());
        Ok(ScanJob {
            name: "scand-job-1".to_string(),
            status: self.initial_status,
        })
    }

    async fn read_job_status(&self, _name: &str) -> Result<JobStatus> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .await
            .pop_front()
            .unwrap_or(JobStatus::Unknown))
    }

    async fn read_job_log(&self, _name: &str) -> Result<String> {
        Ok(self.log.clone())
    }

    async fn delete_job_status(&self, _name: &str) -> Result<()> {
        self.deletions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn runner(scand: Arc<FakeJobService>, env_store: EnvStore) -> JobServiceRunner {
    JobServiceRunner::new(
        scand,
        Arc::new(env_store),
        "services.test:8001".to_string(),
        "42crunch/scand-agent:latest".to_string(),
        Duration::from_millis(1),
        Duration::from_millis(30),
    )
}

#[tokio::test]
async fn job_that_eventually_succeeds_yields_no_failure() {
    let scand = Arc::new(FakeJobService::new(
        JobStatus::Unknown,
        vec![JobStatus::Unknown, JobStatus::Unknown, JobStatus::Succeeded],
    ));
    let failure = runner(Arc::clone(&scand), EnvStore::default())
        .run("T", &HashMap::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(failure, None);
    assert_eq!(scand.status_reads.load(Ordering::SeqCst), 3);
    // completed job records are removed as a courtesy
    assert_eq!(scand.deletions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_job_surfaces_the_fetched_log() {
    let scand = Arc::new(FakeJobService::new(
        JobStatus::Unknown,
        vec![JobStatus::Unknown, JobStatus::Failed],
    ));
    let failure = runner(Arc::clone(&scand), EnvStore::default())
        .run("T", &HashMap::new(), &CancellationToken::new())
        .await
        .unwrap()
        .expect("a failed job must abort the run");
    assert!(failure.message.contains("has failed"), "{}", failure.message);
    assert_eq!(
        failure.log.as_deref(),
        Some("scand: engine exited with failure")
    );
    assert_eq!(scand.deletions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn initially_failed_job_aborts_without_polling() {
    let scand = Arc::new(FakeJobService::new(JobStatus::Failed, vec![]));
    let failure = runner(Arc::clone(&scand), EnvStore::default())
        .run("T", &HashMap::new(), &CancellationToken::new())
        .await
        .unwrap()
        .expect("an initially failed job must abort the run");
    assert!(
        failure.message.contains("received unexpected status"),
        "{}",
        failure.message
    );
    assert_eq!(scand.status_reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn submission_faults_become_dispatch_failures() {
    let mut service = FakeJobService::new(JobStatus::Unknown, vec![]);
    service.fail_submission = true;
    let failure = runner(Arc::new(service), EnvStore::default())
        .run("T", &HashMap::new(), &CancellationToken::new())
        .await
        .unwrap()
        .expect("submission fault must abort the run");
    assert!(
        failure.message.contains("Failed to create scand-manager job"),
        "{}",
        failure.message
    );
}

#[tokio::test]
async fn job_stuck_in_unknown_times_out_with_a_failure() {
    let scand = Arc::new(FakeJobService::new(JobStatus::Unknown, vec![]));
    let failure = runner(Arc::clone(&scand), EnvStore::default())
        .run("T", &HashMap::new(), &CancellationToken::new())
        .await
        .unwrap()
        .expect("a job that never finishes must abort the run");
    assert!(failure.message.contains("Timed out"), "{}", failure.message);
    assert_eq!(scand.status_reads.load(Ordering::SeqCst), 30);
}

#[tokio::test]
async fn environment_references_are_resolved_before_submission() {
    let scand = Arc::new(FakeJobService::new(
        JobStatus::Unknown,
        vec![JobStatus::Succeeded],
    ));
    let store = EnvStore::with_values(
        [("apiUser".to_string(), "alice".to_string())]
            .into_iter()
            .collect(),
    );
    let env: HashMap<String, String> = [
        ("SCAN_USER".to_string(), "{{apiUser}}".to_string()),
        ("SCAN_HOST".to_string(), "{{unknownHost}}".to_string()),
    ]
    .into_iter()
    .collect();

    runner(Arc::clone(&scand), store)
        .run("T", &env, &CancellationToken::new())
        .await
        .unwrap();

    let submitted = scand.submitted_env.lock().await.clone().unwrap();
    assert_eq!(submitted["SCAN_USER"], "alice");
    assert_eq!(submitted["SCAN_HOST"], "{{unknownHost}}");
}
