use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ScanError;

pub mod docker;
pub mod scand;

pub use docker::ContainerRunner;
pub use scand::JobServiceRunner;

/// Why a runner could not dispatch (or complete) the scan workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub message: String,
    pub log: Option<String>,
}

impl DispatchFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            log: None,
        }
    }
}

/// One of the interchangeable strategies for executing the scan workload.
///
/// `Ok(None)` means the workload was dispatched and the caller should proceed
/// to wait for the report; `Ok(Some(_))` means execution could not even be
/// dispatched or completed and the run must abort now.
#[async_trait]
pub trait ScanRunner: Send + Sync {
    async fn run(
        &self,
        token: &str,
        env: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Option<DispatchFailure>, ScanError>;
}
