use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::TargetPlatform;
use crate::envstore::{resolve_map, EnvStore};
use crate::error::ScanError;
use crate::runner::{DispatchFailure, ScanRunner};
use crate::terminal::TerminalRegistry;

const TERMINAL_NAME: &str = "scan";

#[derive(Debug, Clone)]
pub struct ContainerSettings {
    pub scan_image: String,
    pub platform_service: String,
    pub use_host_network: bool,
    pub target_platform: TargetPlatform,
}

/// Launches the scan workload as a local `docker run`, handed to a reusable
/// named terminal. Fire-and-forget: completion is observed only through the
/// platform's report listing, never through the container itself.
pub struct ContainerRunner {
    env_store: Arc<EnvStore>,
    terminals: Arc<TerminalRegistry>,
    settings: ContainerSettings,
}

impl ContainerRunner {
    pub fn new(
        env_store: Arc<EnvStore>,
        terminals: Arc<TerminalRegistry>,
        settings: ContainerSettings,
    ) -> Self {
        Self {
            env_store,
            terminals,
            settings,
        }
    }

    fn build_command(&self, token: &str, env: &HashMap<String, String>) -> String {
        let mut variables: Vec<(String, String)> = env
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        variables.sort();
        variables.push(("SCAN_TOKEN".to_string(), token.to_string()));
        variables.push((
            "PLATFORM_SERVICE".to_string(),
            self.settings.platform_service.clone(),
        ));

        let env_flags = variables
            .iter()
            .map(|(name, value)| format!("-e {name}='{value}'"))
            .collect::<Vec<_>>()
            .join(" ");

        let host_network = if self.settings.use_host_network
            && self.settings.target_platform.supports_host_network()
        {
            "--network host "
        } else {
            ""
        };

        format!(
            "docker run {host_network}--rm {env_flags} {}",
            self.settings.scan_image
        )
    }
}

#[async_trait]
impl ScanRunner for ContainerRunner {
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
        let command = self.build_command(token, &resolved);

        let terminal = self
            .terminals
            .find_or_create(TERMINAL_NAME)
            .await
            .map_err(|err| {
                ScanError::Dispatch {
                    message: format!("Failed to open a terminal for the scan: {err}"),
                    log: None,
                }
            })?;
        terminal
            .lock()
            .await
            .send_text(&command)
            .await
            .map_err(|err| ScanError::Dispatch {
                message: format!("Failed to start the scan container: {err}"),
                log: None,
            })?;

        tracing::info!(image = %self.settings.scan_image, "dispatched scan container");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(use_host_network: bool, target_platform: TargetPlatform) -> ContainerRunner {
        ContainerRunner::new(
            Arc::new(EnvStore::default()),
            Arc::new(TerminalRegistry::new()),
            ContainerSettings {
                scan_image: "42crunch/scand-agent:latest".to_string(),
                platform_service: "services.platform.example.com:8001".to_string(),
                use_host_network,
                target_platform,
            },
        )
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn command_carries_every_variable_and_the_token() {
        let command = runner(false, TargetPlatform::Linux).build_command("T", &env(&[("A", "1")]));
        assert!(command.contains("-e A='1'"), "{command}");
        assert!(command.contains("-e SCAN_TOKEN='T'"), "{command}");
        assert!(
            command.contains("-e PLATFORM_SERVICE='services.platform.example.com:8001'"),
            "{command}"
        );
        assert!(command.ends_with("42crunch/scand-agent:latest"), "{command}");
    }

    #[test]
    fn host_network_flag_requires_both_the_setting_and_a_supported_platform() {
        let command = runner(true, TargetPlatform::Linux).build_command("T", &env(&[]));
        assert!(command.contains("--network host"), "{command}");

        let command = runner(true, TargetPlatform::Freebsd).build_command("T", &env(&[]));
        assert!(command.contains("--network host"), "{command}");

        let command = runner(true, TargetPlatform::Macos).build_command("T", &env(&[]));
        assert!(!command.contains("--network host"), "{command}");

        let command = runner(false, TargetPlatform::Linux).build_command("T", &env(&[]));
        assert!(!command.contains("--network host"), "{command}");
    }
}
