use std::fs;
use std::time::Duration;

use once_cell::sync::Lazy;

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// Scan execution backend. Defaults to `docker`.
pub static SCAN_RUNTIME: Lazy<String> =
    Lazy::new(|| std::env::var("SCAN_RUNTIME").unwrap_or_else(|_| "docker".to_string()));

/// Image used to execute the scan workload.
pub static SCAN_IMAGE: Lazy<String> = Lazy::new(|| {
    std::env::var("SCAN_IMAGE").unwrap_or_else(|_| "42crunch/scand-agent:latest".to_string())
});

/// When set to a truthy value, container runs attach to the host network on
/// platforms that support it. Defaults to `false`.
pub static USE_HOST_NETWORK: Lazy<bool> = Lazy::new(|| {
    std::env::var("USE_HOST_NETWORK")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// Operating system the scan container is launched on. Host networking is
/// only honored on `linux` and `freebsd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPlatform {
    Linux,
    Freebsd,
    Macos,
    Windows,
    Other,
}

impl TargetPlatform {
    pub fn supports_host_network(self) -> bool {
        matches!(self, TargetPlatform::Linux | TargetPlatform::Freebsd)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetPlatform::Linux => "linux",
            TargetPlatform::Freebsd => "freebsd",
            TargetPlatform::Macos => "macos",
            TargetPlatform::Windows => "windows",
            TargetPlatform::Other => "other",
        }
    }
}

fn parse_target_platform() -> TargetPlatform {
    match std::env::var("TARGET_PLATFORM") {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "linux" => TargetPlatform::Linux,
            "freebsd" => TargetPlatform::Freebsd,
            "macos" | "darwin" => TargetPlatform::Macos,
            "windows" => TargetPlatform::Windows,
            _ => TargetPlatform::Other,
        },
        Err(_) => {
            if cfg!(target_os = "linux") {
                TargetPlatform::Linux
            } else if cfg!(target_os = "freebsd") {
                TargetPlatform::Freebsd
            } else if cfg!(target_os = "macos") {
                TargetPlatform::Macos
            } else if cfg!(target_os = "windows") {
                TargetPlatform::Windows
            } else {
                TargetPlatform::Other
            }
        }
    }
}

pub static TARGET_PLATFORM: Lazy<TargetPlatform> = Lazy::new(parse_target_platform);

/// How the platform services endpoint handed to the scan workload is chosen:
/// derived from the platform URL, or configured explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicesSource {
    Auto,
    Manual,
}

#[derive(Debug, Clone)]
pub struct PlatformConnection {
    pub platform_url: String,
    pub api_token: Option<String>,
    pub services_source: ServicesSource,
    pub manual_services: Option<String>,
}

impl PlatformConnection {
    /// The services endpoint injected into the scan workload. The automatic
    /// form is `services.<platform-host>:8001`.
    pub fn resolved_services(&self) -> Option<String> {
        match self.services_source {
            ServicesSource::Manual => self.manual_services.clone(),
            ServicesSource::Auto => {
                let parsed = url::Url::parse(&self.platform_url).ok()?;
                let host = parsed.host_str()?;
                Some(format!("services.{host}:8001"))
            }
        }
    }
}

pub fn platform_connection_from_env() -> PlatformConnection {
    let platform_url = read_optional_env("PLATFORM_URL")
        .unwrap_or_else(|| "https://platform.42crunch.com".to_string());

    let manual_services = read_optional_env("PLATFORM_SERVICES");
    let services_source = match manual_services {
        Some(_) => ServicesSource::Manual,
        None => ServicesSource::Auto,
    };

    PlatformConnection {
        platform_url,
        api_token: read_secret_env("PLATFORM_API_TOKEN", "PLATFORM_API_TOKEN_FILE"),
        services_source,
        manual_services,
    }
}

#[derive(Debug, Clone)]
pub struct ScandManagerConnection {
    pub url: String,
    pub auth_header: Option<(String, String)>,
}

pub fn scand_manager_from_env() -> ScandManagerConnection {
    let url =
        read_optional_env("SCAND_MANAGER_URL").unwrap_or_else(|| "http://localhost:8090".to_string());
    let auth_header = match (
        read_optional_env("SCAND_MANAGER_HEADER_NAME"),
        read_secret_env("SCAND_MANAGER_HEADER_VALUE", "SCAND_MANAGER_HEADER_VALUE_FILE"),
    ) {
        (Some(name), Some(value)) => Some((name, value)),
        _ => None,
    };
    ScandManagerConnection { url, auth_header }
}

/// Polling cadence for the three bounded waits of a scan run. Parameters, not
/// constants, so call sites can diverge without duplicating the loop.
#[derive(Debug, Clone)]
pub struct ScanTimings {
    pub audit_interval: Duration,
    pub audit_deadline: Duration,
    pub job_interval: Duration,
    pub job_deadline: Duration,
    pub report_interval: Duration,
    pub report_deadline: Duration,
}

impl Default for ScanTimings {
    fn default() -> Self {
        Self {
            audit_interval: Duration::from_millis(1000),
            audit_deadline: Duration::from_millis(60000),
            job_interval: Duration::from_millis(1000),
            job_deadline: Duration::from_millis(30000),
            report_interval: Duration::from_millis(1000),
            report_deadline: Duration::from_millis(30000),
        }
    }
}

pub fn scan_timings_from_env() -> ScanTimings {
    let defaults = ScanTimings::default();
    ScanTimings {
        audit_interval: millis_env("AUDIT_POLL_INTERVAL_MS", defaults.audit_interval),
        audit_deadline: millis_env("AUDIT_POLL_DEADLINE_MS", defaults.audit_deadline),
        job_interval: millis_env("JOB_POLL_INTERVAL_MS", defaults.job_interval),
        job_deadline: millis_env("JOB_POLL_DEADLINE_MS", defaults.job_deadline),
        report_interval: millis_env("REPORT_POLL_INTERVAL_MS", defaults.report_interval),
        report_deadline: millis_env("REPORT_POLL_DEADLINE_MS", defaults.report_deadline),
    }
}

fn millis_env(key: &str, default_value: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
        .unwrap_or(default_value)
}

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_secret_env(value_key: &str, file_key: &str) -> Option<String> {
    if let Some(path) = read_optional_env(file_key) {
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let trimmed = contents.trim().to_string();
                if !trimmed.is_empty() {
                    return Some(trimmed);
                }
            }
            Err(err) => panic!("failed to read {file_key} from {path}: {err}"),
        }
    }

    read_optional_env(value_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn automatic_services_endpoint_is_derived_from_the_platform_host() {
        let connection = PlatformConnection {
            platform_url: "https://platform.example.com".to_string(),
            api_token: None,
            services_source: ServicesSource::Auto,
            manual_services: None,
        };
        assert_eq!(
            connection.resolved_services().as_deref(),
            Some("services.platform.example.com:8001")
        );
    }

    #[test]
    fn manual_services_endpoint_wins_when_configured() {
        let connection = PlatformConnection {
            platform_url: "https://platform.example.com".to_string(),
            api_token: None,
            services_source: ServicesSource::Manual,
            manual_services: Some("services.internal:8001".to_string()),
        };
        assert_eq!(
            connection.resolved_services().as_deref(),
            Some("services.internal:8001")
        );
    }

    #[test]
    fn host_network_support_is_limited_to_linux_and_freebsd() {
        assert!(TargetPlatform::Linux.supports_host_network());
        assert!(TargetPlatform::Freebsd.supports_host_network());
        assert!(!TargetPlatform::Macos.supports_host_network());
        assert!(!TargetPlatform::Windows.supports_host_network());
    }
}
