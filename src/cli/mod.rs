//! Command-line surface.
//!
//! The bridge has no subcommands: it loads the config file and runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::config::DEFAULT_CONFIG_PATH;

/// Where the latest release metadata is fetched from.
pub const DEFAULT_RELEASE_URL: &str =
    "https://api.github.com/repos/your-org/grunichat-onebot/releases/latest";

const RELEASE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "hubbridge")]
#[command(about = "Bridge OneBot group chats and a GRUniChat message hub")]
#[command(version)]
pub struct Cli {
    /// Configuration file path (created with defaults if missing)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Skip the release check at startup
    #[arg(long)]
    pub no_check_update: bool,

    /// Release metadata endpoint used by the release check
    #[arg(long, env = "HUBBRIDGE_RELEASE_URL", default_value = DEFAULT_RELEASE_URL, hide = true)]
    pub release_url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    html_url: String,
}

/// Outcome of comparing the running version with the latest release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate,
    Available { latest: String, url: String },
}

fn compare_versions(current: &str, latest_tag: &str, url: &str) -> UpdateStatus {
    let current = current.trim_start_matches('v');
    let latest = latest_tag.trim_start_matches('v');
    if latest == current {
        UpdateStatus::UpToDate
    } else {
        UpdateStatus::Available {
            latest: latest.to_string(),
            url: url.to_string(),
        }
    }
}

/// Fetch the latest release and compare it with this build.
pub async fn check_for_updates(release_url: &str) -> Result<UpdateStatus, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(RELEASE_CHECK_TIMEOUT)
        .user_agent(concat!("hubbridge/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let release: Release = client
        .get(release_url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(compare_versions(
        env!("CARGO_PKG_VERSION"),
        &release.tag_name,
        &release.html_url,
    ))
}

/// Run the release check and log the result. Never fails.
pub async fn report_updates(release_url: &str) {
    match check_for_updates(release_url).await {
        Ok(UpdateStatus::UpToDate) => tracing::info!("Running the latest release"),
        Ok(UpdateStatus::Available { latest, url }) => tracing::info!(
            current = env!("CARGO_PKG_VERSION"),
            latest = %latest,
            url = %url,
            "A newer release is available"
        ),
        Err(e) => tracing::warn!(error = %e, "Release check failed"),
    }
}

/// Tell the user a default config was written and what to edit.
pub fn print_first_run_notice(path: &Path) {
    println!();
    println!("Created default configuration file: {}", path.display());
    println!("Edit at least these settings, then start again:");
    println!("  - grunichat.url: hub server address");
    println!("  - grunichat.client_id: identity of this bridge on the hub");
    println!("  - onebot.websocket_url: OneBot gateway address");
    println!("  - filter.service_groups: groups the bridge serves");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["hubbridge"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!cli.no_check_update);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "hubbridge",
            "--config",
            "/etc/bridge.yaml",
            "--no-check-update",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/bridge.yaml"));
        assert!(cli.no_check_update);
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.2.0", "v1.2.0", "u"), UpdateStatus::UpToDate);
        assert_eq!(
            compare_versions("1.2.0", "v1.3.0", "https://example.invalid/r"),
            UpdateStatus::Available {
                latest: "1.3.0".to_string(),
                url: "https://example.invalid/r".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_release_endpoint_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/latest", listener.local_addr().unwrap());
        drop(listener);
        assert!(check_for_updates(&url).await.is_err());
    }
}
