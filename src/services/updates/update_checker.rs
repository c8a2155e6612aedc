use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RELEASES_URL: &str =
    "https://api.github.com/repos/dbdeck/dbdeck/releases/latest";

/// A release newer than the running build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub current_version: String,
    pub latest_version: String,
    pub release_url: String,
    pub release_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    html_url: String,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubError {
    message: String,
}

/// Compares the running version against the latest published release.
#[derive(Debug, Clone)]
pub struct UpdateChecker {
    current_version: String,
    releases_url: String,
}

impl Default for UpdateChecker {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

impl UpdateChecker {
    pub fn new(current_version: impl Into<String>) -> Self {
        Self {
            current_version: current_version.into(),
            releases_url: DEFAULT_RELEASES_URL.to_string(),
        }
    }

    pub fn with_releases_url(mut self, url: impl Into<String>) -> Self {
        self.releases_url = url.into();
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// `Ok(None)` when the running build is current.
    pub async fn check_for_update(&self) -> Result<Option<UpdateInfo>> {
        let url = self.releases_url.clone();
        let body = tokio::task::spawn_blocking(move || fetch(&url))
            .await
            .context("update check task failed")??;

        let release = parse_release(&body)?;
        tracing::debug!(
            "Latest release {} (running {})",
            release.tag_name,
            self.current_version
        );

        let Some(latest_version) = newer_release(&self.current_version, &release.tag_name)?
        else {
            return Ok(None);
        };

        tracing::info!("Update available: {}", latest_version);
        Ok(Some(UpdateInfo {
            current_version: self.current_version.clone(),
            latest_version,
            release_url: release.html_url,
            release_notes: release.body.filter(|b| !b.trim().is_empty()),
        }))
    }
}

/// The normalized `latest` version if it is strictly greater than `current`.
/// A leading `v` is ignored on both sides.
pub fn newer_release(current: &str, latest: &str) -> Result<Option<String>> {
    let current_clean = current.trim().trim_start_matches('v');
    let latest_clean = latest.trim().trim_start_matches('v');

    let current = semver::Version::parse(current_clean)
        .with_context(|| format!("failed to parse current version '{current_clean}'"))?;
    let latest = semver::Version::parse(latest_clean)
        .with_context(|| format!("failed to parse latest version '{latest_clean}'"))?;

    Ok((latest > current).then(|| latest.to_string()))
}

fn fetch(url: &str) -> Result<String> {
    let response = smolhttp::Client::new(url)
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?
        .get()
        .headers(vec![
            ("User-Agent".to_string(), "dbdeck-update-checker".to_string()),
            (
                "Accept".to_string(),
                "application/vnd.github.v3+json".to_string(),
            ),
        ])
        .send()
        .map_err(|e| anyhow!("Failed to fetch release: {}", e))?;

    Ok(response.text())
}

fn parse_release(body: &str) -> Result<GitHubRelease> {
    if let Ok(release) = serde_json::from_str::<GitHubRelease>(body) {
        return Ok(release);
    }

    if let Ok(error) = serde_json::from_str::<GitHubError>(body) {
        if error.message.contains("rate limit") {
            return Err(anyhow!("GitHub API rate limit exceeded"));
        }
        if error.message.contains("Not Found") {
            return Err(anyhow!("No releases found"));
        }
        return Err(anyhow!("GitHub API error: {}", error.message));
    }

    Err(anyhow!("Failed to parse GitHub response: {}", body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_release() {
        assert_eq!(
            newer_release("0.1.0", "v0.2.0").unwrap(),
            Some("0.2.0".to_string())
        );
        assert_eq!(newer_release("v1.2.3", "1.2.3").unwrap(), None);
        assert_eq!(newer_release("1.3.0", "v1.2.9").unwrap(), None);
        assert_eq!(
            newer_release("1.0.0-beta.1", "1.0.0").unwrap(),
            Some("1.0.0".to_string())
        );
    }

    #[test]
    fn test_newer_release_rejects_garbage() {
        assert!(newer_release("0.1.0", "nightly").is_err());
        assert!(newer_release("dev", "0.1.0").is_err());
    }

    #[test]
    fn test_parse_release() {
        let body = r#"{"tag_name":"v0.3.0","html_url":"https://example.com/r/0.3.0","body":"notes","assets":[]}"#;
        let release = parse_release(body).unwrap();
        assert_eq!(release.tag_name, "v0.3.0");
        assert_eq!(release.html_url, "https://example.com/r/0.3.0");
        assert_eq!(release.body.as_deref(), Some("notes"));
    }

    #[test]
    fn test_parse_release_errors() {
        let limited = r#"{"message":"API rate limit exceeded for 1.2.3.4"}"#;
        assert!(
            parse_release(limited)
                .unwrap_err()
                .to_string()
                .contains("rate limit")
        );

        let missing = r#"{"message":"Not Found","documentation_url":"x"}"#;
        assert_eq!(
            parse_release(missing).unwrap_err().to_string(),
            "No releases found"
        );

        assert!(parse_release("<html>").is_err());
    }

    #[test]
    fn test_checker_builders() {
        let checker = UpdateChecker::new("1.0.0").with_releases_url("http://127.0.0.1:1/latest");
        assert_eq!(checker.current_version(), "1.0.0");
        assert_eq!(checker.releases_url, "http://127.0.0.1:1/latest");
        assert_eq!(
            UpdateChecker::default().current_version(),
            env!("CARGO_PKG_VERSION")
        );
    }
}
