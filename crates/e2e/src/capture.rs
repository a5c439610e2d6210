//! Screenshot capture
//!
//! Capture is best effort: a failed screenshot yields `None` and a warning,
//! never an error that could hide the failure being documented.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::session::Session;

/// Raw PNG bytes from the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    png: Vec<u8>,
}

impl Screenshot {
    pub fn from_png(png: Vec<u8>) -> Self {
        Self { png }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.png
    }

    /// Base64 payload for inline embedding
    pub fn encoded(&self) -> String {
        STANDARD.encode(&self.png)
    }

    pub fn sha256(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.png);
        hex::encode(hasher.finalize())
    }

    pub fn to_embedded(&self) -> EmbeddedScreenshot {
        EmbeddedScreenshot {
            base64_png: self.encoded(),
            sha256: self.sha256(),
        }
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.png)
    }
}

/// Screenshot as stored inside a report entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedScreenshot {
    pub base64_png: String,
    pub sha256: String,
}

/// File name for a screenshot of `name` taken now: `<name>_<yyyyMMdd_HHmmss>.png`.
pub fn artifact_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}_{}.png", safe, Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Takes screenshots from a session.
#[derive(Debug, Clone)]
pub struct ArtifactCapture {
    artifacts_dir: PathBuf,
}

impl ArtifactCapture {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Screenshot held in memory, for embedding in the report
    pub async fn capture(&self, session: &Session) -> Option<Screenshot> {
        match session.driver().screenshot_png().await {
            Ok(png) => Some(Screenshot::from_png(png)),
            Err(e) => {
                warn!("Screenshot capture failed: {}", e);
                None
            }
        }
    }

    /// Screenshot as a base64 payload
    pub async fn capture_as_encoded(&self, session: &Session) -> Option<String> {
        self.capture(session).await.map(|s| s.encoded())
    }

    /// Screenshot written under the artifacts directory
    pub async fn capture_to_file(&self, session: &Session, name: &str) -> Option<PathBuf> {
        let screenshot = self.capture(session).await?;
        let path = self.artifacts_dir.join(artifact_file_name(name));
        match screenshot.write_to(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Screenshot saved");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to save screenshot: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::error::DriverError;
    use crate::mode::ExecutionMode;
    use crate::testing::{RecordingDriver, FAKE_PNG};
    use std::sync::Arc;

    fn session(driver: Arc<RecordingDriver>) -> Session {
        Session::new(driver, ExecutionMode::Headless, TimingConfig::immediate())
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let name = artifact_file_name("login / bad pw");
        assert!(name.starts_with("login___bad_pw_"));
        assert!(name.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_capture_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let capture = ArtifactCapture::new(dir.path().join("shots"));
        let session = session(Arc::new(RecordingDriver::new()));

        let path = capture.capture_to_file(&session, "checkout").await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), FAKE_PNG);
    }

    #[tokio::test]
    async fn test_capture_after_close_is_none() {
        let capture = ArtifactCapture::new("unused");
        let session = session(Arc::new(RecordingDriver::new()));
        session.close().await.unwrap();

        assert!(capture.capture_as_encoded(&session).await.is_none());
        assert!(capture.capture_to_file(&session, "x").await.is_none());
    }

    #[tokio::test]
    async fn test_capture_error_is_swallowed() {
        let driver = Arc::new(RecordingDriver::new());
        driver.fail_screenshots(DriverError::Other("renderer crashed".into()));
        let capture = ArtifactCapture::new("unused");
        assert!(capture.capture(&session(driver)).await.is_none());
    }

    #[test]
    fn test_embedded_payload() {
        let shot = Screenshot::from_png(FAKE_PNG.to_vec());
        let embedded = shot.to_embedded();
        assert_eq!(STANDARD.decode(&embedded.base64_png).unwrap(), FAKE_PNG);
        assert_eq!(embedded.sha256.len(), 64);
    }
}
