//! Manifest sources
//!
//! Manifests and templates come either from a local file or from an
//! http(s) URL. Remote ones are downloaded into a temporary file that lives
//! as long as the returned [`LocalManifest`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use imagetest_common::{Error, ResourceKind, Result};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Path(PathBuf),
    Url(String),
}

impl ManifestSource {
    /// Classify a command-line style reference
    pub fn parse(reference: &str) -> Self {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            ManifestSource::Url(reference.to_string())
        } else {
            ManifestSource::Path(PathBuf::from(reference))
        }
    }

    /// Make the manifest available on the local filesystem
    pub fn fetch(&self) -> Result<LocalManifest> {
        match self {
            ManifestSource::Path(path) => {
                if !path.is_file() {
                    return Err(Error::NotFound {
                        kind: ResourceKind::ClusterObject,
                        id: path.display().to_string(),
                    });
                }
                Ok(LocalManifest {
                    path: path.clone(),
                    _download: None,
                })
            }
            ManifestSource::Url(url) => {
                let file = download(url)?;
                Ok(LocalManifest {
                    path: file.path().to_path_buf(),
                    _download: Some(file),
                })
            }
        }
    }
}

impl From<&str> for ManifestSource {
    fn from(reference: &str) -> Self {
        ManifestSource::parse(reference)
    }
}

impl From<PathBuf> for ManifestSource {
    fn from(path: PathBuf) -> Self {
        ManifestSource::Path(path)
    }
}

impl std::fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestSource::Path(path) => write!(f, "{}", path.display()),
            ManifestSource::Url(url) => write!(f, "{url}"),
        }
    }
}

/// A manifest on disk; a downloaded copy is deleted on drop
#[derive(Debug)]
pub struct LocalManifest {
    path: PathBuf,
    _download: Option<NamedTempFile>,
}

impl LocalManifest {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep generated content (e.g. processed templates) in a temp file
    pub fn from_content(content: &str, suffix: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("imagetest-manifest-")
            .suffix(suffix)
            .tempfile()?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(LocalManifest {
            path: file.path().to_path_buf(),
            _download: Some(file),
        })
    }
}

fn suffix_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if path.ends_with(".json") {
        ".json"
    } else if path.ends_with(".yml") {
        ".yml"
    } else {
        ".yaml"
    }
}

fn download(url: &str) -> Result<NamedTempFile> {
    info!("Downloading manifest {}", url);
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| Error::Download(format!("{url}: {e}")))?;

    let body = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .map_err(|e| Error::Download(format!("{url}: {e}")))?;

    let mut file = tempfile::Builder::new()
        .prefix("imagetest-manifest-")
        .suffix(suffix_for(url))
        .tempfile()?;
    file.write_all(body.as_bytes())?;
    file.flush()?;
    debug!("Saved {} ({} bytes) to {}", url, body.len(), file.path().display());
    Ok(file)
}
