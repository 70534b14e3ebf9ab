//! Image stream definition checks
//!
//! Image repositories ship `imagestreams/*.json` definitions next to a
//! `Makefile` whose `VERSIONS =` line lists the supported versions. After a
//! version bump every definition must carry a tag for the newest version and
//! point `latest` at it.

use std::path::{Path, PathBuf};

use imagetest_common::{Error, ResourceKind, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Deserialize)]
struct StreamDocument {
    #[serde(default)]
    spec: StreamSpec,
    /// `List` documents carry the streams here
    #[serde(default)]
    items: Vec<StreamDocument>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamSpec {
    #[serde(default)]
    tags: Vec<TagDocument>,
}

#[derive(Debug, Deserialize)]
struct TagDocument {
    name: String,
    #[serde(default)]
    from: Option<FromDocument>,
}

#[derive(Debug, Deserialize)]
struct FromDocument {
    name: String,
}

impl StreamDocument {
    fn tags(&self) -> Vec<&TagDocument> {
        self.spec
            .tags
            .iter()
            .chain(self.items.iter().flat_map(|item| item.spec.tags.iter()))
            .collect()
    }
}

/// Outcome for one definition file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    pub version_tag_found: bool,
    pub latest_points_to_version: bool,
}

impl FileReport {
    pub fn passed(&self) -> bool {
        self.version_tag_found && self.latest_points_to_version
    }
}

/// `3.11` matches `3.11`, `3.11-el9` and `3.11-ubi9`, but not `3.1`
pub fn matches_version(tag: &str, version: &str) -> bool {
    tag == version
        || tag
            .strip_prefix(version)
            .is_some_and(|rest| rest.starts_with('-'))
}

#[derive(Debug, Clone)]
pub struct ImageStreamFiles {
    dir: PathBuf,
}

impl ImageStreamFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Last entry of the `VERSIONS =` line
    pub fn latest_version(makefile: &Path) -> Result<String> {
        let content = std::fs::read_to_string(makefile)?;
        let latest = content
            .lines()
            .filter_map(|line| line.strip_prefix("VERSIONS ="))
            .last()
            .and_then(|versions| versions.split_whitespace().last())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::extraction(
                    ResourceKind::ImageStream,
                    format!("{} has no VERSIONS line", makefile.display()),
                )
            })?;
        info!("Latest version in {} is {}", makefile.display(), latest);
        Ok(latest)
    }

    /// `*.json` files directly inside the directory, sorted by name
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => Error::Io(io),
                None => Error::InvalidConfig(format!("cannot walk {}", self.dir.display())),
            })?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }

    fn check_file(&self, file: &Path, version: &str) -> Result<FileReport> {
        let content = std::fs::read_to_string(file)?;
        let document: StreamDocument = serde_json::from_str(&content)?;
        let tags = document.tags();

        let version_tag_found = tags.iter().any(|tag| matches_version(&tag.name, version));
        let latest_points_to_version = tags.iter().any(|tag| {
            tag.name == "latest"
                && tag
                    .from
                    .as_ref()
                    .is_some_and(|from| matches_version(&from.name, version))
        });

        debug!(
            "{}: tag for {} {}, latest {}",
            file.display(),
            version,
            if version_tag_found { "found" } else { "missing" },
            if latest_points_to_version { "ok" } else { "wrong" }
        );
        Ok(FileReport {
            file: file.to_path_buf(),
            version_tag_found,
            latest_points_to_version,
        })
    }

    /// Check every definition against `version`
    pub fn check(&self, version: &str) -> Result<Vec<FileReport>> {
        let files = self.files()?;
        if files.is_empty() {
            warn!("No image stream definitions in {}", self.dir.display());
        }
        let reports = files
            .iter()
            .map(|file| self.check_file(file, version))
            .collect::<Result<Vec<_>>>()?;

        let failed = reports.iter().filter(|r| !r.passed()).count();
        if failed == 0 {
            info!("All {} definition(s) carry version {}", reports.len(), version);
        } else {
            warn!("{} of {} definition(s) lack version {}", failed, reports.len(), version);
        }
        Ok(reports)
    }
}
