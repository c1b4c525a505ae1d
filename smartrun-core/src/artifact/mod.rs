//! Artifact probe — classifies on-disk artifacts before each stage.
//!
//! Four states:
//! - `Absent`: the path does not exist
//! - `EmptyOrMissing`: it exists but is zero-length or cannot be read
//! - `PresentStale`: non-empty, but its freshness predicate rejects it
//! - `PresentFresh`: non-empty and the predicate (if any) accepts it
//!
//! Probing only reads, so it is safe to repeat and to call from several
//! threads. The one write in this module, [`set_aside`], is invoked by the
//! orchestrator just before a stage regenerates a stale artifact.

pub mod schema;

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use schema::{ColumnSchema, Freshness, FreshnessPredicate, ProbeError};

/// Suffix appended to the file stem of a stale artifact moved aside.
pub const ASIDE_SUFFIX: &str = "_old";

/// A declared input or output of a stage.
#[derive(Debug, Clone)]
pub struct ArtifactSpec {
    pub path: PathBuf,
    pub freshness: Option<Arc<dyn FreshnessPredicate>>,
    /// Field delimiter when the artifact is a delimited table.
    pub delimiter: u8,
}

impl ArtifactSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            freshness: None,
            delimiter: b',',
        }
    }

    /// Set before `with_columns` so the column check reads the same format.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_freshness(mut self, predicate: impl FreshnessPredicate + 'static) -> Self {
        self.freshness = Some(Arc::new(predicate));
        self
    }

    /// Shorthand for a CSV artifact that must carry the given header columns.
    pub fn with_columns<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let delimiter = self.delimiter;
        self.with_freshness(ColumnSchema::new(columns).with_delimiter(delimiter))
    }

    pub fn probe(&self) -> ArtifactState {
        probe_path(&self.path, self.freshness.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ArtifactState {
    Absent,
    EmptyOrMissing,
    PresentStale { reason: String },
    PresentFresh,
}

impl ArtifactState {
    pub fn is_fresh(&self) -> bool {
        matches!(self, ArtifactState::PresentFresh)
    }

    /// True when the artifact cannot serve as a stage input.
    pub fn is_missing(&self) -> bool {
        matches!(self, ArtifactState::Absent | ArtifactState::EmptyOrMissing)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ArtifactState::Absent => "absent",
            ArtifactState::EmptyOrMissing => "empty",
            ArtifactState::PresentStale { .. } => "stale",
            ArtifactState::PresentFresh => "fresh",
        }
    }
}

/// An artifact path paired with the state observed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbedArtifact {
    pub path: PathBuf,
    #[serde(flatten)]
    pub state: ArtifactState,
}

/// Classify one path.
pub fn probe_path(path: &Path, freshness: Option<&dyn FreshnessPredicate>) -> ArtifactState {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return ArtifactState::Absent,
        Err(_) => return ArtifactState::EmptyOrMissing,
    };

    // Metadata alone does not prove the content can be opened.
    let non_empty = if meta.is_file() {
        meta.len() > 0 && fs::File::open(path).is_ok()
    } else if meta.is_dir() {
        fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    } else {
        false
    };
    if !non_empty {
        return ArtifactState::EmptyOrMissing;
    }

    match freshness.map(|p| p.check(path)) {
        None | Some(Ok(Freshness::Fresh)) => ArtifactState::PresentFresh,
        Some(Ok(Freshness::Stale(reason))) => ArtifactState::PresentStale { reason },
        Some(Err(_)) => ArtifactState::EmptyOrMissing,
    }
}

/// Probe every declared artifact, preserving declaration order.
pub fn probe_all(specs: &[ArtifactSpec]) -> Vec<ProbedArtifact> {
    specs
        .iter()
        .map(|spec| ProbedArtifact {
            path: spec.path.clone(),
            state: spec.probe(),
        })
        .collect()
}

/// Sibling path a stale artifact is moved to: `features.csv` → `features_old.csv`.
pub fn aside_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{ASIDE_SUFFIX}.{}", ext.to_string_lossy()),
        None => format!("{stem}{ASIDE_SUFFIX}"),
    };
    path.with_file_name(name)
}

/// Rename a stale artifact to its `_old` sibling and return the new path.
///
/// Only the most recent generation is kept: an existing backup is replaced.
pub fn set_aside(path: &Path) -> io::Result<PathBuf> {
    let target = aside_path(path);
    match fs::symlink_metadata(&target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target)?,
        Ok(_) => fs::remove_file(&target)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(path, &target)?;
    Ok(target)
}
