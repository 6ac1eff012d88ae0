use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Serialize;
use tracing::info;

use crate::domain::GeoSeriesAccession;
use crate::error::PrepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheAction {
    Cached,
    Downloaded,
}

/// Project output root (`./.kira-ep`) plus a shared download cache.
#[derive(Debug, Clone)]
pub struct Store {
    project_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, PrepError> {
        let cwd = std::env::current_dir().map_err(|err| PrepError::Filesystem(err.to_string()))?;
        let project_root = Utf8PathBuf::from_path_buf(cwd.join(".kira-ep"))
            .map_err(|_| PrepError::Filesystem("invalid project path".to_string()))?;

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".cache").join("kira-expression-prep"),
                )
                .ok()
            })
            .ok_or_else(|| {
                PrepError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            project_root,
            cache_root,
        })
    }

    pub fn new_with_paths(project_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            project_root,
            cache_root,
        }
    }

    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn cache_series_dir(&self, acc: &GeoSeriesAccession) -> Utf8PathBuf {
        self.cache_root.join("geo").join(acc.as_str())
    }

    pub fn cache_soft_path(&self, acc: &GeoSeriesAccession) -> Utf8PathBuf {
        self.cache_series_dir(acc)
            .join(format!("{}_family.soft", acc.as_str()))
    }

    pub fn cache_file_path(&self, acc: &GeoSeriesAccession, file_name: &str) -> Utf8PathBuf {
        self.cache_series_dir(acc).join(file_name)
    }

    pub fn output_dir(&self, acc: &GeoSeriesAccession) -> Utf8PathBuf {
        self.project_root.join(acc.as_str())
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), PrepError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| PrepError::Filesystem(err.to_string()))
    }

    /// Runs `download` unless `path` already exists. The download lands in a
    /// staging directory next to `path` and is moved into place only when it
    /// succeeds, so an interrupted transfer never looks like a cache hit.
    pub fn ensure_file<F>(path: &Utf8Path, download: F) -> Result<CacheAction, PrepError>
    where
        F: FnOnce(&Utf8Path) -> Result<(), PrepError>,
    {
        if path.as_std_path().exists() {
            info!(path = %path, "using cached file");
            return Ok(CacheAction::Cached);
        }
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        Self::ensure_dir(parent)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| PrepError::Filesystem(format!("no file name in {path}")))?;

        let staging = tempfile::Builder::new()
            .prefix(".kira-ep-download")
            .tempdir_in(parent.as_std_path())
            .map_err(|err| PrepError::Filesystem(err.to_string()))?;
        let staged = Utf8PathBuf::from_path_buf(staging.path().join(file_name))
            .map_err(|_| PrepError::Filesystem("invalid staging path".to_string()))?;

        download(&staged)?;
        if !staged.as_std_path().is_file() {
            return Err(PrepError::MissingDownload(path.to_string()));
        }
        fs::rename(staged.as_std_path(), path.as_std_path())
            .map_err(|err| PrepError::Filesystem(format!("move into {path}: {err}")))?;
        info!(path = %path, "downloaded file");
        Ok(CacheAction::Downloaded)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PrepError> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| PrepError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| PrepError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), PrepError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| PrepError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }
}
