use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::MODEL_BASE_URL;
use crate::shared::error::OverlayError;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

impl From<ModelResolveError> for OverlayError {
    fn from(e: ModelResolveError) -> Self {
        OverlayError::ModelLoad(e.to_string())
    }
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Where model files come from: a fixed URL prefix, optionally shadowed by a
/// local directory holding the same file names.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelLocation {
    pub base_url: String,
    pub bundled_dir: Option<PathBuf>,
    /// Overrides the platform cache directory.
    pub cache_dir: Option<PathBuf>,
}

impl Default for ModelLocation {
    fn default() -> Self {
        Self {
            base_url: MODEL_BASE_URL.to_string(),
            bundled_dir: None,
            cache_dir: None,
        }
    }
}

impl ModelLocation {
    pub fn with_bundled_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundled_dir = Some(dir.into());
        self
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }

    /// Resolve one model file.
    ///
    /// Resolution order:
    /// 1. Bundled directory
    /// 2. Cache directory
    /// 3. Download from `base_url` into the cache
    pub fn resolve(
        &self,
        name: &str,
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<PathBuf, ModelResolveError> {
        if let Some(dir) = &self.bundled_dir {
            let bundled_path = dir.join(name);
            if bundled_path.exists() {
                return Ok(bundled_path);
            }
        }

        let cache_dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => model_cache_dir()?,
        };
        let cached_path = cache_dir.join(name);
        if cached_path.exists() {
            return Ok(cached_path);
        }

        fs::create_dir_all(&cache_dir).map_err(ModelResolveError::CacheDir)?;
        log::info!("Downloading model {name}");
        download(&self.url_for(name), &cached_path, progress)?;
        Ok(cached_path)
    }

    /// Resolve every file in `names`; the first failure aborts the batch.
    pub fn resolve_all(
        &self,
        names: &[&str],
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<Vec<PathBuf>, ModelResolveError> {
        names.iter().map(|name| self.resolve(name, progress)).collect()
    }
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/FaceOverlay/models/`
/// - Linux: `$XDG_CACHE_HOME/FaceOverlay/models/` or `~/.cache/FaceOverlay/models/`
/// - Windows: `%LOCALAPPDATA%/FaceOverlay/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join("FaceOverlay").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join("FaceOverlay").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

fn download(
    url: &str,
    dest: &Path,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");
    let result = download_inner(url, dest, &temp_path, progress);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn download_inner(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<(), ModelResolveError> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;
    let write_err = |source: std::io::Error| ModelResolveError::Write {
        path: temp_path.to_path_buf(),
        source,
    };

    let mut file = fs::File::create(temp_path).map_err(write_err)?;
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = response.read(&mut buf).map_err(write_err)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err)?;
        downloaded += n as u64;
        if let Some(cb) = progress {
            cb(downloaded, total);
        }
    }
    file.flush().map_err(write_err)?;
    drop(file);

    fs::rename(temp_path, dest).map_err(|source| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source,
    })
}
