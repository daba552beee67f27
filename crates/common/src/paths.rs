//! Output location providers.
//!
//! Every engine step writes to a fresh file named `<uuid-v4>.mp4` inside
//! the provider's directory; the directory is created on demand.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::config::{documents_dir, AppConfig, OutputLocation};
use crate::error::VideoKitResult;

/// Container extension for every produced file.
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Allocates output file locations.
pub trait PathProvider: Send + Sync {
    /// Directory the provider allocates into.
    fn dir(&self) -> &Path;

    /// A fresh, not yet existing output path.
    fn unique_output(&self) -> VideoKitResult<PathBuf> {
        let dir = self.dir();
        std::fs::create_dir_all(dir)?;
        Ok(dir.join(format!("{}.{OUTPUT_EXTENSION}", Uuid::new_v4())))
    }
}

/// Outputs under the system temporary directory.
#[derive(Debug, Clone)]
pub struct TempDirPaths {
    dir: PathBuf,
}

impl TempDirPaths {
    pub fn new() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }

    /// Outputs under an explicit directory (tests, `--output`).
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Default for TempDirPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl PathProvider for TempDirPaths {
    fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Outputs under the user's documents directory.
#[derive(Debug, Clone)]
pub struct DocumentsPaths {
    dir: PathBuf,
}

impl DocumentsPaths {
    pub fn new() -> Self {
        Self {
            dir: documents_dir(),
        }
    }
}

impl Default for DocumentsPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl PathProvider for DocumentsPaths {
    fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Path provider selected by the application config.
///
/// An explicit `output.dir` wins over the location preset.
pub fn provider_for(config: &AppConfig) -> Box<dyn PathProvider> {
    if let Some(dir) = &config.output.dir {
        return Box::new(TempDirPaths::in_dir(dir));
    }
    match config.output.location {
        OutputLocation::Temp => Box::new(TempDirPaths::new()),
        OutputLocation::Documents => Box::new(DocumentsPaths::new()),
    }
}

/// Remove a file if it exists, logging instead of failing.
///
/// Used for intermediate and partial outputs, whose removal must never
/// mask the result being reported.
pub fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_outputs_differ_and_use_mp4() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = TempDirPaths::in_dir(tmp.path().join("nested"));

        let a = paths.unique_output().unwrap();
        let b = paths.unique_output().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.extension().unwrap(), OUTPUT_EXTENSION);
        assert!(a.parent().unwrap().is_dir());
        assert!(!a.exists());

        let stem = a.file_stem().unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(stem).is_ok());
    }

    #[test]
    fn test_provider_prefers_explicit_dir() {
        let mut config = AppConfig::default();
        config.output.location = OutputLocation::Documents;
        config.output.dir = Some(PathBuf::from("/tmp/videokit-explicit"));
        let provider = provider_for(&config);
        assert_eq!(provider.dir(), Path::new("/tmp/videokit-explicit"));
    }

    #[test]
    fn test_remove_quietly_ignores_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("gone.mp4");
        remove_quietly(&file);
        std::fs::write(&file, b"x").unwrap();
        remove_quietly(&file);
        assert!(!file.exists());
    }
}
