//! Logical stream name to backing file mapping.
//!
//! The registry holds no cached state: every call looks at the filesystem
//! again, so files added or removed while the server runs are picked up on
//! the next request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use vr_core::config::{MediaConfig, RegistryStrategy};
use vr_core::{Error, Result};

/// One registry entry, as seen at listing time.
#[derive(Debug, Clone, Serialize)]
pub struct MediaEntry {
    pub name: String,
    pub path: PathBuf,
    pub exists: bool,
    pub discovered_at: DateTime<Utc>,
}

/// Where stream names come from.
#[derive(Debug, Clone)]
pub enum MediaRegistry {
    /// `video1`..`video{count}` mapped to `<dir>/videoK.<extension>`.
    Static {
        dir: PathBuf,
        count: u32,
        extension: String,
    },
    /// Every file in `dir` with a recognized extension, keyed by stem.
    Directory { dir: PathBuf, extensions: Vec<String> },
}

impl MediaRegistry {
    pub fn from_config(config: &MediaConfig) -> Self {
        match config.strategy {
            RegistryStrategy::Static => MediaRegistry::Static {
                dir: config.dir.clone(),
                count: config.static_count,
                extension: config.static_extension.clone(),
            },
            RegistryStrategy::Directory => MediaRegistry::Directory {
                dir: config.dir.clone(),
                extensions: config
                    .extensions
                    .iter()
                    .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                    .collect(),
            },
        }
    }

    /// The directory the registry reads from.
    pub fn dir(&self) -> &Path {
        match self {
            MediaRegistry::Static { dir, .. } | MediaRegistry::Directory { dir, .. } => dir,
        }
    }

    /// Map `name` to an existing file.
    ///
    /// Returns [`Error::StreamNotFound`] (with the currently resolvable names)
    /// when the name is unknown or its file is missing.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let found = match self {
            MediaRegistry::Static { .. } => self
                .static_path(name)
                .filter(|p| p.is_file()),
            MediaRegistry::Directory { .. } => self.scan().remove(name),
        };

        found.ok_or_else(|| Error::StreamNotFound {
            name: name.to_string(),
            available: self.names(),
        })
    }

    /// Snapshot of every known entry, ordered by name.
    ///
    /// The static strategy lists its configured names even when the backing
    /// file is missing, with `exists = false`.
    pub fn list(&self) -> Vec<MediaEntry> {
        let now = Utc::now();
        match self {
            MediaRegistry::Static { dir, count, extension } => {
                let mut entries: Vec<MediaEntry> = (1..=*count)
                    .map(|k| {
                        let name = format!("video{k}");
                        let path = dir.join(format!("{name}.{extension}"));
                        MediaEntry {
                            exists: path.is_file(),
                            name,
                            path,
                            discovered_at: now,
                        }
                    })
                    .collect();
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                entries
            }
            MediaRegistry::Directory { .. } => self
                .scan()
                .into_iter()
                .map(|(name, path)| MediaEntry {
                    name,
                    path,
                    exists: true,
                    discovered_at: now,
                })
                .collect(),
        }
    }

    /// Names that currently resolve to an existing file.
    pub fn names(&self) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|e| e.exists)
            .map(|e| e.name)
            .collect()
    }

    /// [`resolve`](Self::resolve) on the blocking pool.
    pub async fn resolve_async(&self, name: &str) -> Result<PathBuf> {
        let registry = self.clone();
        let name = name.to_string();
        run_blocking(move || registry.resolve(&name)).await?
    }

    /// [`list`](Self::list) on the blocking pool.
    pub async fn list_async(&self) -> Result<Vec<MediaEntry>> {
        let registry = self.clone();
        run_blocking(move || registry.list()).await
    }

    /// [`names`](Self::names) on the blocking pool.
    pub async fn names_async(&self) -> Result<Vec<String>> {
        let registry = self.clone();
        run_blocking(move || registry.names()).await
    }

    /// Path for a static name, whether or not the file exists.
    fn static_path(&self, name: &str) -> Option<PathBuf> {
        let MediaRegistry::Static { dir, count, extension } = self else {
            return None;
        };
        let k: u32 = name.strip_prefix("video")?.parse().ok()?;
        if k == 0 || k > *count || name != format!("video{k}") {
            return None;
        }
        Some(dir.join(format!("{name}.{extension}")))
    }

    /// Non-recursive scan of the directory strategy, keyed by file stem.
    fn scan(&self) -> BTreeMap<String, PathBuf> {
        let MediaRegistry::Directory { dir, extensions } = self else {
            return BTreeMap::new();
        };

        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(
                        dir = %dir.display(),
                        error = %err,
                        "Error scanning media directory"
                    );
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| has_extension(p, extensions))
            .collect();
        files.sort();

        let mut map: BTreeMap<String, PathBuf> = BTreeMap::new();
        for path in files {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(existing) = map.get(stem) {
                tracing::debug!(
                    stem,
                    kept = %existing.display(),
                    ignored = %path.display(),
                    "Duplicate media stem"
                );
                continue;
            }
            map.insert(stem.to_string(), path);
        }
        map
    }
}

/// Filesystem probes stat and read directories; keep them off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("media registry lookup failed: {e}")))
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn static_registry(dir: &Path, count: u32) -> MediaRegistry {
        MediaRegistry::Static {
            dir: dir.to_path_buf(),
            count,
            extension: "mp4".into(),
        }
    }

    fn directory_registry(dir: &Path) -> MediaRegistry {
        let mut config = MediaConfig::default();
        config.strategy = RegistryStrategy::Directory;
        config.dir = dir.to_path_buf();
        MediaRegistry::from_config(&config)
    }

    #[test]
    fn static_resolves_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("video1.mp4"), b"abc").unwrap();

        let reg = static_registry(dir.path(), 4);
        assert_eq!(reg.resolve("video1").unwrap(), dir.path().join("video1.mp4"));
        assert_eq!(reg.names(), vec!["video1".to_string()]);
    }

    #[test]
    fn static_missing_file_lists_available() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("video2.mp4"), b"abc").unwrap();

        let reg = static_registry(dir.path(), 4);
        match reg.resolve("video1").unwrap_err() {
            Error::StreamNotFound { name, available } => {
                assert_eq!(name, "video1");
                assert_eq!(available, vec!["video2".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn static_rejects_names_outside_convention() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["video1", "video5", "video01", "video0"] {
            fs::write(dir.path().join(format!("{name}.mp4")), b"x").unwrap();
        }
        let reg = static_registry(dir.path(), 4);

        assert!(reg.resolve("video1").is_ok());
        for name in ["video5", "video01", "video0", "videoX", "../video1", ""] {
            assert!(reg.resolve(name).is_err(), "{name} should not resolve");
        }
    }

    #[test]
    fn static_existence_is_checked_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let reg = static_registry(dir.path(), 2);
        assert!(reg.resolve("video2").is_err());

        fs::write(dir.path().join("video2.mp4"), b"x").unwrap();
        assert!(reg.resolve("video2").is_ok());

        let listing = reg.list();
        assert_eq!(listing.len(), 2);
        assert!(!listing[0].exists);
        assert!(listing[1].exists);
    }

    #[test]
    fn directory_discovers_recognized_files_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lobby.mp4"), b"x").unwrap();
        fs::write(dir.path().join("Parking.MKV"), b"x").unwrap();
        fs::write(dir.path().join("readme.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("deep.mp4"), b"x").unwrap();

        let reg = directory_registry(dir.path());
        let names: Vec<String> = reg.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Parking".to_string(), "lobby".to_string()]);
        assert!(reg.resolve("deep").is_err());
        assert!(reg.resolve("readme").is_err());
    }

    #[test]
    fn directory_rescans_on_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let reg = directory_registry(dir.path());
        assert!(reg.names().is_empty());

        fs::write(dir.path().join("cam.webm"), b"x").unwrap();
        assert_eq!(reg.names(), vec!["cam".to_string()]);

        fs::remove_file(dir.path().join("cam.webm")).unwrap();
        assert!(reg.resolve("cam").is_err());
    }

    #[test]
    fn directory_duplicate_stem_keeps_first_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("clip.mp4"), b"x").unwrap();
        fs::write(dir.path().join("clip.mkv"), b"x").unwrap();

        let reg = directory_registry(dir.path());
        assert_eq!(reg.resolve("clip").unwrap(), dir.path().join("clip.mkv"));
        assert_eq!(reg.list().len(), 1);
    }

    #[tokio::test]
    async fn async_lookups_match_sync_lookups() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lobby.mp4"), b"x").unwrap();
        let reg = directory_registry(dir.path());

        assert_eq!(reg.resolve_async("lobby").await.unwrap(), dir.path().join("lobby.mp4"));
        assert!(matches!(
            reg.resolve_async("parking").await.unwrap_err(),
            Error::StreamNotFound { .. }
        ));
        assert_eq!(reg.names_async().await.unwrap(), vec!["lobby".to_string()]);
        assert_eq!(reg.list_async().await.unwrap().len(), 1);
    }

    #[test]
    fn directory_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = directory_registry(&dir.path().join("absent"));
        assert!(reg.list().is_empty());
    }
}
