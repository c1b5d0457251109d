//! Filesystem Driver
//!
//! One `<keyhash>[-<NAMESPACE>].cache` file per entry. The absolute expiration
//! (Unix seconds, `0` = never) is kept either in an `EXPIRE` extended attribute
//! on the data file, or, where the filesystem has no xattr support, as decimal
//! text in a sibling `.expire` ghost file.
//!
//! Expired entries are removed lazily when they are looked up; there is no
//! background sweeper. Data and expiration are two sequential locked writes
//! without an fsync/rename barrier, so a crash between them can leave a data
//! file with a stale or missing expiration.

use super::{Driver, DriverCapabilities, unix_now};
use crate::core::{DriverError, DriverResult, DriverStats};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DATA_EXT: &str = "cache";
const GHOST_EXT: &str = "expire";
#[cfg(unix)]
const EXPIRE_ATTR: &str = "user.EXPIRE";

/// How the expiration of an entry is persisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemStrategy {
    /// Probe the directory and pick xattr when available
    #[default]
    Auto,
    /// `EXPIRE` extended attribute on the data file
    Xattr,
    /// Sibling `.expire` file
    Ghost,
}

impl FilesystemStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Xattr => "xattr",
            Self::Ghost => "ghost",
        }
    }
}

/// Filesystem driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    pub directory: PathBuf,
    #[serde(default)]
    pub strategy: FilesystemStrategy,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data/cache/files"),
            strategy: FilesystemStrategy::Auto,
        }
    }
}

/// Filesystem driver
#[derive(Debug, Clone)]
pub struct FilesystemDriver {
    directory: PathBuf,
    /// Resolved at construction, never `Auto`
    strategy: FilesystemStrategy,
}

impl FilesystemDriver {
    /// Create the cache directory and settle the TTL strategy
    pub fn new(config: FilesystemConfig) -> DriverResult<Self> {
        fs::create_dir_all(&config.directory)?;

        let xattr_supported = probe_xattr(&config.directory);
        let strategy = match config.strategy {
            FilesystemStrategy::Auto if xattr_supported => FilesystemStrategy::Xattr,
            FilesystemStrategy::Auto => FilesystemStrategy::Ghost,
            FilesystemStrategy::Xattr if !xattr_supported => {
                return Err(DriverError::Unsupported(format!(
                    "extended attributes are not available in {}",
                    config.directory.display()
                )));
            }
            other => other,
        };

        info!(
            "Initializing filesystem driver at {} (strategy={})",
            config.directory.display(),
            strategy.as_str()
        );

        Ok(Self {
            directory: config.directory,
            strategy,
        })
    }

    /// Strategy in use
    pub fn strategy(&self) -> FilesystemStrategy {
        self.strategy
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the data file of an entry
    pub fn data_path(&self, key: &str, namespace: Option<&str>) -> PathBuf {
        self.path_for(&entry_stem(key, namespace), DATA_EXT)
    }

    /// Path of the ghost expiration file of an entry
    pub fn ghost_path(&self, key: &str, namespace: Option<&str>) -> PathBuf {
        self.path_for(&entry_stem(key, namespace), GHOST_EXT)
    }

    fn path_for(&self, stem: &str, ext: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", stem, ext))
    }

    fn read_expiration(&self, stem: &str) -> DriverResult<i64> {
        let raw = match self.strategy {
            FilesystemStrategy::Ghost => match fs::read(self.path_for(stem, GHOST_EXT)) {
                Ok(raw) => Some(raw),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            },
            _ => read_xattr(&self.path_for(stem, DATA_EXT))?,
        };

        match raw {
            None => Ok(0),
            Some(raw) => String::from_utf8_lossy(&raw)
                .trim()
                .parse::<i64>()
                .map_err(|e| {
                    DriverError::Serialization(format!("bad expiration for {}: {}", stem, e))
                }),
        }
    }

    fn write_expiration(&self, stem: &str, expire: i64) -> DriverResult<()> {
        let text = expire.to_string();
        match self.strategy {
            FilesystemStrategy::Ghost => {
                write_locked(&self.path_for(stem, GHOST_EXT), text.as_bytes())?
            }
            _ => write_xattr(&self.path_for(stem, DATA_EXT), text.as_bytes())?,
        }
        Ok(())
    }

    /// Remove the data file and its ghost; `true` if the data file existed
    fn remove_entry(&self, stem: &str) -> DriverResult<bool> {
        let existed = remove_if_exists(&self.path_for(stem, DATA_EXT))?;
        if self.strategy == FilesystemStrategy::Ghost {
            remove_if_exists(&self.path_for(stem, GHOST_EXT))?;
        }
        Ok(existed)
    }

    fn exists(&self, stem: &str) -> DriverResult<bool> {
        match fs::metadata(self.path_for(stem, DATA_EXT)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn has_stem(&self, stem: &str) -> DriverResult<bool> {
        if !self.exists(stem)? {
            return Ok(false);
        }

        let expire = self.read_expiration(stem)?;
        if expire > 0 && expire < unix_now() {
            debug!("Entry expired: {} (expire={})", stem, expire);
            self.remove_entry(stem)?;
            return Ok(false);
        }

        Ok(true)
    }

    /// Cache and ghost files in the directory, with their parsed stem
    fn entries(&self) -> DriverResult<Vec<(PathBuf, String, String)>> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.directory)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if let Some((stem, ext)) = name.rsplit_once('.') {
                if ext == DATA_EXT || ext == GHOST_EXT {
                    entries.push((dirent.path(), stem.to_string(), ext.to_string()));
                }
            }
        }
        Ok(entries)
    }
}

impl Driver for FilesystemDriver {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            native_namespaces: true,
            batch: false,
        }
    }

    fn options(&self) -> Value {
        json!({
            "directory": self.directory.display().to_string(),
            "strategy": self.strategy.as_str(),
        })
    }

    fn test(&self) -> DriverResult<bool> {
        fs::create_dir_all(&self.directory)?;
        let probe = self.directory.join(".write-probe");
        write_locked(&probe, b"ok")?;
        fs::remove_file(&probe)?;
        Ok(true)
    }

    fn get(&self, key: &str, namespace: Option<&str>) -> DriverResult<Option<Vec<u8>>> {
        let stem = entry_stem(key, namespace);
        if !self.has_stem(&stem)? {
            return Ok(None);
        }

        // the entry was just seen, so a failing read is an I/O error, not a miss
        let mut file = File::open(self.path_for(&stem, DATA_EXT))?;
        FileExt::lock_shared(&file)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        Ok(Some(buffer))
    }

    fn set(
        &self,
        key: &str,
        namespace: Option<&str>,
        value: &[u8],
        ttl: u64,
    ) -> DriverResult<bool> {
        let stem = entry_stem(key, namespace);
        // an expiration the timestamp cannot hold is stored as never
        let expire = i64::try_from(ttl)
            .ok()
            .filter(|ttl| *ttl > 0)
            .and_then(|ttl| unix_now().checked_add(ttl))
            .unwrap_or(0);
        debug!("SET {} size={} expire={}", stem, value.len(), expire);

        write_locked(&self.path_for(&stem, DATA_EXT), value)?;
        self.write_expiration(&stem, expire)?;

        Ok(true)
    }

    fn delete(&self, key: &str, namespace: Option<&str>) -> DriverResult<bool> {
        let stem = entry_stem(key, namespace);
        debug!("DELETE {}", stem);
        self.remove_entry(&stem)
    }

    fn has(&self, key: &str, namespace: Option<&str>) -> DriverResult<bool> {
        self.has_stem(&entry_stem(key, namespace))
    }

    fn clear(&self, namespace: Option<&str>) -> DriverResult<bool> {
        let mut all = true;
        let mut removed = 0usize;

        for (path, stem, _) in self.entries()? {
            let matches = match namespace {
                None => true,
                Some(ns) => stem.split_once('-').is_some_and(|(_, entry_ns)| entry_ns == ns),
            };
            if !matches {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!("Failed to unlink {}: {}", path.display(), e);
                    all = false;
                }
            }
        }

        debug!("CLEAR namespace={:?} ({} files)", namespace, removed);
        Ok(all)
    }

    fn stats(&self) -> DriverResult<DriverStats> {
        let mut objects = 0u64;
        let mut bytes = 0u64;
        for (path, _, ext) in self.entries()? {
            if ext == DATA_EXT {
                objects += 1;
                bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            }
        }

        Ok(DriverStats::new(objects)
            .with("bytes", bytes)
            .with("directory", self.directory.display().to_string())
            .with("strategy", self.strategy.as_str()))
    }
}

/// `<sha256(key)>` or `<sha256(key)>-<namespace>`; the hex hash never holds a `-`
fn entry_stem(key: &str, namespace: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hash = hex::encode(hasher.finalize());

    match namespace {
        Some(ns) => format!("{}-{}", hash, ns),
        None => hash,
    }
}

/// Write a whole file under an exclusive lock
fn write_locked(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    FileExt::lock_exclusive(&file)?;
    file.set_len(0)?;
    file.write_all(data)?;
    file.flush()
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn probe_xattr(directory: &Path) -> bool {
    if !xattr::SUPPORTED_PLATFORM {
        return false;
    }

    let probe = directory.join(".xattr-probe");
    let supported = fs::write(&probe, b"")
        .and_then(|_| xattr::set(&probe, EXPIRE_ATTR, b"0"))
        .and_then(|_| xattr::get(&probe, EXPIRE_ATTR))
        .map(|value| value.as_deref() == Some(b"0".as_slice()))
        .unwrap_or(false);

    if let Err(e) = fs::remove_file(&probe) {
        debug!("Could not remove xattr probe {}: {}", probe.display(), e);
    }
    supported
}

#[cfg(not(unix))]
fn probe_xattr(_directory: &Path) -> bool {
    false
}

#[cfg(unix)]
fn read_xattr(path: &Path) -> io::Result<Option<Vec<u8>>> {
    xattr::get(path, EXPIRE_ATTR)
}

#[cfg(not(unix))]
fn read_xattr(_path: &Path) -> io::Result<Option<Vec<u8>>> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "extended attributes"))
}

#[cfg(unix)]
fn write_xattr(path: &Path, value: &[u8]) -> io::Result<()> {
    xattr::set(path, EXPIRE_ATTR, value)
}

#[cfg(not(unix))]
fn write_xattr(_path: &Path, _value: &[u8]) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "extended attributes"))
}
