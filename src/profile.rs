//! JSON file mapping a profile key to its saved interests.
//!
//! The store hands back a plain interests string; the recommender parses it
//! exactly like typed input.

use std::{
    collections::BTreeMap,
    fs, io,
    io::Write as _,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::interests::InterestSet;

#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles in `save`.
    write: Mutex<()>,
}

type Profiles = BTreeMap<String, Vec<String>>;

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Profiles> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Profiles::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing profile store {}", self.path.display()))
    }

    /// Saved interests for `key`, comma-joined, or `None` if unknown.
    pub fn load(&self, key: &str) -> Option<String> {
        let profiles = match self.read_all() {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "api", error = %format!("{e:#}"), "profile store unusable");
                return None;
            }
        };
        let found = profiles.get(key).map(|list| list.join(", "));
        debug!(target: "api", found = found.is_some(), "profile lookup");
        found
    }

    /// Overwrites `key` with `interests`, keeping other profiles.
    ///
    /// Fails without writing when the existing file can't be read or parsed.
    pub fn save(&self, key: &str, interests: &InterestSet) -> Result<()> {
        let _guard = self.write.lock().unwrap_or_else(|p| p.into_inner());

        let mut profiles = self
            .read_all()
            .context("refusing to overwrite profile store")?;
        profiles.insert(
            key.to_string(),
            interests.iter().map(str::to_string).collect(),
        );
        let body = serde_json::to_string_pretty(&profiles)?;

        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        tmp.write_all(body.as_bytes())
            .with_context(|| format!("writing {}", tmp.path().display()))?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}
