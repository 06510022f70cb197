//! [`ProfileStore`]: one profile document on disk, mirrored in memory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use indexmap::IndexMap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::evaluator::CompiledProfile;
use crate::schema::{FilterProfile, FilterRule};

use super::defaults::default_profiles;
use super::error::{ProfileError, Result};
use super::watcher::handle_fs_event;

pub(super) type ProfileMap = IndexMap<String, FilterProfile>;

/// On-disk encoding, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Self::Yaml,
            _ => Self::Json,
        }
    }

    pub(super) fn parse(&self, contents: &str) -> Result<ProfileMap> {
        let mut map: ProfileMap = match self {
            Self::Json => serde_json::from_str(contents)?,
            Self::Yaml => serde_yaml::from_str(contents)?,
        };
        for (name, profile) in map.iter_mut() {
            profile.name = name.clone();
        }
        Ok(map)
    }

    fn render(&self, map: &ProfileMap) -> Result<String> {
        Ok(match self {
            Self::Json => serde_json::to_string_pretty(map)?,
            Self::Yaml => serde_yaml::to_string(map)?,
        })
    }
}

/// Filter profile document with atomic saves and optional hot-reload.
///
/// The document maps profile name to `{description, rules, min_score,
/// created_at}` and is always read and written as a whole. Mutations go
/// through the save lock so concurrent read-modify-write cycles serialize.
pub struct ProfileStore {
    path: PathBuf,
    format: DocumentFormat,
    profiles: Arc<RwLock<ProfileMap>>,
    save_lock: Mutex<()>,
    _watcher: Option<RecommendedWatcher>,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            format: DocumentFormat::from_path(&path),
            path,
            profiles: Arc::new(RwLock::new(IndexMap::new())),
            save_lock: Mutex::new(()),
            _watcher: None,
        }
    }

    /// Store pre-populated with the built-in profiles. Nothing is written.
    pub fn with_defaults(path: impl Into<PathBuf>) -> Self {
        let store = Self::new(path);
        {
            let mut map = store.profiles.write().expect("profiles lock poisoned");
            for profile in default_profiles() {
                map.insert(profile.name.clone(), profile);
            }
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory set with the document on disk.
    ///
    /// A missing file loads as empty. Profiles that fail structural
    /// validation are skipped with a warning.
    pub fn load(&self) -> Result<usize> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "profile document not found, starting empty");
            self.profiles.write().expect("profiles lock poisoned").clear();
            return Ok(0);
        }

        let contents = fs::read_to_string(&self.path)?;
        let parsed = self.format.parse(&contents)?;
        let valid = retain_valid(parsed, &self.path);
        let count = valid.len();
        *self.profiles.write().expect("profiles lock poisoned") = valid;

        info!(path = %self.path.display(), profiles = count, "loaded filter profiles");
        Ok(count)
    }

    /// Write the whole document atomically (tmp file, then rename).
    pub fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().expect("save lock poisoned");
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let rendered = {
            let map = self.profiles.read().expect("profiles lock poisoned");
            self.format.render(&map)?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("profiles");
        let tmp_path = self.path.with_file_name(format!(".{file_name}.tmp"));
        fs::write(&tmp_path, rendered)?;
        fs::rename(&tmp_path, &self.path)?;

        info!(path = %self.path.display(), "saved filter profiles");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<FilterProfile> {
        self.profiles.read().expect("profiles lock poisoned").get(name).cloned()
    }

    pub fn list(&self) -> Vec<FilterProfile> {
        self.profiles.read().expect("profiles lock poisoned").values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.read().expect("profiles lock poisoned").keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().expect("profiles lock poisoned").is_empty()
    }

    /// Validate, insert or replace, and save.
    ///
    /// Structural problems (no rules, bad weight) are rejected. Rule-level
    /// problems such as an invalid regex are accepted and returned so the
    /// caller can surface them.
    pub fn upsert(&self, mut profile: FilterProfile) -> Result<Vec<String>> {
        profile.validate()?;
        if profile.created_at.is_none() {
            profile.created_at = Some(chrono::Utc::now());
        }
        let problems = CompiledProfile::compile(&profile).problems();

        let _guard = self.save_lock.lock().expect("save lock poisoned");
        self.profiles
            .write()
            .expect("profiles lock poisoned")
            .insert(profile.name.clone(), profile);
        self.persist()?;
        Ok(problems)
    }

    /// Remove and save. Returns whether the profile existed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let _guard = self.save_lock.lock().expect("save lock poisoned");
        let removed = self
            .profiles
            .write()
            .expect("profiles lock poisoned")
            .shift_remove(name)
            .is_some();
        if removed {
            self.persist()?;
            info!(profile = %name, "removed filter profile");
        }
        Ok(removed)
    }

    /// Replace (or append) one rule in a stored profile, then save the whole
    /// document.
    pub fn update_rule(&self, profile_name: &str, rule: FilterRule) -> Result<Vec<String>> {
        let _guard = self.save_lock.lock().expect("save lock poisoned");

        let mut profile = self
            .get(profile_name)
            .ok_or_else(|| ProfileError::NotFound(profile_name.to_string()))?;
        profile.set_rule(rule);
        profile.validate()?;
        let problems = CompiledProfile::compile(&profile).problems();

        self.profiles
            .write()
            .expect("profiles lock poisoned")
            .insert(profile.name.clone(), profile);
        self.persist()?;
        Ok(problems)
    }

    /// Add every built-in profile that is not already present and save.
    /// Returns how many were added.
    pub fn init_defaults(&self) -> Result<usize> {
        let _guard = self.save_lock.lock().expect("save lock poisoned");
        let added = {
            let mut map = self.profiles.write().expect("profiles lock poisoned");
            let mut added = 0;
            for profile in default_profiles() {
                if !map.contains_key(&profile.name) {
                    map.insert(profile.name.clone(), profile);
                    added += 1;
                }
            }
            added
        };
        self.persist()?;
        info!(added, "initialised default filter profiles");
        Ok(added)
    }

    /// Clone the named profiles for one capture run. An empty list means all
    /// profiles; unknown names are skipped with a warning.
    pub fn snapshot(&self, names: &[String]) -> Vec<FilterProfile> {
        let map = self.profiles.read().expect("profiles lock poisoned");
        if names.is_empty() {
            return map.values().cloned().collect();
        }
        names
            .iter()
            .filter_map(|name| {
                let found = map.get(name).cloned();
                if found.is_none() {
                    warn!(profile = %name, "requested filter profile not found");
                }
                found
            })
            .collect()
    }

    /// Names not present in the document, in request order.
    pub fn unknown(&self, names: &[String]) -> Vec<String> {
        let map = self.profiles.read().expect("profiles lock poisoned");
        names.iter().filter(|name| !map.contains_key(*name)).cloned().collect()
    }

    /// Shared handle to the in-memory document.
    pub fn documents(&self) -> Arc<RwLock<IndexMap<String, FilterProfile>>> {
        Arc::clone(&self.profiles)
    }

    /// Reload the document whenever it changes on disk.
    ///
    /// The parent directory is watched so atomic renames are observed. A
    /// document that fails to parse leaves the previous profiles in place.
    pub fn watch(&mut self) -> Result<()> {
        let profiles = Arc::clone(&self.profiles);
        let path = self.path.clone();
        let format = self.format;

        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<notify::Event, notify::Error>| {
            match res {
                Ok(event) => handle_fs_event(&event, &profiles, &path, format),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            }
        })?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        let _ = watcher.configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %self.path.display(), "watching filter profiles for changes");
        self._watcher = Some(watcher);
        Ok(())
    }
}

pub(super) fn retain_valid(parsed: ProfileMap, path: &Path) -> ProfileMap {
    parsed
        .into_iter()
        .filter(|(name, profile)| match profile.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), profile = %name, error = %e, "skipping invalid filter profile");
                false
            }
        })
        .collect()
}
