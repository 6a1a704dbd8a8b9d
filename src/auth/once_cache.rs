//! OnceCache: session/profile-scoped "has this step already run"
//! memoization, persisted one file per (scope, id).
//!
//! Reads are tolerant of missing/corrupt files; writes are whole-file
//! (write-to-temp + rename) so concurrent readers never observe a partial
//! write.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::pack::model::OnceScope;

/// In-memory + disk-persisted memoization of executed `once` steps.
pub struct OnceCache {
    cache_dir: PathBuf,
    session: RwLock<HashSet<String>>,
    profile: RwLock<HashSet<String>>,
}

impl OnceCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            session: RwLock::new(HashSet::new()),
            profile: RwLock::new(HashSet::new()),
        }
    }

    fn set(&self, scope: OnceScope) -> &RwLock<HashSet<String>> {
        match scope {
            OnceScope::Session => &self.session,
            OnceScope::Profile => &self.profile,
        }
    }

    fn scope_name(scope: OnceScope) -> &'static str {
        match scope {
            OnceScope::Session => "session",
            OnceScope::Profile => "profile",
        }
    }

    fn sanitize(id: &str) -> String {
        id.chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect()
    }

    fn file_path(&self, scope: OnceScope, id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}.json", Self::scope_name(scope), Self::sanitize(id)))
    }

    /// For `profile` scope, load prior runs' memoized ids from disk. Tolerant
    /// of missing/corrupt files.
    pub fn load_profile_scope(&self) {
        let mut guard = self.profile.write();
        let Ok(entries) = std::fs::read_dir(&self.cache_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("profile-") {
                continue;
            }
            if let Ok(contents) = std::fs::read_to_string(&path)
                && let Ok(id) = serde_json::from_str::<String>(&contents)
            {
                guard.insert(id);
            }
        }
    }

    /// Has `step_id` already executed in `scope`?
    pub fn has_run(&self, scope: OnceScope, step_id: &str) -> bool {
        self.set(scope).read().contains(step_id)
    }

    /// Mark `step_id` as executed in `scope`, persisting for `profile` scope.
    pub fn mark_run(&self, scope: OnceScope, step_id: &str) -> std::io::Result<()> {
        self.set(scope).write().insert(step_id.to_string());
        if matches!(scope, OnceScope::Profile) {
            self.persist(scope, step_id)?;
        }
        Ok(())
    }

    fn persist(&self, scope: OnceScope, step_id: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let path = self.file_path(scope, step_id);
        let payload = serde_json::to_string(step_id).unwrap_or_default();
        atomic_write(&path, payload.as_bytes())
    }

    pub fn clear_session(&self) {
        self.session.write().clear();
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(contents)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn session_scope_is_memory_only() {
        let dir = tempdir().unwrap();
        let cache = OnceCache::new(dir.path());
        assert!(!cache.has_run(OnceScope::Session, "login"));
        cache.mark_run(OnceScope::Session, "login").unwrap();
        assert!(cache.has_run(OnceScope::Session, "login"));
    }

    #[test]
    fn profile_scope_persists_and_reloads() {
        let dir = tempdir().unwrap();
        {
            let cache = OnceCache::new(dir.path());
            cache.mark_run(OnceScope::Profile, "login").unwrap();
        }
        let cache2 = OnceCache::new(dir.path());
        cache2.load_profile_scope();
        assert!(cache2.has_run(OnceScope::Profile, "login"));
    }

    #[test]
    fn corrupt_file_is_tolerated() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("profile-broken.json"), b"not json").unwrap();
        let cache = OnceCache::new(dir.path());
        cache.load_profile_scope();
        assert!(!cache.has_run(OnceScope::Profile, "broken"));
    }

    #[test]
    fn sanitizes_path_separators_in_ids() {
        let dir = tempdir().unwrap();
        let cache = OnceCache::new(dir.path());
        cache.mark_run(OnceScope::Profile, "a/b\\c").unwrap();
        let path = cache.file_path(OnceScope::Profile, "a/b\\c");
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "profile-a_b_c.json");
    }
}
