#![forbid(unsafe_code)]

//! Session preference storage.
//!
//! The client keeps exactly one piece of login state: the id of the signed-in
//! user, persisted as a tiny JSON file under the data root. A missing or
//! unreadable file and the sentinel `-1` both mean "logged out". The store is
//! loaded once at startup and the resolved user id is passed explicitly into
//! every playlist call; nothing in the crate reads it through a global.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub const SESSION_FILE: &str = "session.json";

/// Sentinel stored while no user is signed in.
pub const LOGGED_OUT_USER: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    user_id: i64,
}

impl SessionRecord {
    fn logged_out() -> Self {
        Self {
            user_id: LOGGED_OUT_USER,
        }
    }
}

/// On-disk session preferences guarded by an in-memory copy.
pub struct SessionStore {
    path: PathBuf,
    current: RwLock<SessionRecord>,
}

impl SessionStore {
    /// Reads `session.json` under `data_root`. Any unreadable or malformed
    /// file is treated as a logged-out session rather than an error.
    pub fn load(data_root: &Path) -> Self {
        let path = data_root.join(SESSION_FILE);
        let current = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(SessionRecord::logged_out);

        Self {
            path,
            current: RwLock::new(current),
        }
    }

    /// Returns the signed-in user, or `None` while logged out.
    pub fn current_user(&self) -> Option<i64> {
        let record = *self.current.read();
        if record.user_id == LOGGED_OUT_USER {
            None
        } else {
            Some(record.user_id)
        }
    }

    /// Persists `user_id` as the signed-in user.
    pub fn set_user(&self, user_id: i64) -> Result<()> {
        let record = SessionRecord { user_id };
        write_json_atomic(&self.path, &record)?;
        *self.current.write() = record;
        Ok(())
    }

    /// Signs the current user out, keeping the file around with the sentinel
    /// so the next startup reads a well-formed record.
    pub fn clear(&self) -> Result<()> {
        self.set_user(LOGGED_OUT_USER)
    }
}

/// Writes the record through a temp file and renames it into place so a crash
/// mid-write never leaves a truncated session file behind.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating session directory {}", parent.display()))?;
    }

    let raw = serde_json::to_string_pretty(value).context("serializing session record")?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, raw).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_means_logged_out() {
        let dir = tempdir().unwrap();
        let store = SessionStore::load(dir.path());
        assert_eq!(store.current_user(), None);
    }

    #[test]
    fn malformed_file_means_logged_out() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SESSION_FILE), "not json").unwrap();
        let store = SessionStore::load(dir.path());
        assert_eq!(store.current_user(), None);
    }

    #[test]
    fn stored_sentinel_means_logged_out() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SESSION_FILE), r#"{"userId": -1}"#).unwrap();
        let store = SessionStore::load(dir.path());
        assert_eq!(store.current_user(), None);
    }

    #[test]
    fn set_user_persists_across_loads() {
        let dir = tempdir().unwrap();
        let store = SessionStore::load(dir.path());
        store.set_user(7).unwrap();
        assert_eq!(store.current_user(), Some(7));

        let reloaded = SessionStore::load(dir.path());
        assert_eq!(reloaded.current_user(), Some(7));
    }

    #[test]
    fn clear_signs_the_user_out() {
        let dir = tempdir().unwrap();
        let store = SessionStore::load(dir.path());
        store.set_user(3).unwrap();
        store.clear().unwrap();
        assert_eq!(store.current_user(), None);

        let reloaded = SessionStore::load(dir.path());
        assert_eq!(reloaded.current_user(), None);
    }

    #[test]
    fn write_is_atomic_enough_to_leave_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = SessionStore::load(dir.path());
        store.set_user(42).unwrap();
        assert!(dir.path().join(SESSION_FILE).exists());
        assert!(!dir.path().join("session.tmp").exists());
    }
}
