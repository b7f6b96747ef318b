//! Admin data persistence.
//!
//! Ban lists survive restarts as a small versioned JSON document. The
//! snapshot is taken under the server mutex; the write itself happens on a
//! blocking thread via tmp + rename so a crash never leaves a torn file.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Current on-disk format version.
const VERSION: u32 = 1;

/// Serialized admin data.
///
/// Id lists are sorted on serialization so the output is deterministic and
/// diffs stay readable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminData {
    /// Format version.
    pub version: u32,
    /// Server-wide banned account ids.
    #[serde(rename = "bannedUsers")]
    pub banned_users: Vec<i32>,
    /// Per-room banned account ids.
    #[serde(rename = "bannedRoomUsers")]
    pub banned_room_users: BTreeMap<String, Vec<i32>>,
}

impl Default for AdminData {
    fn default() -> Self {
        Self { version: VERSION, banned_users: Vec::new(), banned_room_users: BTreeMap::new() }
    }
}

impl AdminData {
    /// Snapshot live ban sets into serializable, deterministic form.
    pub fn snapshot(
        banned_users: &HashSet<i32>,
        banned_room_users: &HashMap<String, HashSet<i32>>,
    ) -> Self {
        let mut users: Vec<i32> = banned_users.iter().copied().collect();
        users.sort_unstable();

        let rooms = banned_room_users
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(room, ids)| {
                let mut ids: Vec<i32> = ids.iter().copied().collect();
                ids.sort_unstable();
                (room.clone(), ids)
            })
            .collect();

        Self { version: VERSION, banned_users: users, banned_room_users: rooms }
    }

    /// Load from `path`; a missing file is an empty default.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ServerError::AdminData(format!("read {path:?}: {err}"))),
        };
        serde_json::from_slice(&raw)
            .map_err(|err| ServerError::AdminData(format!("parse {path:?}: {err}")))
    }

    /// Write atomically: serialize to `<path>.tmp`, then rename over the
    /// target.
    pub fn save(&self, path: &Path) -> Result<(), ServerError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|err| ServerError::AdminData(format!("serialize: {err}")))?;

        let tmp = tmp_path(path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| ServerError::AdminData(format!("mkdir {parent:?}: {err}")))?;
            }
        }
        std::fs::write(&tmp, &json)
            .map_err(|err| ServerError::AdminData(format!("write {tmp:?}: {err}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|err| ServerError::AdminData(format!("rename {tmp:?}: {err}")))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let data = AdminData::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(data, AdminData::default());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admin.json");

        let mut banned = HashSet::new();
        banned.insert(300);
        banned.insert(100);
        banned.insert(200);
        let mut rooms = HashMap::new();
        rooms.insert("room1".to_owned(), HashSet::from([5, 3, 4]));

        let data = AdminData::snapshot(&banned, &rooms);
        data.save(&path).unwrap();

        let loaded = AdminData::load(&path).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.banned_users, vec![100, 200, 300]);
        assert_eq!(loaded.banned_room_users["room1"], vec![3, 4, 5]);

        // No stray tmp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn snapshot_drops_empty_room_sets() {
        let mut rooms = HashMap::new();
        rooms.insert("empty".to_owned(), HashSet::new());
        let data = AdminData::snapshot(&HashSet::new(), &rooms);
        assert!(data.banned_room_users.is_empty());
    }

    #[test]
    fn serialized_ids_are_sorted() {
        let banned = HashSet::from([9, 1, 5]);
        let data = AdminData::snapshot(&banned, &HashMap::new());
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("[1,5,9]"));
    }
}
