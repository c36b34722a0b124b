use crate::model::Snapshot;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

/// Last-known-good snapshot store plus the saved player id for session
/// resumption. Holds only server-public data; the credential is never
/// written here.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    store: StoreFile,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    saved_player_id: Option<String>,
    #[serde(default)]
    snapshots: HashMap<String, CachedSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub saved_at_ms: i64,
    pub snapshot: Snapshot,
}

impl SnapshotStore {
    pub fn open(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = match path {
            Some(p) => PathBuf::from(p),
            None => default_cache_path(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let store = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            StoreFile::default()
        };

        Ok(Self { path, store })
    }

    pub fn snapshot_for(&self, player_id: &str) -> Option<&CachedSnapshot> {
        self.store.snapshots.get(player_id)
    }

    pub fn store_snapshot(
        &mut self,
        player_id: &str,
        snapshot: Snapshot,
        now_ms: i64,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.store.snapshots.insert(
            player_id.to_string(),
            CachedSnapshot {
                saved_at_ms: now_ms,
                snapshot,
            },
        );
        self.persist()
    }

    pub fn saved_player_id(&self) -> Option<&str> {
        self.store.saved_player_id.as_deref()
    }

    pub fn set_saved_player_id(
        &mut self,
        player_id: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.store.saved_player_id = Some(player_id.to_string());
        self.persist()
    }

    pub fn clear_saved_player_id(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.store.saved_player_id = None;
        self.persist()
    }

    fn persist(&self) -> Result<(), Box<dyn std::error::Error>> {
        let data = serde_json::to_string_pretty(&self.store)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

fn default_cache_path() -> PathBuf {
    let base = env::var("APPDATA")
        .or_else(|_| env::var("HOME").map(|h| format!("{h}/.cache")))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&base).join("CampSync").join("dashboard_cache.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MyTeam, Player};

    fn temp_store(name: &str) -> SnapshotStore {
        let path = env::temp_dir().join(format!("camp_sync_cache_test_{name}.json"));
        let _ = fs::remove_file(&path);
        SnapshotStore::open(Some(path.to_str().unwrap())).unwrap()
    }

    fn snapshot(id: &str, money: i64) -> Snapshot {
        Snapshot {
            player: Player {
                id: id.into(),
                ..Default::default()
            },
            my_team: MyTeam {
                money,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn roundtrips_snapshot_per_player() {
        let path = env::temp_dir().join("camp_sync_cache_test_roundtrip.json");
        let _ = fs::remove_file(&path);

        let mut store = SnapshotStore::open(Some(path.to_str().unwrap())).unwrap();
        store
            .store_snapshot("1001", snapshot("1001", 300), 1700)
            .unwrap();

        let reopened = SnapshotStore::open(Some(path.to_str().unwrap())).unwrap();
        let cached = reopened.snapshot_for("1001").unwrap();
        assert_eq!(cached.saved_at_ms, 1700);
        assert_eq!(cached.snapshot.my_team.money, 300);
        assert!(reopened.snapshot_for("1002").is_none());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn saved_player_id_survives_and_clears() {
        let mut store = temp_store("saved_id");
        assert!(store.saved_player_id().is_none());

        store.set_saved_player_id("1001").unwrap();
        assert_eq!(store.saved_player_id(), Some("1001"));

        store.clear_saved_player_id().unwrap();
        assert!(store.saved_player_id().is_none());
    }

    #[test]
    fn newer_snapshot_replaces_older_one() {
        let mut store = temp_store("replace");
        store
            .store_snapshot("1001", snapshot("1001", 100), 1)
            .unwrap();
        store
            .store_snapshot("1001", snapshot("1001", 250), 2)
            .unwrap();
        let cached = store.snapshot_for("1001").unwrap();
        assert_eq!(cached.snapshot.my_team.money, 250);
        assert_eq!(cached.saved_at_ms, 2);
    }
}
