use gauntlet_game::{SnapshotStore, StoreError, StoreRead};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Key/value snapshot store backed by a single JSON object file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(StoreError::Read(err.to_string())),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StoreError::Read(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
            Err(err) => Err(StoreError::Read(err.to_string())),
        }
    }

    fn persist(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::Write(e.to_string()))?;
            }
        }
        let payload =
            serde_json::to_string_pretty(map).map_err(|e| StoreError::Write(e.to_string()))?;
        fs::write(&self.path, payload).map_err(|e| StoreError::Write(e.to_string()))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn get(&self, key: &str) -> Result<StoreRead, StoreError> {
        let map = self.load()?;
        Ok(match map.get(key) {
            Some(Value::String(value)) => StoreRead::Value(value.clone()),
            Some(Value::Null) | None => StoreRead::Missing,
            Some(other) => StoreRead::Value(other.to_string()),
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.load()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.persist(&map)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.load()?;
        if map.remove(key).is_some() {
            self.persist(&map)?;
        }
        Ok(())
    }
}
