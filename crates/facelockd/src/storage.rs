//! On-disk gallery storage: SQLite identity records and a PNG blob directory.

use facelock_core::store::{BlobStore, GalleryStore, StoreError};
use facelock_core::Identity;
use rusqlite::{params, Connection, OptionalExtension};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS faces (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);";

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Identity records in a single SQLite table, listed in insertion order.
pub struct SqliteGallery {
    conn: Mutex<Connection>,
}

impl SqliteGallery {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), "gallery database opened");
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("database mutex poisoned".into()))
    }
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

impl GalleryStore for SqliteGallery {
    fn insert(&self, identity: &Identity) -> Result<String, StoreError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO faces (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![identity.id, identity.name, identity.created_at],
            )
            .map_err(backend)?;
        Ok(identity.id.clone())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let n = self
            .conn()?
            .execute("DELETE FROM faces WHERE id = ?1", params![id])
            .map_err(backend)?;
        Ok(n > 0)
    }

    fn list(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, name, created_at FROM faces ORDER BY rowid")
            .map_err(backend)?;
        let rows = stmt.query_map([], row_to_identity).map_err(backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }

    fn get(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT id, name, created_at FROM faces WHERE id = ?1",
                params![id],
                row_to_identity,
            )
            .optional()
            .map_err(backend)
    }

    fn clear(&self) -> Result<usize, StoreError> {
        self.conn()?
            .execute("DELETE FROM faces", [])
            .map_err(backend)
    }
}

/// One file per blob inside a single directory.
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> Result<PathBuf, StoreError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

impl BlobStore for DirBlobStore {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path(name)?;
        // Readers never observe a partially written file.
        let tmp = self.root.join(format!(".{name}.tmp"));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(blob = name, bytes = bytes.len(), "blob written");
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        match std::fs::read(self.path(name)?) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::BlobNotFound(name.into())),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, name: &str) -> Result<bool, StoreError> {
        match std::fs::remove_file(self.path(name)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, name: &str) -> Identity {
        Identity {
            id: id.into(),
            name: name.into(),
            created_at: "2024-05-01 09:30:00".into(),
        }
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("facelock-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_sqlite_insert_list_order() {
        let store = SqliteGallery::open_in_memory().unwrap();
        store.insert(&identity("b", "zoe")).unwrap();
        store.insert(&identity("a", "ana")).unwrap();

        let names: Vec<_> = store.list().unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, ["zoe", "ana"]);
    }

    #[test]
    fn test_sqlite_get_delete_clear() {
        let store = SqliteGallery::open_in_memory().unwrap();
        store.insert(&identity("1", "ana")).unwrap();
        store.insert(&identity("2", "bia")).unwrap();

        assert_eq!(store.get("1").unwrap(), Some(identity("1", "ana")));
        assert_eq!(store.get("9").unwrap(), None);
        assert!(store.delete("1").unwrap());
        assert!(!store.delete("1").unwrap());
        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = scratch_dir();
        let path = dir.join("faces.db");
        {
            let store = SqliteGallery::open(&path).unwrap();
            store.insert(&identity("1", "ana")).unwrap();
        }
        let store = SqliteGallery::open(&path).unwrap();
        assert_eq!(store.list().unwrap(), vec![identity("1", "ana")]);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_blob_roundtrip_and_missing() {
        let dir = scratch_dir();
        let blobs = DirBlobStore::open(&dir).unwrap();
        blobs.write("1_face.png", b"png").unwrap();
        assert_eq!(blobs.read("1_face.png").unwrap(), b"png");
        assert!(matches!(blobs.read("2_face.png"), Err(StoreError::BlobNotFound(_))));
        assert!(blobs.delete("1_face.png").unwrap());
        assert!(!blobs.delete("1_face.png").unwrap());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_blob_rejects_path_names() {
        let dir = scratch_dir();
        let blobs = DirBlobStore::open(&dir).unwrap();
        for bad in ["", "..", "../x.png", "a/b.png", "a\\b.png"] {
            assert!(
                matches!(blobs.write(bad, b"x"), Err(StoreError::InvalidName(_))),
                "{bad:?} accepted"
            );
        }
        std::fs::remove_dir_all(dir).unwrap();
    }
}
