use std::path::{Path, PathBuf};

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use parking_lot::Mutex;

use crate::error::TokenStoreError;
use crate::segment::DocumentId;
use crate::Result;

const PATH_TO_ID_CF: &str = "path_to_id";
const ID_TO_PATH_CF: &str = "id_to_path";
const META_CF: &str = "meta";
const NEXT_ID_KEY: &[u8] = b"next_id";

/// First id handed out
const FIRST_ID: DocumentId = 1;

/// Fjall-backed mapping between document paths and their ids.
///
/// Ids are positive, assigned in call order and never reused; removing a
/// document from the index leaves its id in place.
pub struct DocIdStore {
    base_dir: PathBuf,
    _db: Database,
    path_to_id: Keyspace,
    id_to_path: Keyspace,
    meta: Keyspace,
    /// Serializes read-then-assign
    assign: Mutex<()>,
}

fn store_err(e: impl std::fmt::Display) -> TokenStoreError {
    TokenStoreError::DocIdStore(e.to_string())
}

fn path_key(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

fn decode_id(bytes: &[u8]) -> Result<DocumentId> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| store_err(format!("stored id has {} bytes", bytes.len())))?;
    Ok(DocumentId::from_be_bytes(raw))
}

impl DocIdStore {
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let db = Database::builder(&base_dir)
            .open()
            .map_err(|e| store_err(format!("failed to open fjall id store: {}", e)))?;

        let path_to_id = db
            .keyspace(PATH_TO_ID_CF, || KeyspaceCreateOptions::default())
            .map_err(|e| store_err(format!("failed to open path_to_id cf: {}", e)))?;
        let id_to_path = db
            .keyspace(ID_TO_PATH_CF, || KeyspaceCreateOptions::default())
            .map_err(|e| store_err(format!("failed to open id_to_path cf: {}", e)))?;
        let meta = db
            .keyspace(META_CF, || KeyspaceCreateOptions::default())
            .map_err(|e| store_err(format!("failed to open meta cf: {}", e)))?;

        Ok(Self {
            base_dir,
            _db: db,
            path_to_id,
            id_to_path,
            meta,
            assign: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Id of `path`, assigning the next free id on first sight
    pub fn resolve_or_assign(&self, path: &Path) -> Result<DocumentId> {
        let _guard = self.assign.lock();
        if let Some(id) = self.id_of(path)? {
            return Ok(id);
        }

        let id = self.next_id()?;
        let key = path_key(path);
        self.path_to_id
            .insert(key.clone(), id.to_be_bytes())
            .map_err(store_err)?;
        self.id_to_path
            .insert(id.to_be_bytes(), key)
            .map_err(store_err)?;
        let next = id
            .checked_add(1)
            .ok_or_else(|| store_err("document id space exhausted"))?;
        self.meta
            .insert(NEXT_ID_KEY, next.to_be_bytes())
            .map_err(store_err)?;
        Ok(id)
    }

    /// Id previously assigned to `path`
    pub fn id_of(&self, path: &Path) -> Result<Option<DocumentId>> {
        match self.path_to_id.get(path_key(path)).map_err(store_err)? {
            Some(val) => Ok(Some(decode_id(val.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Path an id was assigned to
    pub fn path_of(&self, id: DocumentId) -> Result<Option<PathBuf>> {
        let Some(val) = self.id_to_path.get(id.to_be_bytes()).map_err(store_err)? else {
            return Ok(None);
        };
        Ok(Some(PathBuf::from(
            String::from_utf8_lossy(val.as_ref()).into_owned(),
        )))
    }

    /// The id the next new path will receive
    pub fn next_id(&self) -> Result<DocumentId> {
        match self.meta.get(NEXT_ID_KEY).map_err(store_err)? {
            Some(val) => decode_id(val.as_ref()),
            None => Ok(FIRST_ID),
        }
    }
}
