use std::marker::PhantomData;
use borsh::{from_slice, to_vec};
use log::debug;
use sled::{Config, Db};
use state::state_record::{EventCursor, StateRecord};
use crate::state_management::{ManageState, StateError};

const LEAF_PREFIX: &[u8] = b"leaf/";
const KEY_PREFIX: &[u8] = b"key/";
const ROOT_KEY: &[u8] = b"ROOT";
const CURSOR_KEY: &[u8] = b"CURSOR";

/// Struct for managing state using Sled as the underlying database.
///
/// Records live under `leaf/<index as big-endian u64>`, so a prefix scan returns them in insertion
/// order. `key/<record key>` maps a record key back to its index.
#[derive(Debug, Clone)]
pub struct SledStateManagement<S: StateRecord> {
    db: Db,
    _marker: PhantomData<S>,
}

fn leaf_key(index: u64) -> Vec<u8> {
    [LEAF_PREFIX, &index.to_be_bytes()[..]].concat()
}

fn index_key(key: &[u8; 32]) -> Vec<u8> {
    [KEY_PREFIX, &key[..]].concat()
}

impl<S: StateRecord> SledStateManagement<S> {
    fn with_db(db: Db) -> Self {
        Self { db, _marker: PhantomData }
    }
}

impl<S: StateRecord> ManageState for SledStateManagement<S> {
    type Record = S;

    fn open(path: &str) -> Result<Self, StateError> {
        debug!("Opening state database at {}", path);
        Ok(Self::with_db(sled::open(path)?))
    }

    fn temporary() -> Result<Self, StateError> {
        let db = Config::new().temporary(true).open()?;
        Ok(Self::with_db(db))
    }

    fn get_state_record(&self, index: u64) -> Result<Option<S>, StateError> {
        match self.db.get(leaf_key(index))? {
            Some(ivec) => Ok(Some(from_slice::<S>(&ivec)?)),
            None => Ok(None),
        }
    }

    fn get_state_records(&self) -> Result<Vec<S>, StateError> {
        let mut records = Vec::new();
        for (expected, entry) in self.db.scan_prefix(LEAF_PREFIX).enumerate() {
            let (key, value) = entry?;
            let index_bytes: [u8; 8] = key[LEAF_PREFIX.len()..]
                .try_into()
                .map_err(|_| StateError::Corrupted(format!("malformed leaf key {:?}", key)))?;
            let index = u64::from_be_bytes(index_bytes);
            if index != expected as u64 {
                return Err(StateError::Corrupted(format!("leaf {} missing, found {} instead", expected, index)));
            }
            records.push(from_slice::<S>(&value)?);
        }
        Ok(records)
    }

    fn get_leaf_index(&self, key: &[u8; 32]) -> Result<Option<u64>, StateError> {
        match self.db.get(index_key(key))? {
            Some(ivec) => Ok(Some(from_slice::<u64>(&ivec)?)),
            None => Ok(None),
        }
    }

    fn append_state_record(&self, index: u64, record: &S, root: &[u8; 32], cursor: &EventCursor) -> Result<(), StateError> {
        let mut batch = sled::Batch::default();
        batch.insert(leaf_key(index), to_vec(record)?);
        if let Some(key) = record.get_key() {
            batch.insert(index_key(&key), to_vec(&index)?);
        }
        batch.insert(ROOT_KEY, &root[..]);
        batch.insert(CURSOR_KEY, to_vec(cursor)?);
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn get_root(&self) -> Result<Option<[u8; 32]>, StateError> {
        match self.db.get(ROOT_KEY)? {
            Some(ivec) => {
                let root: [u8; 32] = ivec
                    .as_ref()
                    .try_into()
                    .map_err(|_| StateError::Corrupted("stored root is not 32 bytes".to_string()))?;
                Ok(Some(root))
            }
            None => Ok(None),
        }
    }

    fn get_cursor(&self) -> Result<Option<EventCursor>, StateError> {
        match self.db.get(CURSOR_KEY)? {
            Some(ivec) => Ok(Some(from_slice::<EventCursor>(&ivec)?)),
            None => Ok(None),
        }
    }

    fn commit(&self) -> Result<(), StateError> {
        self.db.flush()?;
        Ok(())
    }
}
