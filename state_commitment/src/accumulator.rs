use ark_bn254::Fr;
use log::{debug, info};
use merkle::hash::{field_to_be_bytes, leaf_hash, HashError};
use merkle::merkle_tree::{Insertion, MerkleTree};
use state::state_record::{EventCursor, StateRecord};
use state::transaction::{EventId, TransactionRecord};
use state_management::state_management::{ManageState, StateError, StateManager};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum AccumulatorError {
    #[error("Store error: {0}")]
    Store(#[from] StateError),
    #[error("Hash error: {0}")]
    Hash(#[from] HashError),
    #[error("Accumulator is corrupted: {0}")]
    Corrupted(String),
    #[error("An insert is already waiting for confirmation")]
    InsertPending,
    #[error("No insert is waiting for confirmation")]
    NothingStaged,
    #[error("Event {0} is not after the last committed event")]
    OutOfOrder(EventId),
}

/// An append that has been computed but is not durable until its proof is confirmed.
#[derive(Debug, Clone)]
pub struct StagedInsert {
    pub record: TransactionRecord,
    pub insertion: Insertion,
    /// Block number of the last committed transition.
    pub previous_block_number: u64,
}

pub type SharedAccumulator<M> = Arc<RwLock<PersistentAccumulator<M>>>;

/// Transaction accumulator backed by a durable record store.
///
/// On open the tree is rebuilt from the stored records and must reproduce the stored root.
pub struct PersistentAccumulator<M: ManageState<Record = TransactionRecord>> {
    store: StateManager<M>,
    tree: MerkleTree,
    cursor: EventCursor,
    staged: Option<StagedInsert>,
}

impl<M: ManageState<Record = TransactionRecord>> PersistentAccumulator<M> {
    pub fn open(store: StateManager<M>, start_block: u64) -> Result<Self, AccumulatorError> {
        let records = store.get_state_records()?;
        let tree = MerkleTree::from_records(&records)?;

        match store.get_root()? {
            Some(stored) if stored != field_to_be_bytes(&tree.root()) => {
                return Err(AccumulatorError::Corrupted(format!(
                    "recomputed root of {} records does not match the stored root",
                    records.len()
                )))
            }
            None if !records.is_empty() => {
                return Err(AccumulatorError::Corrupted("records stored without a root".to_string()))
            }
            _ => {}
        }

        let cursor = match store.get_cursor()? {
            Some(cursor) if cursor.leaf_count == records.len() as u64 => cursor,
            Some(cursor) => {
                return Err(AccumulatorError::Corrupted(format!(
                    "cursor counts {} leaves, store holds {}",
                    cursor.leaf_count,
                    records.len()
                )))
            }
            None if records.is_empty() => EventCursor::genesis(start_block),
            None => return Err(AccumulatorError::Corrupted("records stored without a cursor".to_string())),
        };

        info!("Opened accumulator with {} leaves, resuming after {:?}", records.len(), cursor.last_event);
        Ok(PersistentAccumulator { store, tree, cursor, staged: None })
    }

    pub fn shared(self) -> SharedAccumulator<M> {
        Arc::new(RwLock::new(self))
    }

    /// Root of the committed leaves.
    pub fn root(&self) -> Fr {
        self.tree.root()
    }

    pub fn root_bytes(&self) -> [u8; 32] {
        field_to_be_bytes(&self.tree.root())
    }

    pub fn cursor(&self) -> EventCursor {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Committed tree, for historical roots and paths.
    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    pub fn staged(&self) -> Option<&StagedInsert> {
        self.staged.as_ref()
    }

    /// Committed record stored at `leaf_index`, read back from the store.
    pub fn record_at(&self, leaf_index: u64) -> Result<Option<TransactionRecord>, AccumulatorError> {
        Ok(self.store.get_state_record(leaf_index)?)
    }

    /// Leaf the record's source event was committed as, if it was.
    pub fn leaf_index_of(&self, record: &TransactionRecord) -> Result<Option<u64>, AccumulatorError> {
        match record.get_key() {
            Some(key) => Ok(self.store.get_leaf_index(&key)?),
            None => Ok(None),
        }
    }

    /// Computes the append of `record` and holds it until [`commit`](Self::commit) or
    /// [`abandon`](Self::abandon). The committed root is unchanged until then.
    pub fn insert(&mut self, record: TransactionRecord) -> Result<&StagedInsert, AccumulatorError> {
        if self.staged.is_some() {
            return Err(AccumulatorError::InsertPending);
        }
        let event = record.event_id();
        if self.cursor.covers(&event) {
            return Err(AccumulatorError::OutOfOrder(event));
        }

        let insertion = self.tree.preview_append(leaf_hash(&record)?)?;
        debug!("Staged leaf {} for event {}", insertion.leaf_index, event);
        Ok(self.staged.insert(StagedInsert {
            record,
            insertion,
            previous_block_number: self.cursor.last_block_number,
        }))
    }

    /// Makes the staged append durable and visible.
    pub fn commit(&mut self) -> Result<Insertion, AccumulatorError> {
        let staged = self.staged.take().ok_or(AccumulatorError::NothingStaged)?;
        let cursor = self.cursor.advance(staged.record.event_id());
        let root = field_to_be_bytes(&staged.insertion.new_root);

        if let Err(e) = self.store.append_state_record(staged.insertion.leaf_index, &staged.record, &root, &cursor) {
            self.staged = Some(staged);
            return Err(e.into());
        }

        let inserted = self.tree.append(staged.insertion.leaf)?;
        if inserted.new_root != staged.insertion.new_root {
            return Err(AccumulatorError::Corrupted(format!(
                "committed root for leaf {} differs from the proven root",
                inserted.leaf_index
            )));
        }
        self.cursor = cursor;
        Ok(inserted)
    }

    /// Drops the staged append, if any.
    pub fn abandon(&mut self) -> Option<StagedInsert> {
        let staged = self.staged.take();
        if let Some(staged) = &staged {
            debug!("Abandoned staged leaf {} for event {}", staged.insertion.leaf_index, staged.record.event_id());
        }
        staged
    }
}
