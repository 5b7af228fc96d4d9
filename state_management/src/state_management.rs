use state::state_record::{EventCursor, StateRecord};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] std::io::Error),
    #[error("Stored state is inconsistent: {0}")]
    Corrupted(String),
}

/// `ManageState` is a trait that provides methods for managing an ordered, append-only sequence of
/// state records together with the root and cursor describing it.
pub trait ManageState: Sized {
    type Record: StateRecord;

    fn open(path: &str) -> Result<Self, StateError>;
    fn temporary() -> Result<Self, StateError>;
    fn get_state_record(&self, index: u64) -> Result<Option<Self::Record>, StateError>;
    /// All records in insertion order.
    fn get_state_records(&self) -> Result<Vec<Self::Record>, StateError>;
    fn get_leaf_index(&self, key: &[u8; 32]) -> Result<Option<u64>, StateError>;
    /// Stores the record at `index` together with the resulting root and cursor, atomically.
    fn append_state_record(&self, index: u64, record: &Self::Record, root: &[u8; 32], cursor: &EventCursor) -> Result<(), StateError>;
    fn get_root(&self) -> Result<Option<[u8; 32]>, StateError>;
    fn get_cursor(&self) -> Result<Option<EventCursor>, StateError>;
    fn commit(&self) -> Result<(), StateError>;
}

/// A generic struct used to manage the state of any type that implements the `ManageState` trait.
///
/// # Generic Parameters
///
/// - `T`: The type that implements the `ManageState` trait for state management.
///
#[derive(Debug, Clone)]
pub struct StateManager<T: ManageState> {
    pub manage_state: T,
}

impl<T: ManageState> StateManager<T> {
    pub fn open(path: &str) -> Result<Self, StateError> {
        Ok(Self {
            manage_state: T::open(path)?,
        })
    }

    pub fn temporary() -> Result<Self, StateError> {
        Ok(Self {
            manage_state: T::temporary()?,
        })
    }

    pub fn get_state_record(&self, index: u64) -> Result<Option<T::Record>, StateError> {
        self.manage_state.get_state_record(index)
    }

    pub fn get_state_records(&self) -> Result<Vec<T::Record>, StateError> {
        self.manage_state.get_state_records()
    }

    pub fn get_leaf_index(&self, key: &[u8; 32]) -> Result<Option<u64>, StateError> {
        self.manage_state.get_leaf_index(key)
    }

    /// Appends and flushes. Returns once the record is durable.
    pub fn append_state_record(&self, index: u64, record: &T::Record, root: &[u8; 32], cursor: &EventCursor) -> Result<(), StateError> {
        self.manage_state.append_state_record(index, record, root, cursor)?;
        self.manage_state.commit()
    }

    pub fn get_root(&self) -> Result<Option<[u8; 32]>, StateError> {
        self.manage_state.get_root()
    }

    pub fn get_cursor(&self) -> Result<Option<EventCursor>, StateError> {
        self.manage_state.get_cursor()
    }
}
