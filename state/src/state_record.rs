use borsh::{BorshDeserialize, BorshSerialize};
use crate::transaction::EventId;

/// This trait represents a state record that can be serialized to and deserialized from
/// bytes using the Borsh encoding format. It also provides a method to retrieve the key
/// associated with the state record. A state record is a struct that will be used in a key value
/// store.
pub trait StateRecord: BorshSerialize + BorshDeserialize + Clone {
    fn get_key(&self) -> Option<[u8; 32]>;
}

/// Durable progress marker of the accumulator. It is written in the same batch as the leaf it
/// describes, so after a restart it always agrees with the stored leaf sequence.
#[derive(Debug, BorshDeserialize, BorshSerialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCursor {
    pub last_event: Option<EventId>,
    pub last_block_number: u64,
    pub leaf_count: u64,
}

impl EventCursor {
    /// Cursor of an accumulator that has not processed anything yet. `start_block` acts as the
    /// block number of the implicit genesis transition.
    pub fn genesis(start_block: u64) -> Self {
        EventCursor {
            last_event: None,
            last_block_number: start_block,
            leaf_count: 0,
        }
    }

    pub fn advance(&self, event: EventId) -> Self {
        EventCursor {
            last_event: Some(event),
            last_block_number: event.block_number,
            leaf_count: self.leaf_count + 1,
        }
    }

    /// Whether `event` was already committed. Used to drop replays after a resubscription.
    pub fn covers(&self, event: &EventId) -> bool {
        matches!(self.last_event, Some(last) if *event <= last)
    }

    /// First block to ask the source chain for when resuming.
    pub fn resume_block(&self) -> u64 {
        self.last_block_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_covers_nothing() {
        let cursor = EventCursor::genesis(100);
        assert!(!cursor.covers(&EventId::new(0, 0)));
        assert_eq!(cursor.resume_block(), 100);
        assert_eq!(cursor.leaf_count, 0);
    }

    #[test]
    fn advance_covers_earlier_and_equal_events() {
        let cursor = EventCursor::genesis(0).advance(EventId::new(10, 2));
        assert!(cursor.covers(&EventId::new(9, 7)));
        assert!(cursor.covers(&EventId::new(10, 1)));
        assert!(cursor.covers(&EventId::new(10, 2)));
        assert!(!cursor.covers(&EventId::new(10, 3)));
        assert!(!cursor.covers(&EventId::new(11, 0)));
        assert_eq!(cursor.leaf_count, 1);
        assert_eq!(cursor.resume_block(), 10);
    }

    #[test]
    fn cursor_roundtrips_through_borsh() {
        let cursor = EventCursor::genesis(5).advance(EventId::new(6, 1));
        let bytes = borsh::to_vec(&cursor).unwrap();
        assert_eq!(borsh::from_slice::<EventCursor>(&bytes).unwrap(), cursor);
    }
}
