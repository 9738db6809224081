pub mod graph;
pub mod locks;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use locks::UserLocks;
pub use store::{EventCursor, FraudStore, InsertOutcome, MemoryStore, UserState};
