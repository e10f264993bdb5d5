//! Business rules that span several repositories or call out to external systems.

pub mod balance;
pub mod bots;
pub mod conversations;
pub mod settlement;
