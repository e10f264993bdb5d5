//! Common type definitions.
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: account owner (or admin) identifier
//! - [`AssistantId`]: assistant identifier
//! - [`DialogId`]: dialog identifier
//! - [`KnowledgeId`]: knowledge entry identifier
//! - [`PaymentId`]: payment row identifier (orders are addressed by their `order_id` string)
//!
//! # Operations and resources
//!
//! [`Operation`] and [`Resource`] are carried by permission errors so the API can tell the
//! caller what it was not allowed to do.

use rust_decimal::Decimal;
use std::fmt;
use uuid::Uuid;

pub type UserId = Uuid;
pub type AssistantId = Uuid;
pub type DialogId = Uuid;
pub type KnowledgeId = Uuid;
pub type PaymentId = Uuid;
pub type BotTokenId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Fractional digits of every money column (`NUMERIC(14,2)`).
pub const MONEY_SCALE: u32 = 2;

/// Whether `amount` is stored exactly by a money column. Trailing zeros do not count.
pub fn fits_money_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= MONEY_SCALE
}

// *-All means unrestricted access, *-Own means restricted to own resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateOwn,
    ReadAll,
    ReadOwn,
    UpdateAll,
    UpdateOwn,
    DeleteOwn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Users,
    Assistants,
    Dialogs,
    Knowledge,
    Credits,
    Payments,
    Bots,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateOwn => write!(f, "Create"),
            Operation::ReadAll | Operation::ReadOwn => write!(f, "Read"),
            Operation::UpdateAll | Operation::UpdateOwn => write!(f, "Update"),
            Operation::DeleteOwn => write!(f, "Delete"),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Users => "users",
            Resource::Assistants => "assistants",
            Resource::Dialogs => "dialogs",
            Resource::Knowledge => "knowledge",
            Resource::Credits => "credits",
            Resource::Payments => "payments",
            Resource::Bots => "bots",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }

    #[test]
    fn test_fits_money_scale() {
        assert!(fits_money_scale(Decimal::new(10050, 2)));
        assert!(fits_money_scale(Decimal::new(100500, 3)));
        assert!(fits_money_scale(Decimal::new(-1, 2)));
        assert!(!fits_money_scale(Decimal::new(100005, 3)));
        assert!(!fits_money_scale(Decimal::new(1, 3)));
    }
}
