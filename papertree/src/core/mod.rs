//! Pure logic with no I/O: shared types, brace extraction, word budgets.

pub mod budget;
pub mod extract;
pub mod types;
