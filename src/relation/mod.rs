//! Relation population.
//!
//! Only `belongs_to` relations exist: an attribute holding the primary key of
//! another model. Populating it replaces the key with the related record.
//!
//! # Architecture
//!
//! - **Eager**: one follow-up lookup per populated attribute, merged back by key

// Eager loading
pub mod eager;
#[doc(inline)]
pub use eager::{populate_many, populate_one};
