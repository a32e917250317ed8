//! Value types shared by the compilers, the executor and the PostgreSQL adapter.
//!
//! - **`SqlValue`** - a positional bind argument, including the pending-timestamp marker
//! - **`Arguments`** - append-only argument list that numbers `$n` placeholders
//! - **`Record`** - a row or property map keyed by column name
//! - **`Clock`** - source of the instant pending timestamps resolve to

pub mod pg;
pub mod types;

pub use types::{Arguments, Clock, Record, SqlValue, SystemClock, MAX_SAFE_INTEGER};
