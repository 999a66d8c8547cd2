//! Structured-response validation: schemas, the repair chain and retry
//! bookkeeping.
//!
//! Everything here is synchronous and pure. The async driver that re-asks
//! an agent lives in `recast-runtime`.

mod record;
pub mod repair;
mod retry;
mod schema;

pub use record::Record;
pub use repair::parse_response;
pub use retry::{correction_message, RetryState};
pub use schema::{FieldKind, FieldSpec, ParseOutcome, Schema, SchemaKind};
