//! Append-only CSV event log with an in-memory fold that is the
//! authoritative source of truth for resumption after a crash or interrupt.

mod event;
mod store;

pub use event::{
    fold, CheckData, Event, EventType, FailedData, PageUpdateData, QueryState, QueryStatus,
};
pub use store::{EventLedger, MAX_LEDGER_ROWS};
