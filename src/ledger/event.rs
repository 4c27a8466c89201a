//! Event and `QueryState` types plus the fold rules that turn a stream of
//! events into authoritative per-query state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `event_type` values that can appear in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "CHECK")]
    Check,
    #[serde(rename = "PAGE_UPDATE")]
    PageUpdate,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Check => "CHECK",
            EventType::PageUpdate => "PAGE_UPDATE",
            EventType::Completed => "COMPLETED",
            EventType::Failed => "FAILED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CHECK" => Some(EventType::Check),
            "PAGE_UPDATE" => Some(EventType::PageUpdate),
            "COMPLETED" => Some(EventType::Completed),
            "FAILED" => Some(EventType::Failed),
            _ => None,
        }
    }
}

/// An append-only record: `{timestamp, parameters_key, event_type, data_json}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub parameters_key: String,
    pub event_type: EventType,
    pub data: serde_json::Value,
}

/// Payload for a `CHECK` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CheckData {
    pub total_profiles: u64,
    pub is_workable: bool,
}

/// Payload for a `PAGE_UPDATE` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageUpdateData {
    pub page_number: u32,
}

/// Payload for a `FAILED` event.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FailedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at_page: Option<u32>,
}

/// One of the six lifecycle states a query can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    SkippedTooLarge,
    SkippedNoResult,
}

/// In-memory state for one canonical parameter key, reconstructed by folding
/// every event for that key in append order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub total_profiles: u64,
    pub is_workable: bool,
    pub status: QueryStatus,
    pub last_completed_page: u32,
    pub failed_at_page: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl QueryState {
    fn initial(event: &Event) -> Self {
        Self {
            total_profiles: 0,
            is_workable: false,
            status: QueryStatus::Pending,
            last_completed_page: 0,
            failed_at_page: None,
            timestamp: event.timestamp,
        }
    }
}

/// Applies one event to the (possibly absent) prior state for its key,
/// returning the new state. This is the single place that implements the
/// fold rules; both live appends and startup replay call it.
#[must_use]
pub fn fold(prior: Option<QueryState>, event: &Event) -> QueryState {
    let mut state = prior.unwrap_or_else(|| QueryState::initial(event));
    state.timestamp = event.timestamp;

    match event.event_type {
        EventType::Check => {
            let data: CheckData = serde_json::from_value(event.data.clone())
                .unwrap_or(CheckData { total_profiles: 0, is_workable: false });
            state.total_profiles = data.total_profiles;
            state.is_workable = data.is_workable;
            // A CHECK never overwrites a COMPLETED/IN_PROGRESS status, and
            // never touches last_completed_page; that field is only ever
            // set by PAGE_UPDATE.
            if !matches!(state.status, QueryStatus::Completed | QueryStatus::InProgress) {
                state.status = if data.is_workable {
                    QueryStatus::Pending
                } else if data.total_profiles == 0 {
                    QueryStatus::SkippedNoResult
                } else {
                    QueryStatus::SkippedTooLarge
                };
            }
        }
        EventType::PageUpdate => {
            let data: PageUpdateData = serde_json::from_value(event.data.clone())
                .unwrap_or(PageUpdateData { page_number: state.last_completed_page });
            state.last_completed_page = data.page_number;
            state.status = QueryStatus::InProgress;
        }
        EventType::Completed => {
            state.status = QueryStatus::Completed;
        }
        EventType::Failed => {
            let data: FailedData =
                serde_json::from_value(event.data.clone()).unwrap_or_default();
            state.status = QueryStatus::Failed;
            if data.failed_at_page.is_some() {
                state.failed_at_page = data.failed_at_page;
            }
        }
    }

    state
}
