use crate::domain::event::PaymentRejectedEvent;
use crate::error::RetryError;
use crate::service::schedule_manager::RetryScheduleManager;

/// Field of a stream entry that carries the JSON rejection event.
pub const EVENT_FIELD: &str = "event";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDisposition {
    Ack,
    LeavePending,
}

/// Feeds one stream entry to intake and decides whether it may be acknowledged.
///
/// Entries that can never succeed (missing field, bad JSON, invalid event)
/// are acked; persistence errors stay pending for redelivery.
pub async fn process_entry(
    manager: &RetryScheduleManager,
    entry_id: &str,
    payload: Option<&str>,
) -> EntryDisposition {
    let Some(raw) = payload else {
        tracing::warn!(entry = %entry_id, "stream entry without event field dropped");
        return EntryDisposition::Ack;
    };
    let event = match serde_json::from_str::<PaymentRejectedEvent>(raw) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(entry = %entry_id, "undecodable rejection event dropped: {}", e);
            return EntryDisposition::Ack;
        }
    };

    match manager.handle_rejection(event).await {
        Ok(outcome) => {
            tracing::info!(
                entry = %entry_id,
                processed = outcome.processed,
                eligibility = outcome.eligibility.as_str(),
                "rejection event handled"
            );
            EntryDisposition::Ack
        }
        Err(RetryError::InvalidRequest(msg)) => {
            tracing::warn!(entry = %entry_id, "invalid rejection event dropped: {}", msg);
            EntryDisposition::Ack
        }
        Err(e) => {
            tracing::error!(entry = %entry_id, "rejection event left pending: {}", e);
            EntryDisposition::LeavePending
        }
    }
}

/// Whether the next read should replay this consumer's pending entries (`0`)
/// instead of reading new ones (`>`).
pub fn read_backlog_next(reading_backlog: bool, seen: usize, left_pending: bool) -> bool {
    left_pending || (reading_backlog && seen > 0)
}

pub fn stream_cursor(reading_backlog: bool) -> &'static str {
    if reading_backlog {
        "0"
    } else {
        ">"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_is_drained_before_new_entries() {
        assert_eq!(stream_cursor(true), "0");
        assert!(read_backlog_next(true, 3, false));
        assert!(!read_backlog_next(true, 0, false));
        assert_eq!(stream_cursor(false), ">");
        assert!(!read_backlog_next(false, 5, false));
        assert!(read_backlog_next(false, 5, true));
    }
}
