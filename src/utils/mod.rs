//! Process and retry helpers shared by the binary and the services.

pub mod bootstrap;
pub mod retry;

/// Current Unix time in milliseconds, the clock of the fulfillment queue.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
