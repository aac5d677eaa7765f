use pgrx::datum::TimestampWithTimeZone;
use pgrx::prelude::*;

/// Per-statement high-resolution clock. Used for PITR `changed_at` so that
/// entries produced by the same outer transaction still order monotonically
/// (`clock_timestamp()` advances between statements; `now()` does not).
pub fn statement_clock() -> TimestampWithTimeZone {
    Spi::get_one("SELECT clock_timestamp()")
        .ok()
        .flatten()
        .unwrap_or_else(|| pgrx::error!("clock_timestamp() returned no rows"))
}

/// Transaction-start time. Used for commit/event `created_at`.
pub fn transaction_clock() -> TimestampWithTimeZone {
    Spi::get_one("SELECT transaction_timestamp()")
        .ok()
        .flatten()
        .unwrap_or_else(|| pgrx::error!("transaction_timestamp() returned no rows"))
}

/// The backend's current top-level transaction id, used to group PITR audit
/// entries produced by the same outer transaction.
pub fn current_transaction_id() -> i64 {
    Spi::get_one::<i64>("SELECT txid_current()")
        .ok()
        .flatten()
        .unwrap_or_else(|| pgrx::error!("txid_current() returned no rows"))
}
