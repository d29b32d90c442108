use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Source of "now" for timestamps, ids, and webhook freshness checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

pub fn fixed_clock(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
}
