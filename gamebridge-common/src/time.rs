//! Clock helpers for envelope stamping and deadlines

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Milliseconds of monotonic time since the first call in this process.
pub fn mono_ms() -> u64 {
    let start = *PROCESS_START.get_or_init(Instant::now);
    #[allow(clippy::cast_possible_truncation)]
    {
        start.elapsed().as_millis() as u64
    }
}

/// Milliseconds of wall-clock time since the Unix epoch.
pub fn wall_unix_ms() -> u64 {
    #[allow(clippy::cast_possible_truncation)]
    {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
