use std::{
    hash::{BuildHasher, RandomState},
    time::{Duration, Instant},
};

const OPEN_MIN_RETRY_DELAY: Duration = Duration::from_millis(300);
const OPEN_MAX_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Randomized delay between two attempts to open a device. Spreads out retries when another
/// process holds the device.
pub(crate) fn retry_delay() -> Duration {
    let span = (OPEN_MAX_RETRY_DELAY - OPEN_MIN_RETRY_DELAY).as_millis() as u64;
    let jitter = RandomState::new().hash_one(Instant::now()) % (span + 1);

    OPEN_MIN_RETRY_DELAY + Duration::from_millis(jitter)
}
