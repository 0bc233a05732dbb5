//! Wall-clock timestamps and random identifiers.

use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};

const ID_SUFFIX_LEN: usize = 12;

/// Current time as fractional unix seconds.
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Current time as whole unix seconds.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Fresh identifier of the form `<prefix>-<yyyymmdd>-<random>`.
pub fn new_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(ID_SUFFIX_LEN)
        .collect::<String>()
        .to_lowercase();
    format!("{prefix}-{}-{suffix}", Utc::now().format("%Y%m%d"))
}
