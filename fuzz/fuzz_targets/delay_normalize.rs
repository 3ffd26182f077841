#![no_main]

use courier_dispatch::{
    delay_from_seconds, normalize_delay_seconds, MAX_DELAY_SECONDS, MIN_DELAY_SECONDS,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let seconds = normalize_delay_seconds(Some(raw.as_ref()));
    assert!(seconds.is_finite());
    assert!((MIN_DELAY_SECONDS..=MAX_DELAY_SECONDS).contains(&seconds));
    let delay = delay_from_seconds(seconds);
    assert!(delay.as_secs_f64() <= MAX_DELAY_SECONDS);
});
