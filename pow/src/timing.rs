//! Timing utilities.

use std::time::{Duration, Instant};

use tracing::{debug, info};

#[inline]
pub fn measured<R>(f: impl FnOnce() -> R) -> (R, Duration) {
    let t = Instant::now();
    let r = f();
    (r, t.elapsed())
}

#[inline]
pub fn timed<R>(name: &str, f: impl FnOnce() -> R) -> R {
    debug!("{} ...", name);
    let (r, elapsed) = measured(f);
    debug!("... {} {:?}", name, elapsed);
    r
}

#[inline]
pub fn always_timed<R>(name: &str, f: impl FnOnce() -> R) -> R {
    info!(":: {}...", name);
    let (r, elapsed) = measured(f);
    info!("   {:?}", elapsed);
    r
}
