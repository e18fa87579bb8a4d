//! Microsecond timestamps on a free-running 32-bit counter.
//!
//! The counter wraps roughly every 71 minutes, so deadlines are compared by
//! signed distance rather than by magnitude. A deadline is valid for up to
//! half the counter range ahead of `now`.

/// Returns `true` once `now` has reached or passed `deadline`.
#[inline]
pub fn reached(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

/// Returns `true` if `deadline` is unset or has been reached.
#[inline]
pub fn due(now: u32, deadline: Option<u32>) -> bool {
    deadline.map_or(true, |d| reached(now, d))
}
