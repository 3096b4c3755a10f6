//! Bounded polling on top of the back end's monotonic clock

use fugit::MillisDurationU32;
use mcan_driver_core::{Dependencies, Instant};

/// Mode transitions are given this long unless the caller decides otherwise
pub const MODE_TRANSITION_TIMEOUT: Timeout = Timeout::Within(MillisDurationU32::millis(100));

/// How long a blocking operation may wait
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// Fail right away if the operation cannot complete
    NoWait,
    /// Give up once the duration has passed
    Within(MillisDurationU32),
    /// Wait as long as it takes
    Forever,
}

impl From<MillisDurationU32> for Timeout {
    fn from(duration: MillisDurationU32) -> Self {
        Timeout::Within(duration)
    }
}

/// Point in time after which a [`Timeout`] has expired
#[derive(Copy, Clone, Debug)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn new<D: Dependencies>(deps: &D, timeout: Timeout) -> Self {
        let now = deps.uptime();
        Self(match timeout {
            Timeout::NoWait => Some(now),
            Timeout::Within(duration) => Some(Instant::from_ticks(
                now.ticks()
                    .saturating_add(u64::from(duration.ticks()).saturating_mul(1_000)),
            )),
            Timeout::Forever => None,
        })
    }

    pub(crate) fn expired<D: Dependencies>(&self, deps: &D) -> bool {
        match self.0 {
            Some(deadline) => deps.uptime().ticks() >= deadline.ticks(),
            None => false,
        }
    }
}

/// Retries `op` until it completes, fails or `timeout` expires
///
/// `op` is always tried at least once. Expiry is reported as
/// [`nb::Error::WouldBlock`].
pub(crate) fn poll_until<D, T, E>(
    deps: &D,
    timeout: Timeout,
    mut op: impl FnMut() -> nb::Result<T, E>,
) -> nb::Result<T, E>
where
    D: Dependencies,
{
    let deadline = Deadline::new(deps, timeout);
    loop {
        match op() {
            Err(nb::Error::WouldBlock) if !deadline.expired(deps) => deps.relax(),
            result => return result,
        }
    }
}
