//! Timeouts for blocking pipeline operations.

use core::future::Future;

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};

use crate::error::StreamError;

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Wait until the condition holds or the stop signal is raised.
    Forever,
    /// Give up with [`StreamError::Timeout`] after this long.
    After(Duration),
}

impl Timeout {
    /// Return immediately if the condition does not already hold.
    pub const NONE: Self = Self::After(Duration::from_ticks(0));

    /// Timeout of `ms` milliseconds.
    pub const fn millis(ms: u64) -> Self {
        Self::After(Duration::from_millis(ms))
    }

    /// Fix the deadline now, so a retry loop shares one budget.
    pub(crate) fn deadline(self) -> Deadline {
        match self {
            Self::Forever => Deadline(None),
            Self::After(d) => Deadline(Some(Instant::now().checked_add(d).unwrap_or(Instant::MAX))),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}

/// Absolute deadline derived from a [`Timeout`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    /// Drive `fut` to completion unless the deadline passes first.
    pub(crate) async fn run<F: Future>(self, fut: F) -> Result<F::Output, StreamError> {
        match self.0 {
            None => Ok(fut.await),
            Some(at) => match select(fut, Timer::at(at)).await {
                Either::First(out) => Ok(out),
                Either::Second(()) => Err(StreamError::Timeout),
            },
        }
    }
}
