//! Multi-condition wake primitive.
//!
//! [`EventSignal`] holds a small set of named condition bits. Tasks block
//! until any bit of a mask is set, choosing per call site whether the wait
//! consumes the bits it observed ([`Trigger::Edge`]) or leaves them for the
//! next observer ([`Trigger::Level`]). Bits marked sticky at construction
//! (the stop condition of a ring or node) are never consumed by an edge wait,
//! so every waiter that includes them in its mask sees them.
//!
//! `set` and `clear` never block and may be called from interrupt context.

use core::cell::RefCell;
use core::future::poll_fn;
use core::ops::{BitAnd, BitOr, BitOrAssign};
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

use crate::error::StreamError;
use crate::timeout::{Deadline, Timeout};

/// Concurrent waiters registered before a registration overflow forces a
/// spurious wake of everyone.
const MAX_WAITERS: usize = 6;

/// A set of condition bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Conditions(u32);

impl Conditions {
    /// The empty set.
    pub const NONE: Self = Self(0);

    /// The single condition `n` (0..32).
    pub const fn bit(n: u8) -> Self {
        Self(1u32.wrapping_shl(n as u32))
    }

    /// Raw bit pattern.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Union, usable in `const` items.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `true` when no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `true` when any bit of `other` is also set here.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// `true` when every bit of `other` is set here.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// These bits with every bit of `other` removed.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Conditions {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Conditions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Conditions {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Whether a successful wait consumes the bits it matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    /// Matched bits stay set and remain observable by other waiters.
    Level,
    /// Matched bits (other than sticky ones) are cleared on return.
    Edge,
}

struct Inner {
    bits: Conditions,
    wakers: MultiWakerRegistration<MAX_WAITERS>,
}

/// Typed multi-condition wait primitive.
pub struct EventSignal {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner>>,
    sticky: Conditions,
}

impl EventSignal {
    /// Signal with all bits clear; bits in `sticky` survive edge waits.
    pub const fn new(sticky: Conditions) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                bits: Conditions::NONE,
                wakers: MultiWakerRegistration::new(),
            })),
            sticky,
        }
    }

    /// Set `bits` and wake every waiter.
    pub fn set(&self, bits: Conditions) {
        self.inner.lock(|c| {
            let mut inner = c.borrow_mut();
            inner.bits |= bits;
            inner.wakers.wake();
        });
    }

    /// Clear `bits` without waking anyone.
    pub fn clear(&self, bits: Conditions) {
        self.inner.lock(|c| {
            let mut inner = c.borrow_mut();
            inner.bits = inner.bits.without(bits);
        });
    }

    /// Atomically clear `clear` and set `set`, waking every waiter.
    pub fn replace(&self, clear: Conditions, set: Conditions) {
        self.inner.lock(|c| {
            let mut inner = c.borrow_mut();
            inner.bits = inner.bits.without(clear) | set;
            inner.wakers.wake();
        });
    }

    /// Current bits.
    pub fn get(&self) -> Conditions {
        self.inner.lock(|c| c.borrow().bits)
    }

    /// Block until any bit of `mask` is set; returns the matched bits.
    ///
    /// # Errors
    ///
    /// [`StreamError::Timeout`] when the deadline passes first.
    pub async fn wait_any(
        &self,
        mask: Conditions,
        trigger: Trigger,
        timeout: Timeout,
    ) -> Result<Conditions, StreamError> {
        self.wait_until(mask, trigger, timeout.deadline()).await
    }

    pub(crate) async fn wait_until(
        &self,
        mask: Conditions,
        trigger: Trigger,
        deadline: Deadline,
    ) -> Result<Conditions, StreamError> {
        deadline
            .run(poll_fn(|cx| self.poll_any(mask, trigger, cx)))
            .await
    }

    /// [`wait_any`](Self::wait_any) without a deadline.
    pub async fn wait(&self, mask: Conditions, trigger: Trigger) -> Conditions {
        poll_fn(|cx| self.poll_any(mask, trigger, cx)).await
    }

    fn poll_any(&self, mask: Conditions, trigger: Trigger, cx: &mut Context<'_>) -> Poll<Conditions> {
        self.inner.lock(|c| {
            let mut inner = c.borrow_mut();
            let hit = inner.bits & mask;
            if hit.is_empty() {
                inner.wakers.register(cx.waker());
                return Poll::Pending;
            }
            if trigger == Trigger::Edge {
                inner.bits = inner.bits.without(hit.without(self.sticky));
            }
            Poll::Ready(hit)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use embassy_time::Duration;

    const A: Conditions = Conditions::bit(0);
    const B: Conditions = Conditions::bit(1);
    const STOP: Conditions = Conditions::bit(31);

    #[tokio::test]
    async fn test_level_wait_leaves_bits_set() {
        let sig = EventSignal::new(STOP);
        sig.set(A);
        assert_eq!(sig.wait(A | B, Trigger::Level).await, A);
        assert_eq!(sig.get(), A);
    }

    #[tokio::test]
    async fn test_edge_wait_consumes_but_stop_is_sticky() {
        let sig = EventSignal::new(STOP);
        sig.set(A | STOP);
        let hit = sig.wait(A | STOP, Trigger::Edge).await;
        assert_eq!(hit, A | STOP);
        assert_eq!(sig.get(), STOP);
    }

    #[tokio::test]
    async fn test_wait_times_out_when_nothing_set() {
        let sig = EventSignal::new(STOP);
        let res = sig
            .wait_any(A, Trigger::Level, Timeout::After(Duration::from_millis(5)))
            .await;
        assert_eq!(res, Err(StreamError::Timeout));
    }

    #[tokio::test]
    async fn test_set_from_other_task_wakes_waiter() {
        let sig = std::sync::Arc::new(EventSignal::new(STOP));
        let setter = sig.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            setter.set(B);
        });
        let hit = sig.wait_any(A | B, Trigger::Edge, Timeout::Forever).await.unwrap();
        assert_eq!(hit, B);
        assert!(sig.get().is_empty());
        task.await.unwrap();
    }

    #[test]
    fn test_conditions_set_algebra() {
        let ab = A | B;
        assert!(ab.contains(A));
        assert!(ab.intersects(B));
        assert_eq!(ab.without(A), B);
        assert!(!A.intersects(B));
    }
}
