//! Cooperative resource quotas.
//!
//! The guest engine fires its interrupt hook at bytecode granularity,
//! many thousands of times per second. The governor keeps that cheap: a
//! 14-bit invocation counter lets all but one in 16384 invocations return
//! immediately, and a real check runs only when the counter wraps. A real
//! check probes guest heap usage (forcing one collection before giving
//! up) and wall-clock time against the configured ceilings.
//!
//! The clock is injected so tests can drive time deterministically, and
//! [`ResourceGovernor::force_checkpoint`] runs a real check regardless of
//! the counter for the same reason.
//!
//! Quotas of zero mean "unset". A script that never reaches an interrupt
//! point cannot be stopped; enforcement is best-effort, bounded by the
//! check stride.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::Error;

/// Invocations between real checks, as a mask over a 14-bit counter.
const CHECK_STRIDE_MASK: u32 = 0x3FFF;

/// Time source for the execution clock.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Test support.
pub struct ManualClock {
    base: Instant,
    offset: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            base: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }
}

/// The slice of the engine a heap check needs: byte usage and the ability
/// to force one collection cycle.
pub trait HeapProbe {
    fn heap_bytes(&self) -> usize;

    fn collect(&self);
}

/// Quota state for one execution context.
pub struct ResourceGovernor {
    ticks: Cell<u32>,
    max_heap: Cell<usize>,
    max_time: Cell<Duration>,
    start: Cell<Option<Instant>>,
    clock: Rc<dyn Clock>,
}

impl ResourceGovernor {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        ResourceGovernor {
            ticks: Cell::new(0),
            max_heap: Cell::new(0),
            max_time: Cell::new(Duration::ZERO),
            start: Cell::new(None),
            clock,
        }
    }

    /// Heap ceiling in bytes; zero is unset.
    pub fn max_heap(&self) -> usize {
        self.max_heap.get()
    }

    pub fn set_max_heap(&self, bytes: usize) {
        self.max_heap.set(bytes);
    }

    /// Time ceiling; zero is unset.
    pub fn max_time(&self) -> Duration {
        self.max_time.get()
    }

    pub fn set_max_time(&self, limit: Duration) {
        self.max_time.set(limit);
    }

    /// Interrupt-hook entry point. Almost always returns immediately;
    /// every 16384th invocation runs a real check.
    pub fn checkpoint(&self, heap: &dyn HeapProbe) -> Result<(), Error> {
        if self.max_heap.get() == 0 && self.max_time.get().is_zero() {
            return Ok(());
        }
        let ticks = self.ticks.get().wrapping_add(1);
        if ticks & CHECK_STRIDE_MASK != 0 {
            self.ticks.set(ticks);
            return Ok(());
        }
        self.ticks.set(0);
        self.force_checkpoint(heap)
    }

    /// Run a real quota check immediately, ignoring the stride counter.
    pub fn force_checkpoint(&self, heap: &dyn HeapProbe) -> Result<(), Error> {
        let max_heap = self.max_heap.get();
        if max_heap > 0 {
            let mut used = heap.heap_bytes();
            if used > max_heap {
                // One collection cycle gets a chance to bring usage back
                // under the ceiling before the script is condemned.
                heap.collect();
                used = heap.heap_bytes();
                if used > max_heap {
                    log::warn!("aborting script: heap {used}B over {max_heap}B ceiling");
                    return Err(Error::heap_exhausted());
                }
            }
        }

        let max_time = self.max_time.get();
        if !max_time.is_zero() {
            if let Some(start) = self.start.get() {
                let elapsed = self.clock.now().saturating_duration_since(start);
                if elapsed > max_time {
                    log::warn!(
                        "aborting script: ran {}ms against a {}ms ceiling",
                        elapsed.as_millis(),
                        max_time.as_millis()
                    );
                    return Err(Error::time_exhausted());
                }
            }
        }

        Ok(())
    }

    /// Stamp the execution start time if no execution is already in
    /// flight. Only the outermost call stamps; the returned guard clears
    /// the stamp when that outermost call completes, so nested reentry
    /// stays bounded by the outer budget.
    pub fn begin_execution(&self) -> ExecutionStamp<'_> {
        let stamped = if self.start.get().is_none() {
            self.start.set(Some(self.clock.now()));
            true
        } else {
            false
        };
        ExecutionStamp {
            governor: self,
            stamped,
        }
    }

    #[cfg(test)]
    fn started(&self) -> bool {
        self.start.get().is_some()
    }
}

/// Guard for one `execute` call's claim on the start-time marker.
pub struct ExecutionStamp<'g> {
    governor: &'g ResourceGovernor,
    stamped: bool,
}

impl ExecutionStamp<'_> {
    /// Whether this guard belongs to the outermost execution.
    pub fn is_outermost(&self) -> bool {
        self.stamped
    }
}

impl Drop for ExecutionStamp<'_> {
    fn drop(&mut self) {
        if self.stamped {
            self.governor.start.set(None);
        }
    }
}
