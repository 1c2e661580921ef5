//! Simulation engine
//!
//! Single-threaded virtual-time discrete-event kernel. Events execute in
//! non-decreasing time order with FIFO tie-break; handlers schedule follow-up
//! events and cancel pending timers through an `EngineContext`. The scenario
//! layer only talks to the engine through the `SimulationEngine` trait.

pub mod scheduler;

pub use scheduler::{EventId, Scheduler};

use crate::time::SimTime;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("cannot schedule event at {requested} when current time is {now}")]
    NonCausal { requested: SimTime, now: SimTime },
}

/// Receives every dispatched event
pub trait EventHandler<E> {
    fn handle(&mut self, ctx: &mut EngineContext<'_, E>, event: E);
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(&mut EngineContext<'_, E>, E),
{
    fn handle(&mut self, ctx: &mut EngineContext<'_, E>, event: E) {
        (self)(ctx, event)
    }
}

/// Scheduling access handed to a handler during dispatch
pub struct EngineContext<'a, E> {
    scheduler: &'a mut Scheduler<E>,
    now: SimTime,
}

impl<'a, E> EngineContext<'a, E> {
    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn schedule_at(&mut self, at: SimTime, event: E) -> Result<EventId, EngineError> {
        if at < self.now {
            return Err(EngineError::NonCausal {
                requested: at,
                now: self.now,
            });
        }
        Ok(self.scheduler.schedule(at, event))
    }

    /// Schedule `delay_ns` after the current time
    pub fn schedule_after(&mut self, delay_ns: u64, event: E) -> EventId {
        self.scheduler.schedule(self.now.plus_nanos(delay_ns), event)
    }

    pub fn cancel(&mut self, id: EventId) -> bool {
        self.scheduler.cancel(id)
    }

    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }
}

/// The engine surface the scenario driver depends on
pub trait SimulationEngine<E> {
    /// Current virtual time
    fn now(&self) -> SimTime;

    /// Register an event at an absolute time
    fn schedule(&mut self, at: SimTime, event: E) -> Result<EventId, EngineError>;

    /// Cancel a pending timer
    fn cancel(&mut self, id: EventId) -> bool;

    /// Events strictly after `at` are never processed
    fn schedule_stop(&mut self, at: SimTime);

    /// Process events until the queue drains or the stop time is reached.
    /// Returns the number of events dispatched.
    fn run(&mut self, handler: &mut dyn EventHandler<E>) -> u64;

    /// Drop pending events and reset the clock
    fn destroy(&mut self);
}

/// Default engine backed by `Scheduler`
#[derive(Debug)]
pub struct Simulator<E> {
    scheduler: Scheduler<E>,
    now: SimTime,
    stop_at: Option<SimTime>,
    events_processed: u64,
}

impl<E> Simulator<E> {
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            now: SimTime::ZERO,
            stop_at: None,
            events_processed: 0,
        }
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }

    pub fn stop_time(&self) -> Option<SimTime> {
        self.stop_at
    }
}

impl<E> Default for Simulator<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> SimulationEngine<E> for Simulator<E> {
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule(&mut self, at: SimTime, event: E) -> Result<EventId, EngineError> {
        if at < self.now {
            return Err(EngineError::NonCausal {
                requested: at,
                now: self.now,
            });
        }
        Ok(self.scheduler.schedule(at, event))
    }

    fn cancel(&mut self, id: EventId) -> bool {
        self.scheduler.cancel(id)
    }

    fn schedule_stop(&mut self, at: SimTime) {
        self.stop_at = Some(at);
    }

    fn run(&mut self, handler: &mut dyn EventHandler<E>) -> u64 {
        let start = self.events_processed;
        while let Some(next_at) = self.scheduler.peek_time() {
            if self.stop_at.is_some_and(|stop| next_at > stop) {
                break;
            }
            let Some((at, _id, event)) = self.scheduler.pop_next() else {
                break;
            };
            debug_assert!(at >= self.now, "virtual time went backward");
            self.now = at;
            self.events_processed += 1;

            let mut ctx = EngineContext {
                scheduler: &mut self.scheduler,
                now: at,
            };
            handler.handle(&mut ctx, event);
        }
        if let Some(stop) = self.stop_at {
            if stop > self.now {
                self.now = stop;
            }
        }
        let processed = self.events_processed - start;
        debug!(
            "Engine run finished at {} after {} events ({} pending)",
            self.now,
            processed,
            self.scheduler.len()
        );
        processed
    }

    fn destroy(&mut self) {
        self.scheduler.clear();
        self.now = SimTime::ZERO;
        self.stop_at = None;
    }
}
