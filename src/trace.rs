//! Trace bus: a synchronous pub/sub channel the kernel emits internal
//! actions on, plus an ambient `log`-crate bridge that fires
//! independently of whether any handler is registered.
//!
//! Handler errors are never swallowed: a panic inside a handler
//! propagates out of the kernel call that triggered it, because a
//! silently-broken trace handler would mask the very bugs tracing
//! exists to reveal.

use std::fmt;

use crate::ids::{ProcessId, ResourceId};
use crate::time::Time;

/// The four trace channels the kernel emits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceChannel {
    Events,
    Resources,
    Processes,
    SimEvents,
}

impl TraceChannel {
    const ALL: [TraceChannel; 4] = [
        TraceChannel::Events,
        TraceChannel::Resources,
        TraceChannel::Processes,
        TraceChannel::SimEvents,
    ];

    fn bit(self) -> u8 {
        match self {
            TraceChannel::Events => 1 << 0,
            TraceChannel::Resources => 1 << 1,
            TraceChannel::Processes => 1 << 2,
            TraceChannel::SimEvents => 1 << 3,
        }
    }
}

/// A bitmask of channels; `enable_trace(mask)` takes one of these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceMask(u8);

impl TraceMask {
    pub const NONE: TraceMask = TraceMask(0);

    pub fn all() -> TraceMask {
        TraceMask(TraceChannel::ALL.iter().fold(0, |acc, c| acc | c.bit()))
    }

    pub fn of(channels: &[TraceChannel]) -> TraceMask {
        TraceMask(channels.iter().fold(0, |acc, c| acc | c.bit()))
    }

    pub fn contains(self, channel: TraceChannel) -> bool {
        self.0 & channel.bit() != 0
    }
}

/// Payload attached to a trace event: time, operation tag,
/// resource/event name, and a free-form detail string.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub time: Time,
    pub channel: TraceChannel,
    pub op: &'static str,
    pub process: Option<ProcessId>,
    pub resource: Option<ResourceId>,
    pub name: Option<String>,
    pub detail: String,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[t={:.6}] {:?}::{} {}", self.time, self.channel, self.op, self.detail)
    }
}

type Handler = Box<dyn FnMut(&TraceEvent)>;

/// The trace bus itself: a mask of enabled channels plus a list of
/// handlers subscribed via `on`. `emit` is called by every kernel
/// component for its own internal actions; it is a no-op (besides the
/// `log` bridge) when the channel is disabled or has no handlers.
#[derive(Default)]
pub(crate) struct TraceBus {
    mask: TraceMask,
    handlers: Vec<(TraceChannel, Handler)>,
}

impl TraceBus {
    pub fn enable(&mut self, mask: TraceMask) {
        self.mask = mask;
    }

    pub fn disable(&mut self) {
        self.mask = TraceMask::NONE;
    }

    pub fn is_enabled(&self, channel: TraceChannel) -> bool {
        self.mask.contains(channel)
    }

    pub fn on(&mut self, channel: TraceChannel, handler: Handler) {
        self.handlers.push((channel, handler));
    }

    /// Dispatch `event` to every handler subscribed to its channel, then
    /// mirror it to the `log` crate at a severity matching its channel.
    /// Handler panics are intentionally *not* caught: they must
    /// propagate out of whatever kernel call produced the event.
    pub fn emit(&mut self, event: TraceEvent) {
        log_bridge(&event);
        if !self.is_enabled(event.channel) {
            return;
        }
        for (channel, handler) in self.handlers.iter_mut() {
            if *channel == event.channel {
                handler(&event);
            }
        }
    }
}

fn log_bridge(event: &TraceEvent) {
    match event.channel {
        TraceChannel::Events => log::trace!("{event}"),
        TraceChannel::Processes => {
            if event.op == "fail" {
                log::warn!("{event}");
            } else {
                log::trace!("{event}");
            }
        }
        TraceChannel::Resources => log::debug!("{event}"),
        TraceChannel::SimEvents => log::debug!("{event}"),
    }
}
