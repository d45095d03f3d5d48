//! Outbound node events.
//!
//! The [`NodeService`](super::service::NodeService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other side
//! decide what to do with them; the shipped one writes a log line.

/// Structured events emitted by the node core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// The machine has been entered for the first time (fresh or resumed).
    Started {
        machine: &'static str,
        state: &'static str,
        resumed: bool,
    },

    /// The machine moved between states.
    StateChanged {
        from: &'static str,
        to: &'static str,
    },

    /// The tick counter reached the shared store.
    TickStored(u64),

    /// A background loop raised the fatal flag.
    Fault(String),

    /// The run loop returned after an exit request.
    Stopped { tick: u64 },
}
