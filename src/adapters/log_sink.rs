//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing node events through the `log`
//! facade, which the binary routes to `tracing-subscriber`.

use log::{error, info};

use crate::app::events::NodeEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`NodeEvent`] as one line.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &NodeEvent) {
        match event {
            NodeEvent::Started {
                machine,
                state,
                resumed,
            } => {
                info!(
                    "START | machine={} state={} resumed={}",
                    machine, state, resumed
                );
            }
            NodeEvent::StateChanged { from, to } => {
                info!("STATE | {} -> {}", from, to);
            }
            NodeEvent::TickStored(tick) => {
                log::debug!("TICK  | {}", tick);
            }
            NodeEvent::Fault(detail) => {
                error!("FAULT | {}", detail);
            }
            NodeEvent::Stopped { tick } => {
                info!("STOP  | at tick {}", tick);
            }
        }
    }
}
