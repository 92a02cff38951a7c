//! Outbound transport capability.
//!
//! The engine posts responses through a [`ResponseSink`] and never learns
//! what sits behind it: a worker channel, a stdout writer, or a test buffer.

use crate::messages::OutboundMessage;

/// Receives every outbound message in emission order.
pub trait ResponseSink {
    fn post(&mut self, message: OutboundMessage);
}

impl<F: FnMut(OutboundMessage)> ResponseSink for F {
    fn post(&mut self, message: OutboundMessage) {
        self(message)
    }
}

/// Collects messages in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub messages: Vec<OutboundMessage>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every collected message.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.messages)
    }
}

impl ResponseSink for VecSink {
    fn post(&mut self, message: OutboundMessage) {
        self.messages.push(message);
    }
}
