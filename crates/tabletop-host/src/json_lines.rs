//! JSON-lines framing for stdin/stdout.

use std::io::{BufRead, Write};

use crossbeam_channel::Sender;
use tabletop_core::{InboundMessage, OutboundMessage, ResponseSink};

/// Events from the stdin reader thread to the main loop.
#[derive(Debug)]
pub enum HostEvent {
    Inbound(InboundMessage),
    Closed,
}

/// Read one inbound message per line until EOF. Malformed lines are logged
/// and skipped.
pub fn read_messages(reader: impl BufRead, tx: &Sender<HostEvent>) {
    for (number, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to read input: {e}");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(trimmed) {
            Ok(message) => {
                if tx.send(HostEvent::Inbound(message)).is_err() {
                    return;
                }
            }
            Err(e) => log::warn!("Skipping malformed message on line {}: {e}", number + 1),
        }
    }
    let _ = tx.send(HostEvent::Closed);
}

/// Writes each outbound message as one line of JSON.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResponseSink for JsonLinesSink<W> {
    fn post(&mut self, message: OutboundMessage) {
        let written = serde_json::to_writer(&mut self.writer, &message)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());
        if let Err(e) = written {
            log::error!("Failed to write outbound message: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_reader_skips_bad_lines() {
        let input = "{\"type\": \"flush\", \"request_id\": 1}\n\nnot json\n{\"type\": \"set_grid_snap_enabled\", \"enabled\": true}\n";
        let (tx, rx) = unbounded();
        read_messages(input.as_bytes(), &tx);

        let events: Vec<HostEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], HostEvent::Inbound(InboundMessage::Flush { request_id: 1 })));
        assert!(matches!(
            events[1],
            HostEvent::Inbound(InboundMessage::SetGridSnapEnabled { enabled: true })
        ));
        assert!(matches!(events[2], HostEvent::Closed));
    }

    #[test]
    fn test_sink_writes_lines() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.post(OutboundMessage::PanStarted);
        sink.post(OutboundMessage::AwarenessUpdateRate { hz: 30.0 });
        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], r#"{"type":"pan_started"}"#);
        assert_eq!(lines[1], r#"{"type":"awareness_update_rate","hz":30.0}"#);
    }
}
