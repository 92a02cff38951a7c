//! JSON-lines host for the tabletop interaction engine.
//!
//! Reads inbound messages from stdin, one JSON object per line, and writes
//! outbound messages to stdout the same way. An optional first argument names
//! a JSON configuration file. `RUST_LOG` controls diagnostics on stderr.

mod json_lines;

use std::io::BufReader;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, unbounded};
use tabletop_core::{Engine, EngineConfig, KindRegistry};

use json_lines::{HostEvent, JsonLinesSink, read_messages};

/// Frame interval for `Engine::tick`.
const FRAME: Duration = Duration::from_millis(16);

fn load_config() -> EngineConfig {
    let Some(path) = std::env::args().nth(1) else {
        return EngineConfig::default();
    };
    match EngineConfig::load(&path) {
        Ok(config) => {
            log::info!("Loaded config from {path}");
            config
        }
        Err(e) => {
            log::error!("Failed to load config from {path}: {e}, using defaults");
            EngineConfig::default()
        }
    }
}

fn main() {
    env_logger::init();
    log::info!("Starting tabletop host");

    let config = load_config();
    let registry = KindRegistry::with_defaults();
    let mut engine = Engine::new(config, &registry, JsonLinesSink::new(std::io::stdout().lock()));

    let (tx, rx) = unbounded::<HostEvent>();
    std::thread::spawn(move || read_messages(BufReader::new(std::io::stdin()), &tx));

    let frames = tick(FRAME);
    loop {
        select! {
            recv(rx) -> event => match event {
                Ok(HostEvent::Inbound(message)) => engine.handle_message(message, Instant::now()),
                Ok(HostEvent::Closed) | Err(_) => break,
            },
            recv(frames) -> now => {
                engine.tick(now.unwrap_or_else(|_| Instant::now()));
                if engine.take_redraw_request() {
                    log::trace!("Redraw: {} display items", engine.display_list().len());
                }
            },
        }
    }

    // Let pending debounces and polls resolve before exiting.
    let deadline = Instant::now() + Duration::from_millis(u64::from(engine.config().max_poll_frames) * 16 + 500);
    while engine.has_pending_work() && Instant::now() < deadline {
        std::thread::sleep(FRAME);
        engine.tick(Instant::now());
    }
    log::info!("Input closed, shutting down");
}
