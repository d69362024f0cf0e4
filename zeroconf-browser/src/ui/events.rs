//! Terminal input pump.

use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum Event {
    Key(KeyEvent),
    Resize,
    Tick,
}

/// Reads crossterm events on a blocking thread and forwards them.
/// The thread exits once the receiver is dropped.
pub struct TerminalEvents {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl TerminalEvents {
    pub fn start() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || {
            let tick_rate = Duration::from_millis(250);
            loop {
                let event = if event::poll(tick_rate).unwrap_or(false) {
                    match event::read() {
                        Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => Event::Key(key),
                        Ok(CrosstermEvent::Resize(..)) => Event::Resize,
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::warn!("Error reading event: {}", e);
                            continue;
                        }
                    }
                } else {
                    Event::Tick
                };
                if sender.send(event).is_err() {
                    break;
                }
            }
        });
        Self { receiver }
    }

    pub async fn next(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}
