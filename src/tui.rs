use std::io::{self, Stderr};
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyEvent, KeyEventKind, MouseEvent},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::worker::StreamEvent;

pub type Tui = Terminal<CrosstermBackend<Stderr>>;

pub const WINDOW_TITLE: &str = "Chat with GPT";

#[derive(Debug)]
#[allow(dead_code)]
pub enum AppEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize(u16, u16),
    Tick,
    /// Redelivered from the stream worker task
    Stream(StreamEvent),
}

/// Merges terminal input, the animation tick and worker events into one
/// ordered stream consumed on the UI task.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<AppEvent>,
    _tx: mpsc::UnboundedSender<AppEvent>,
    stream_tx: mpsc::UnboundedSender<StreamEvent>,
}

impl EventHandler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _tx = tx.clone();

        // Spawn event reader task
        let tx_events = tx.clone();
        tokio::spawn(async move {
            let mut reader = event::EventStream::new();
            loop {
                match reader.next().await {
                    Some(Ok(evt)) => {
                        let app_event = match evt {
                            Event::Key(key) => {
                                // Only handle key press events, not release
                                if key.kind == KeyEventKind::Press {
                                    Some(AppEvent::Key(key))
                                } else {
                                    None
                                }
                            }
                            Event::Mouse(mouse) => Some(AppEvent::Mouse(mouse)),
                            Event::Resize(w, h) => Some(AppEvent::Resize(w, h)),
                            _ => None,
                        };

                        if let Some(event) = app_event {
                            if tx_events.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "terminal event read failed"),
                    None => break,
                }
            }
        });

        // Spawn tick timer for the typing indicator (300ms interval)
        let tx_tick = tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(300));
            loop {
                interval.tick().await;
                if tx_tick.send(AppEvent::Tick).is_err() {
                    break;
                }
            }
        });

        let (stream_tx, stream_rx) = mpsc::unbounded_channel::<StreamEvent>();
        forward_stream_events(stream_rx, tx.clone());

        Self { rx, _tx, stream_tx }
    }

    /// Sender handed to each stream worker
    pub fn stream_sender(&self) -> mpsc::UnboundedSender<StreamEvent> {
        self.stream_tx.clone()
    }

    pub async fn next(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }
}

/// Redelivers worker events onto the UI event stream, preserving their
/// order. Ends once every worker sender is gone or the UI stops listening.
pub fn forward_stream_events(
    mut stream_rx: mpsc::UnboundedReceiver<StreamEvent>,
    tx: mpsc::UnboundedSender<AppEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(evt) = stream_rx.recv().await {
            if tx.send(AppEvent::Stream(evt)).is_err() {
                break;
            }
        }
    })
}

pub fn init() -> Result<Tui> {
    enable_raw_mode()?;
    execute!(io::stderr(), EnterAlternateScreen, SetTitle(WINDOW_TITLE))?;

    // Enable mouse capture for wheel scrolling
    execute!(io::stderr(), crossterm::event::EnableMouseCapture)?;

    let backend = CrosstermBackend::new(io::stderr());
    let terminal = Terminal::new(backend)?;

    Ok(terminal)
}

pub fn restore() -> Result<()> {
    execute!(io::stderr(), crossterm::event::DisableMouseCapture)?;
    execute!(io::stderr(), LeaveAlternateScreen)?;
    disable_raw_mode()?;
    Ok(())
}

/// Install panic hook to restore terminal on panic
pub fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = restore();
        original_hook(panic_info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forwarded_events_keep_order() {
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let forwarder = forward_stream_events(stream_rx, tx);

        stream_tx.send(StreamEvent::Chunk("Hi".to_string())).unwrap();
        stream_tx.send(StreamEvent::Chunk(" there".to_string())).unwrap();
        stream_tx.send(StreamEvent::Done).unwrap();
        drop(stream_tx);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                AppEvent::Stream(evt) => received.push(evt),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(
            received,
            vec![
                StreamEvent::Chunk("Hi".to_string()),
                StreamEvent::Chunk(" there".to_string()),
                StreamEvent::Done,
            ]
        );
        forwarder.await.unwrap();
    }

    #[tokio::test]
    async fn test_forwarder_stops_when_ui_is_gone() {
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel::<AppEvent>();
        let forwarder = forward_stream_events(stream_rx, tx);

        drop(rx);
        stream_tx.send(StreamEvent::Done).unwrap();
        forwarder.await.unwrap();
    }
}
