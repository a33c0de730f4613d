use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use tokio::sync::mpsc;

use crate::app::{App, Submission};
use crate::tui::AppEvent;
use crate::worker::{self, CompletionClient, StreamEvent};

/// What the event loop needs to start workers
pub struct Context {
    pub client: CompletionClient,
    pub stream_tx: mpsc::UnboundedSender<StreamEvent>,
}

pub fn handle_event(app: &mut App, ctx: &Context, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, ctx, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => app.sync_scroll(),
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Stream(event) => handle_stream(app, event),
    }
}

/// Applies one worker event to the view. Runs on the UI task only.
pub fn handle_stream(app: &mut App, event: StreamEvent) {
    match event {
        StreamEvent::Chunk(text) => app.on_chunk(&text),
        StreamEvent::Done => app.on_done(),
        StreamEvent::Failed(message) => app.on_failed(&message),
    }
}

fn handle_key(app: &mut App, ctx: &Context, key: KeyEvent) {
    // Global keys
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') => app.should_quit = true,
            KeyCode::Char('l') => app.clear_display(),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Esc => app.should_quit = true,
        KeyCode::Enter => submit(app, ctx),
        KeyCode::Backspace => app.backspace(),
        KeyCode::Delete => app.delete(),
        KeyCode::Left => app.cursor_left(),
        KeyCode::Right => app.cursor_right(),
        KeyCode::Home => app.cursor_home(),
        KeyCode::End => app.cursor_end(),
        KeyCode::Up => app.scroll_up(1),
        KeyCode::Down => app.scroll_down(1),
        KeyCode::PageUp => {
            let rows = app.page_size();
            app.scroll_up(rows);
        }
        KeyCode::PageDown => {
            let rows = app.page_size();
            app.scroll_down(rows);
        }
        KeyCode::Char(c) => app.insert_char(c),
        _ => {}
    }
}

/// Runs the view's submit and starts a worker when it asks for one.
fn submit(app: &mut App, ctx: &Context) {
    if let Submission::Send(request) = app.submit() {
        // Detached: runs until the body ends or fails
        worker::spawn(ctx.client.clone(), request, ctx.stream_tx.clone());
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}
