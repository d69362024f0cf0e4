mod events;
mod render;

use std::io::{self, Stdout};
use std::time::Duration;
use anyhow::{Context, Result};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use crate::app::{App, Effect};
use crate::config::DiscoveryConfig;
use crate::mdns::scan::scan_known_types;
use crate::mdns::DiscoveryService;
use crate::session::SessionEvent;
use events::{Event, TerminalEvents};

type Term = Terminal<CrosstermBackend<Stdout>>;

/// Runs the control loop until the user quits. The discovery session is
/// closed and the terminal restored on every exit path.
pub async fn run<D: DiscoveryService>(
    mut app: App<D>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    discovery: &DiscoveryConfig,
) -> Result<()> {
    install_panic_hook();

    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))
        .context("Failed to create terminal")?;

    let result = event_loop(&mut terminal, &mut app, session_rx, discovery).await;

    app.shutdown();
    restore_terminal(&mut terminal)?;
    result
}

async fn event_loop<D: DiscoveryService>(
    terminal: &mut Term,
    app: &mut App<D>,
    mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    discovery: &DiscoveryConfig,
) -> Result<()> {
    let mut events = TerminalEvents::start();
    let (scan_tx, mut scan_rx) = mpsc::unbounded_channel();
    let scan_duration = Duration::from_secs(discovery.type_scan_secs);

    app.start_session();
    let mut needs_redraw = true;

    loop {
        if needs_redraw {
            let view: &App<D> = app;
            terminal.draw(|frame| render::draw(frame, view))?;
            needs_redraw = false;
        }

        tokio::select! {
            Some(event) = events.next() => match event {
                Event::Key(key) => {
                    needs_redraw = true;
                    match app.handle_key(key) {
                        Effect::Quit => break,
                        Effect::ScanTypes => {
                            let tx = scan_tx.clone();
                            let interface = discovery.interface.clone();
                            tokio::spawn(async move {
                                let _ = tx.send(scan_known_types(interface, scan_duration).await);
                            });
                        }
                        Effect::None => {}
                    }
                }
                Event::Resize => needs_redraw = true,
                Event::Tick => {}
            },
            Some(event) = session_rx.recv() => {
                app.handle_session_event(event).await;
                needs_redraw = true;
            }
            Some(result) = scan_rx.recv() => {
                app.types_scanned(result);
                needs_redraw = true;
            }
            else => break,
        }
    }

    Ok(())
}

fn restore_terminal(terminal: &mut Term) -> Result<()> {
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;
    Ok(())
}

fn install_panic_hook() {
    let original = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original(info);
    }));
}
