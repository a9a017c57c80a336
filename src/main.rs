mod app;
mod ui;

use anyhow::Result;
use app::{poll_event, App, AppAction};
use crossterm::event::Event;
use log::{info, warn};
use ratatui::DefaultTerminal;
use speedmeter::history::{self, History};
use speedmeter::settings::Settings;
use speedmeter::speedtest::server::default_servers;
use speedmeter::speedtest::{SpeedTest, TestUpdate};
use std::fs::{self, File};
use std::time::Duration;
use tokio::sync::mpsc;
use ui::draw_ui;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal).await;

    ratatui::restore();
    result
}

/// The terminal belongs to the UI, so logs go to a file. Set `RUST_LOG`
/// to change the level.
fn init_logging() {
    let dir = history::data_dir().unwrap_or_else(std::env::temp_dir);
    let file = fs::create_dir_all(&dir).and_then(|_| File::create(dir.join("speedmeter.log")));

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    match file {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(_) => {
            // Nowhere safe to write; stay quiet rather than corrupt the screen.
            builder.filter_level(log::LevelFilter::Off);
        }
    }
    let _ = builder.try_init();
}

async fn run_app(terminal: &mut DefaultTerminal) -> Result<()> {
    let engine = SpeedTest::new(default_servers());
    let mut app = App::new(engine, Settings::load(), History::load());
    let mut test_rx: Option<mpsc::UnboundedReceiver<TestUpdate>> = None;
    info!("speedmeter started");

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        // Handle test updates
        if let Some(rx) = test_rx.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(update) => app.handle_update(update),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        test_rx = None;
                        break;
                    }
                }
            }
        }

        // Handle input
        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => {
                        match app.engine.start(app.settings.run_config()) {
                            Some(rx) => {
                                app.reset_for_new_test();
                                test_rx = Some(rx);
                            }
                            None => warn!("A test is already running"),
                        }
                    }
                    AppAction::CancelTest => app.cancel_test(),
                    AppAction::SaveSettings => app.save_settings(),
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    app.engine.stop();
    Ok(())
}
