use std::{io, path::Path, time::Duration};

use anyhow::Result;
use crossterm::{
    event::{self, Event as CEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use crate::app::App;
use crate::input::{self, Action};
use crate::report;
use crate::ui;

/// Browse a findings file in the terminal until the user quits.
pub(crate) async fn run(path: &Path) -> Result<()> {
    let findings = report::load_findings(path).await?;
    let app = App::new(path.display().to_string(), findings);

    // Terminal init
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = event_loop(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn event_loop(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, mut app: App) -> Result<()> {
    loop {
        terminal.draw(|frame| ui::draw(frame, &app))?;

        if event::poll(Duration::from_millis(100))?
            && let CEvent::Key(key) = event::read()?
            && input::handle_key_event(key, &mut app) == Action::Quit
        {
            return Ok(());
        }
    }
}
