use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::App;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    Quit,
}

pub(crate) fn handle_key_event(key: KeyEvent, app: &mut App) -> Action {
    use KeyCode::{BackTab, Char, Down, Enter, Esc, Left, Right, Tab, Up};

    // Global quit shortcuts
    if key.code == Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Action::Quit;
    }
    if key.code == Char('q') && key.modifiers.is_empty() {
        return Action::Quit;
    }

    if app.show_detail {
        if matches!(key.code, Left | Esc | Enter | Char('b')) {
            app.show_detail = false;
        }
        return Action::None;
    }

    match key.code {
        Up | Char('k') => app.move_up(),
        Down | Char('j') => app.move_down(),
        Right | Tab | Char('l') => app.next_level(),
        Left | BackTab | Char('h') => app.previous_level(),
        Enter | Char(' ') => app.show_detail = app.selected().is_some(),
        _ => {}
    }
    Action::None
}
