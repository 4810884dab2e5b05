use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::pdf::Command;

/// Where keystrokes go
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyFocus {
    #[default]
    Viewer,
    /// The annotation text field owns the keyboard
    AnnotationField,
}

#[derive(Clone, Debug, PartialEq)]
pub enum KeyAction {
    Command(Command),
    /// Key belongs to the focused text field
    PassThrough(KeyEvent),
    Quit,
    Ignored,
}

/// Translate one key press into a viewer action.
///
/// Release and repeat events are ignored. With the annotation field focused
/// only Escape reaches the viewer.
pub fn map_key(key: &KeyEvent, focus: KeyFocus) -> KeyAction {
    if key.kind != KeyEventKind::Press {
        return KeyAction::Ignored;
    }

    if focus == KeyFocus::AnnotationField {
        return match key.code {
            KeyCode::Esc => KeyAction::Command(Command::CloseOverlays),
            _ => KeyAction::PassThrough(*key),
        };
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => KeyAction::Quit,
            _ => KeyAction::Ignored,
        };
    }

    let command = match key.code {
        KeyCode::Right | KeyCode::Char(' ') => Command::Next,
        KeyCode::Left => Command::Prev,
        KeyCode::Home => Command::Home,
        KeyCode::End => Command::End,
        KeyCode::Char('+') | KeyCode::Char('=') => Command::ZoomIn,
        KeyCode::Char('-') => Command::ZoomOut,
        KeyCode::Char('0') => Command::ResetZoom,
        KeyCode::Char('r') => Command::Rotate,
        KeyCode::Char('m') => Command::ToggleReadingMode,
        KeyCode::Char('b') => Command::ToggleBookmark,
        KeyCode::Char('a') => Command::ToggleAnnotationPanel,
        KeyCode::Char('s') => Command::ToggleSettings,
        KeyCode::Char('h') | KeyCode::Char('?') => Command::ToggleHelp,
        KeyCode::Esc => Command::CloseOverlays,
        KeyCode::Char('q') => return KeyAction::Quit,
        _ => return KeyAction::Ignored,
    };
    KeyAction::Command(command)
}
