use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::pagination::{PaginationController, Side};
use crate::settings::{ViewSettings, ViewSettingsPatch};
use crate::surface::RenderingSurface;

const DEFAULT_ZOOM: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderAction {
    GoLeft,
    GoRight,
    /// Scroll back by a few lines.
    GoPrev,
    /// Scroll forward by a few lines.
    GoNext,
    HalfPageUp,
    HalfPageDown,
    Back,
    Forward,
    ToggleScrollMode,
    Reload,
    ResetZoom,
    Escape,
}

/// What the pane still has to do after an action ran.
#[derive(Debug, Clone, PartialEq)]
pub enum ShortcutEffect {
    None,
    UpdateSettings(ViewSettingsPatch),
    DismissPopup,
}

pub fn action_for(key: &KeyEvent) -> Option<ReaderAction> {
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    let action = match key.code {
        KeyCode::Char('0') if ctrl => ReaderAction::ResetZoom,
        _ if ctrl => return None,
        KeyCode::Left if shift => ReaderAction::Back,
        KeyCode::Right if shift => ReaderAction::Forward,
        KeyCode::Down if shift => ReaderAction::HalfPageDown,
        KeyCode::Up if shift => ReaderAction::HalfPageUp,
        KeyCode::Left | KeyCode::PageUp | KeyCode::Char('h') => ReaderAction::GoLeft,
        KeyCode::Right | KeyCode::PageDown | KeyCode::Char('l') | KeyCode::Char(' ') => {
            ReaderAction::GoRight
        }
        KeyCode::Down | KeyCode::Char('j') => ReaderAction::GoNext,
        KeyCode::Up | KeyCode::Char('k') => ReaderAction::GoPrev,
        KeyCode::Char('d') => ReaderAction::HalfPageDown,
        KeyCode::Char('u') => ReaderAction::HalfPageUp,
        KeyCode::Char('H') => ReaderAction::Back,
        KeyCode::Char('L') => ReaderAction::Forward,
        KeyCode::Char('J') => ReaderAction::ToggleScrollMode,
        KeyCode::Char('R') => ReaderAction::Reload,
        KeyCode::Esc => ReaderAction::Escape,
        _ => return None,
    };
    Some(action)
}

/// Buttons of the selection popup that have a key binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupAction {
    Copy,
    Explain,
    AskAi,
    ToggleHighlight,
    AddNote,
}

/// Popup bindings are plain letters and only apply while the popup is open,
/// so they shadow the reader bindings.
pub fn popup_action_for(key: &KeyEvent) -> Option<PopupAction> {
    if key
        .modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER)
    {
        return None;
    }
    match key.code {
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'c' => Some(PopupAction::Copy),
            'e' => Some(PopupAction::Explain),
            'a' => Some(PopupAction::AskAi),
            't' => Some(PopupAction::ToggleHighlight),
            'n' => Some(PopupAction::AddNote),
            _ => None,
        },
        _ => None,
    }
}

/// Three lines of text at the configured font size.
pub fn line_step(settings: &ViewSettings) -> f64 {
    settings.default_font_size * settings.line_height * 3.0
}

/// Runs an action against the surface. Inactive panes do nothing.
pub fn execute(
    action: ReaderAction,
    pagination: &PaginationController,
    surface: &mut dyn RenderingSurface,
    settings: &ViewSettings,
) -> ShortcutEffect {
    if !pagination.is_active() {
        return ShortcutEffect::None;
    }
    match action {
        ReaderAction::GoLeft => pagination.paginate(surface, settings, Side::Left),
        ReaderAction::GoRight => pagination.paginate(surface, settings, Side::Right),
        ReaderAction::GoPrev => surface.prev(Some(line_step(settings))),
        ReaderAction::GoNext => surface.next(Some(line_step(settings))),
        ReaderAction::HalfPageUp | ReaderAction::HalfPageDown => {
            if settings.scrolled {
                let half = surface.renderer().metrics().size / 2.0;
                if action == ReaderAction::HalfPageDown {
                    surface.next(Some(half));
                } else {
                    surface.prev(Some(half));
                }
            }
        }
        ReaderAction::Back => pagination.back(surface),
        ReaderAction::Forward => pagination.forward(surface),
        ReaderAction::Reload => pagination.reload(surface),
        ReaderAction::ToggleScrollMode => {
            return ShortcutEffect::UpdateSettings(ViewSettingsPatch {
                scrolled: Some(!settings.scrolled),
                ..Default::default()
            });
        }
        ReaderAction::ResetZoom => {
            return ShortcutEffect::UpdateSettings(ViewSettingsPatch {
                zoom_level: Some(DEFAULT_ZOOM),
                ..Default::default()
            });
        }
        ReaderAction::Escape => return ShortcutEffect::DismissPopup,
    }
    ShortcutEffect::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::RendererMetrics;
    use crate::test_utils::{MockSurface, SurfaceCall};

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_bindings() {
        let none = KeyModifiers::empty();
        assert_eq!(action_for(&key(KeyCode::Char('h'), none)), Some(ReaderAction::GoLeft));
        assert_eq!(action_for(&key(KeyCode::Char(' '), none)), Some(ReaderAction::GoRight));
        assert_eq!(action_for(&key(KeyCode::PageDown, none)), Some(ReaderAction::GoRight));
        assert_eq!(action_for(&key(KeyCode::Left, KeyModifiers::SHIFT)), Some(ReaderAction::Back));
        assert_eq!(
            action_for(&key(KeyCode::Char('J'), KeyModifiers::SHIFT)),
            Some(ReaderAction::ToggleScrollMode)
        );
        assert_eq!(action_for(&key(KeyCode::Char('R'), none)), Some(ReaderAction::Reload));
        assert_eq!(
            action_for(&key(KeyCode::Char('0'), KeyModifiers::CONTROL)),
            Some(ReaderAction::ResetZoom)
        );
        assert_eq!(action_for(&key(KeyCode::Char('h'), KeyModifiers::CONTROL)), None);
        assert_eq!(action_for(&key(KeyCode::Char('x'), none)), None);
    }

    #[test]
    fn test_popup_bindings_ignore_modified_keys() {
        let none = KeyModifiers::empty();
        assert_eq!(popup_action_for(&key(KeyCode::Char('c'), none)), Some(PopupAction::Copy));
        assert_eq!(
            popup_action_for(&key(KeyCode::Char('T'), KeyModifiers::SHIFT)),
            Some(PopupAction::ToggleHighlight)
        );
        assert_eq!(popup_action_for(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)), None);
        assert_eq!(popup_action_for(&key(KeyCode::Enter, none)), None);
    }

    #[test]
    fn test_line_scroll_uses_font_metrics() {
        let mut surface = MockSurface::new();
        let pagination = PaginationController::new("b1");
        let settings = ViewSettings::default();
        execute(ReaderAction::GoNext, &pagination, &mut surface, &settings);
        let expected = 16.0 * 1.6 * 3.0;
        assert_eq!(surface.calls, vec![SurfaceCall::Next(Some(expected))]);
    }

    #[test]
    fn test_half_page_only_in_scrolled_flow() {
        let mut surface = MockSurface::new();
        surface.metrics = RendererMetrics {
            scrolled: true,
            size: 600.0,
            ..Default::default()
        };
        let pagination = PaginationController::new("b1");
        let mut settings = ViewSettings::default();
        execute(ReaderAction::HalfPageDown, &pagination, &mut surface, &settings);
        assert!(surface.calls.is_empty());

        settings.scrolled = true;
        execute(ReaderAction::HalfPageUp, &pagination, &mut surface, &settings);
        assert_eq!(surface.calls, vec![SurfaceCall::Prev(Some(300.0))]);
    }

    #[test]
    fn test_toggle_scroll_mode_returns_patch() {
        let mut surface = MockSurface::new();
        let pagination = PaginationController::new("b1");
        let effect = execute(
            ReaderAction::ToggleScrollMode,
            &pagination,
            &mut surface,
            &ViewSettings::default(),
        );
        let ShortcutEffect::UpdateSettings(patch) = effect else {
            panic!("expected a settings patch");
        };
        assert_eq!(patch.scrolled, Some(true));
    }

    #[test]
    fn test_inactive_pane_ignores_shortcuts() {
        let mut surface = MockSurface::new();
        let mut pagination = PaginationController::new("b1");
        pagination.set_active(false);
        let effect = execute(ReaderAction::GoNext, &pagination, &mut surface, &ViewSettings::default());
        assert_eq!(effect, ShortcutEffect::None);
        assert!(surface.calls.is_empty());
    }
}
