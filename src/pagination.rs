use std::time::{Duration, Instant};

use log::debug;

use crate::event_source::{FrameMessage, FrameMessageKind, NativeKey};
use crate::settings::ViewSettings;
use crate::surface::{RenderingSurface, TextDirection};
use crate::timer::Deadline;

pub const HEADER_HEIGHT: f64 = 44.0;
pub const FOOTER_HEIGHT: f64 = 44.0;
pub const CHAIN_DELAY: Duration = Duration::from_millis(100);
/// Quiet period a wheel burst needs before it can turn another page.
pub const WHEEL_DEBOUNCE: Duration = Duration::from_millis(100);

const MOUSE_BACK_BUTTON: u8 = 3;
const MOUSE_FORWARD_BUTTON: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn flipped(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollSource {
    Mouse,
    Touch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickZone {
    Left,
    Center,
    Right,
}

/// Distance scrolled by one page turn in scrolled flow.
pub fn scroll_distance(settings: &ViewSettings, size: f64) -> f64 {
    let header = if settings.show_header && settings.show_bars_on_scroll {
        HEADER_HEIGHT
    } else {
        0.0
    };
    let footer = if settings.show_footer && settings.show_bars_on_scroll {
        FOOTER_HEIGHT
    } else {
        0.0
    };
    size - settings.scrolling_overlap - header - footer
}

/// Turns one page toward `side`, honoring flow mode and book direction.
pub fn paginate(surface: &mut dyn RenderingSurface, settings: &ViewSettings, side: Side) {
    let metrics = surface.renderer().metrics();
    if metrics.scrolled {
        let side = if surface.book_dir() == Some(TextDirection::Rtl) {
            side.flipped()
        } else {
            side
        };
        let distance = scroll_distance(settings, metrics.size);
        match side {
            Side::Left => surface.prev(Some(distance)),
            Side::Right => surface.next(Some(distance)),
        }
    } else {
        match side {
            Side::Left => surface.go_left(),
            Side::Right => surface.go_right(),
        }
    }
}

/// Classifies an x coordinate into thirds of the pane.
pub fn classify_click(pane_left: f64, pane_width: f64, x: f64) -> ClickZone {
    let offset = x - pane_left;
    if offset < pane_width / 3.0 {
        ClickZone::Left
    } else if offset < pane_width * 2.0 / 3.0 {
        ClickZone::Center
    } else {
        ClickZone::Right
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainDirection {
    Prev,
    Next,
}

#[derive(Debug, Clone, Copy)]
struct DeferredCheck {
    delta: f64,
    threshold: f64,
}

/// Maps pointer, wheel, touch and key input into navigation calls.
#[derive(Debug)]
pub struct PaginationController {
    book_id: String,
    active: bool,
    pane_left: f64,
    pane_width: f64,
    chain: Option<ChainDirection>,
    chain_deadline: Deadline,
    deferred_touch: Option<DeferredCheck>,
    wheel_guard: Deadline,
}

impl PaginationController {
    pub fn new(book_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            active: true,
            pane_left: 0.0,
            pane_width: 0.0,
            chain: None,
            chain_deadline: Deadline::new(),
            deferred_touch: None,
            wheel_guard: Deadline::new(),
        }
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Horizontal extent of the pane in the same coordinates as click events.
    pub fn set_pane_bounds(&mut self, left: f64, width: f64) {
        self.pane_left = left;
        self.pane_width = width;
    }

    pub fn has_pending_chain(&self) -> bool {
        self.chain.is_some()
    }

    pub fn paginate(&self, surface: &mut dyn RenderingSurface, settings: &ViewSettings, side: Side) {
        if self.active {
            paginate(surface, settings, side);
        }
    }

    pub fn handle_single_click(
        &self,
        surface: &mut dyn RenderingSurface,
        settings: &ViewSettings,
        screen_x: f64,
    ) {
        if !self.active || settings.disable_click || self.pane_width <= 0.0 {
            return;
        }
        let side = match classify_click(self.pane_left, self.pane_width, screen_x) {
            ClickZone::Center => return,
            ClickZone::Left => Side::Left,
            ClickZone::Right => Side::Right,
        };
        let side = if settings.swap_click_area {
            side.flipped()
        } else {
            side
        };
        paginate(surface, settings, side);
    }

    /// Handles wheel and mouse-button messages for this book. Clicks are
    /// routed through [`handle_single_click`](Self::handle_single_click) by
    /// the pane, after other consumers had their chance.
    pub fn handle_message(
        &mut self,
        surface: &mut dyn RenderingSurface,
        settings: &ViewSettings,
        message: &FrameMessage,
        now: Instant,
    ) {
        if !self.active || message.book_id != self.book_id {
            return;
        }
        match message.kind {
            FrameMessageKind::Wheel { delta_y } => {
                if settings.scrolled {
                    self.handle_continuous_scroll(surface, settings, ScrollSource::Mouse, -delta_y, 0.0, now);
                } else if delta_y != 0.0 {
                    self.turn_by_wheel(surface, delta_y, now);
                }
            }
            FrameMessageKind::TouchMove { delta } => {
                self.handle_continuous_scroll(surface, settings, ScrollSource::Touch, delta, 0.0, now);
            }
            FrameMessageKind::MouseUp { button } => match button {
                MOUSE_BACK_BUTTON => surface.history_back(),
                MOUSE_FORWARD_BUTTON => surface.history_forward(),
                _ => {}
            },
            _ => {}
        }
    }

    /// Leading-edge debounce: the first event of a burst turns the page and
    /// every later event inside the window extends it.
    fn turn_by_wheel(&mut self, surface: &mut dyn RenderingSurface, delta_y: f64, now: Instant) {
        let quiet = self.wheel_guard.due_at().is_none_or(|at| now >= at);
        self.wheel_guard.arm(now, WHEEL_DEBOUNCE);
        if !quiet {
            return;
        }
        if delta_y > 0.0 {
            surface.next(Some(1.0));
        } else {
            surface.prev(Some(1.0));
        }
    }

    pub fn handle_native_key(
        &self,
        surface: &mut dyn RenderingSurface,
        settings: &ViewSettings,
        key: NativeKey,
    ) {
        if !self.active || !settings.volume_keys_to_flip {
            return;
        }
        match key {
            NativeKey::VolumeUp => paginate(surface, settings, Side::Left),
            NativeKey::VolumeDown => paginate(surface, settings, Side::Right),
        }
    }

    /// Chains into the neighbouring section when the reader scrolls past a
    /// section boundary. `delta` is positive when moving toward the start.
    pub fn handle_continuous_scroll(
        &mut self,
        surface: &mut dyn RenderingSurface,
        settings: &ViewSettings,
        source: ScrollSource,
        delta: f64,
        threshold: f64,
        now: Instant,
    ) {
        if !self.active || !settings.scrolled || !settings.continuous_scroll {
            return;
        }
        match source {
            ScrollSource::Mouse => self.check_boundary(surface, delta, threshold, now),
            ScrollSource::Touch => {
                // Short sections never relocate, so they are checked now.
                let metrics = surface.renderer().metrics();
                if metrics.size >= metrics.view_size {
                    self.check_boundary(surface, delta, threshold, now);
                } else {
                    self.deferred_touch = Some(DeferredCheck { delta, threshold });
                }
            }
        }
    }

    /// Runs a touch check deferred until the surface reported its position.
    pub fn on_relocate(&mut self, surface: &mut dyn RenderingSurface, now: Instant) {
        if let Some(check) = self.deferred_touch.take() {
            self.check_boundary(surface, check.delta, check.threshold, now);
        }
    }

    fn check_boundary(
        &mut self,
        surface: &mut dyn RenderingSurface,
        delta: f64,
        threshold: f64,
        now: Instant,
    ) {
        if self.chain.is_some() {
            return;
        }
        let metrics = surface.renderer().metrics();
        let direction = if metrics.start <= delta && delta > threshold {
            ChainDirection::Prev
        } else if metrics.end.ceil() - delta >= metrics.view_size && delta < -threshold {
            ChainDirection::Next
        } else {
            return;
        };
        debug!("Scheduling section chain {direction:?} for {}", self.book_id);
        self.chain = Some(direction);
        self.chain_deadline.arm(now, CHAIN_DELAY);
    }

    /// Fires a due section chain, sized from the renderer's current metrics.
    pub fn tick(&mut self, surface: &mut dyn RenderingSurface, now: Instant) -> bool {
        if !self.chain_deadline.fire(now) {
            return false;
        }
        let Some(direction) = self.chain.take() else {
            return false;
        };
        let metrics = surface.renderer().metrics();
        match direction {
            ChainDirection::Prev => surface.prev(Some(metrics.start + 1.0)),
            ChainDirection::Next => surface.next(Some(metrics.view_size - metrics.end.floor() + 1.0)),
        }
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.chain_deadline.due_at()
    }

    pub fn back(&self, surface: &mut dyn RenderingSurface) {
        if self.active {
            surface.history_back();
        }
    }

    pub fn forward(&self, surface: &mut dyn RenderingSurface) {
        if self.active {
            surface.history_forward();
        }
    }

    pub fn reload(&self, surface: &mut dyn RenderingSurface) {
        if self.active {
            surface.reload();
        }
    }

    pub fn cancel(&mut self) {
        self.chain = None;
        self.chain_deadline.cancel();
        self.deferred_touch = None;
        self.wheel_guard.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::RendererMetrics;
    use crate::test_utils::{MockSurface, SurfaceCall};

    fn scrolled_settings() -> ViewSettings {
        ViewSettings {
            scrolled: true,
            continuous_scroll: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_click_zones_are_thirds() {
        assert_eq!(classify_click(100.0, 300.0, 150.0), ClickZone::Left);
        assert_eq!(classify_click(100.0, 300.0, 250.0), ClickZone::Center);
        assert_eq!(classify_click(100.0, 300.0, 350.0), ClickZone::Right);
    }

    #[test]
    fn test_paginated_click_turns_pages_and_swap_inverts() {
        let mut surface = MockSurface::new();
        let mut controller = PaginationController::new("b1");
        controller.set_pane_bounds(0.0, 900.0);
        let mut settings = ViewSettings::default();

        controller.handle_single_click(&mut surface, &settings, 50.0);
        controller.handle_single_click(&mut surface, &settings, 450.0);
        controller.handle_single_click(&mut surface, &settings, 850.0);
        assert_eq!(surface.calls, vec![SurfaceCall::GoLeft, SurfaceCall::GoRight]);

        surface.calls.clear();
        settings.swap_click_area = true;
        controller.handle_single_click(&mut surface, &settings, 50.0);
        assert_eq!(surface.calls, vec![SurfaceCall::GoRight]);

        surface.calls.clear();
        settings.disable_click = true;
        controller.handle_single_click(&mut surface, &settings, 50.0);
        assert!(surface.calls.is_empty());
    }

    #[test]
    fn test_scrolled_paginate_subtracts_chrome_and_respects_rtl() {
        let mut surface = MockSurface::new();
        surface.metrics = RendererMetrics {
            scrolled: true,
            size: 800.0,
            ..Default::default()
        };
        let settings = ViewSettings {
            scrolled: true,
            show_bars_on_scroll: true,
            scrolling_overlap: 20.0,
            ..Default::default()
        };

        paginate(&mut surface, &settings, Side::Right);
        assert_eq!(surface.calls, vec![SurfaceCall::Next(Some(692.0))]);

        surface.calls.clear();
        surface.dir = Some(TextDirection::Rtl);
        paginate(&mut surface, &settings, Side::Right);
        assert_eq!(surface.calls, vec![SurfaceCall::Prev(Some(692.0))]);
    }

    #[test]
    fn test_wheel_in_paginated_flow_turns_by_minimal_distance() {
        let mut surface = MockSurface::new();
        let mut controller = PaginationController::new("b1");
        let settings = ViewSettings::default();
        let now = Instant::now();

        let wheel = |delta_y| FrameMessage::new("b1", FrameMessageKind::Wheel { delta_y });
        controller.handle_message(&mut surface, &settings, &wheel(3.0), now);
        controller.handle_message(&mut surface, &settings, &wheel(-3.0), now + WHEEL_DEBOUNCE);
        controller.handle_message(&mut surface, &settings, &wheel(0.0), now + WHEEL_DEBOUNCE * 3);
        let other = FrameMessage::new("b2", FrameMessageKind::Wheel { delta_y: 3.0 });
        controller.handle_message(&mut surface, &settings, &other, now + WHEEL_DEBOUNCE * 5);

        assert_eq!(
            surface.calls,
            vec![SurfaceCall::Next(Some(1.0)), SurfaceCall::Prev(Some(1.0))]
        );
    }

    #[test]
    fn test_wheel_burst_turns_one_page() {
        let mut surface = MockSurface::new();
        let mut controller = PaginationController::new("b1");
        let settings = ViewSettings::default();
        let start = Instant::now();
        let wheel = FrameMessage::new("b1", FrameMessageKind::Wheel { delta_y: 40.0 });

        for step in 0..8 {
            let now = start + Duration::from_millis(step * 30);
            controller.handle_message(&mut surface, &settings, &wheel, now);
        }
        assert_eq!(surface.calls, vec![SurfaceCall::Next(Some(1.0))]);

        // The window restarts with every event of the burst.
        let last = start + Duration::from_millis(7 * 30);
        controller.handle_message(&mut surface, &settings, &wheel, last + Duration::from_millis(99));
        assert_eq!(surface.calls.len(), 1);
        controller.handle_message(&mut surface, &settings, &wheel, last + Duration::from_millis(199));
        assert_eq!(surface.calls.len(), 2);
    }

    #[test]
    fn test_mouse_buttons_navigate_history() {
        let mut surface = MockSurface::new();
        let mut controller = PaginationController::new("b1");
        let settings = ViewSettings::default();
        let now = Instant::now();
        for button in [3, 4, 0] {
            let message = FrameMessage::new("b1", FrameMessageKind::MouseUp { button });
            controller.handle_message(&mut surface, &settings, &message, now);
        }
        assert_eq!(
            surface.calls,
            vec![SurfaceCall::HistoryBack, SurfaceCall::HistoryForward]
        );
    }

    #[test]
    fn test_inactive_pane_ignores_input() {
        let mut surface = MockSurface::new();
        let mut controller = PaginationController::new("b1");
        controller.set_pane_bounds(0.0, 900.0);
        controller.set_active(false);
        let settings = ViewSettings::default();

        controller.handle_single_click(&mut surface, &settings, 50.0);
        controller.back(&mut surface);
        controller.forward(&mut surface);
        controller.reload(&mut surface);
        controller.paginate(&mut surface, &settings, Side::Right);
        assert!(surface.calls.is_empty());
    }

    #[test]
    fn test_mouse_chain_to_next_section_reads_metrics_at_fire_time() {
        let start = Instant::now();
        let mut surface = MockSurface::new();
        surface.metrics = RendererMetrics {
            scrolled: true,
            start: 1200.0,
            end: 2000.0,
            size: 800.0,
            view_size: 2000.0,
        };
        let mut controller = PaginationController::new("b1");
        let settings = scrolled_settings();

        controller.handle_continuous_scroll(&mut surface, &settings, ScrollSource::Mouse, -30.0, 0.0, start);
        assert!(controller.has_pending_chain());
        // A second check while one is pending is ignored.
        controller.handle_continuous_scroll(&mut surface, &settings, ScrollSource::Mouse, -30.0, 0.0, start);

        surface.metrics.end = 1999.5;
        assert!(!controller.tick(&mut surface, start + Duration::from_millis(99)));
        assert!(controller.tick(&mut surface, start + Duration::from_millis(100)));
        assert_eq!(surface.calls, vec![SurfaceCall::Next(Some(2.0))]);
        assert!(!controller.has_pending_chain());
    }

    #[test]
    fn test_mouse_chain_to_previous_section() {
        let start = Instant::now();
        let mut surface = MockSurface::new();
        surface.metrics = RendererMetrics {
            scrolled: true,
            start: 0.0,
            end: 800.0,
            size: 800.0,
            view_size: 4000.0,
        };
        let mut controller = PaginationController::new("b1");
        controller.handle_continuous_scroll(
            &mut surface,
            &scrolled_settings(),
            ScrollSource::Mouse,
            40.0,
            10.0,
            start,
        );
        assert!(controller.tick(&mut surface, start + CHAIN_DELAY));
        assert_eq!(surface.calls, vec![SurfaceCall::Prev(Some(1.0))]);
    }

    #[test]
    fn test_touch_check_waits_for_relocate() {
        let start = Instant::now();
        let mut surface = MockSurface::new();
        surface.metrics = RendererMetrics {
            scrolled: true,
            start: 0.0,
            end: 800.0,
            size: 800.0,
            view_size: 4000.0,
        };
        let mut controller = PaginationController::new("b1");
        controller.handle_continuous_scroll(
            &mut surface,
            &scrolled_settings(),
            ScrollSource::Touch,
            40.0,
            10.0,
            start,
        );
        assert!(!controller.has_pending_chain());

        controller.on_relocate(&mut surface, start);
        assert!(controller.has_pending_chain());
    }

    #[test]
    fn test_touch_on_short_section_checks_immediately() {
        let start = Instant::now();
        let mut surface = MockSurface::new();
        surface.metrics = RendererMetrics {
            scrolled: true,
            start: 0.0,
            end: 600.0,
            size: 800.0,
            view_size: 600.0,
        };
        let mut controller = PaginationController::new("b1");
        controller.handle_continuous_scroll(
            &mut surface,
            &scrolled_settings(),
            ScrollSource::Touch,
            40.0,
            10.0,
            start,
        );
        assert!(controller.has_pending_chain());
        assert!(controller.tick(&mut surface, start + CHAIN_DELAY));
        assert_eq!(surface.calls, vec![SurfaceCall::Prev(Some(1.0))]);
    }

    #[test]
    fn test_no_chain_without_continuous_scroll() {
        let mut surface = MockSurface::new();
        let mut controller = PaginationController::new("b1");
        let settings = ViewSettings {
            scrolled: true,
            ..Default::default()
        };
        controller.handle_continuous_scroll(&mut surface, &settings, ScrollSource::Mouse, 40.0, 0.0, Instant::now());
        assert!(!controller.has_pending_chain());
    }

    #[test]
    fn test_volume_keys_flip_only_when_enabled() {
        let mut surface = MockSurface::new();
        let controller = PaginationController::new("b1");
        let mut settings = ViewSettings::default();
        controller.handle_native_key(&mut surface, &settings, NativeKey::VolumeDown);
        assert!(surface.calls.is_empty());

        settings.volume_keys_to_flip = true;
        controller.handle_native_key(&mut surface, &settings, NativeKey::VolumeDown);
        assert_eq!(surface.calls, vec![SurfaceCall::GoRight]);
    }
}
