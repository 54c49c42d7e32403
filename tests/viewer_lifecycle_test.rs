use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use flowreader::error::ViewerError;
use flowreader::event_source::{ReaderEvent, SimulatedEventSource};
use flowreader::reader::{ReaderPane, ReaderPanes, Services};
use flowreader::settings::{ReadSettings, ViewSettings};
use flowreader::surface::{
    BookDocument, Insets, LayoutSnapshot, LoadedSection, Size, SurfaceEvent, TextDirection,
};
use flowreader::test_utils::{
    MemoryNoteService, MemoryStatusStore, MockSurface, MockSurfaceFactory, RecordingAssistant,
    RecordingClipboard, SurfaceCall,
};
use flowreader::viewer::{ViewerConfig, ViewerPhase};

fn config(book_id: &str, language: &str) -> ViewerConfig {
    ViewerConfig {
        book_id: book_id.into(),
        book: BookDocument {
            title: format!("Book {book_id}"),
            language: Some(language.into()),
            section_count: 5,
            ..Default::default()
        },
        last_location: None,
        insets: Insets {
            top: 20.0,
            right: 10.0,
            bottom: 20.0,
            left: 10.0,
        },
        container: Size::new(820.0, 640.0),
        view_settings: ViewSettings::default(),
    }
}

fn open(factory: &mut MockSurfaceFactory, book_id: &str) -> ReaderPane {
    ReaderPane::open(config(book_id, "en"), Vec::new(), ReadSettings::default(), factory).unwrap()
}

struct Host {
    notes: MemoryNoteService,
    assistant: RecordingAssistant,
    status: MemoryStatusStore,
    clipboard: RecordingClipboard,
}

impl Host {
    fn new() -> Self {
        Self {
            notes: MemoryNoteService::default(),
            assistant: RecordingAssistant::default(),
            status: MemoryStatusStore::default(),
            clipboard: RecordingClipboard::default(),
        }
    }

    fn services(&mut self) -> Services<'_> {
        Services {
            notes: &mut self.notes,
            assistant: &mut self.assistant,
            status: &mut self.status,
            clipboard: &mut self.clipboard,
        }
    }
}

#[test]
fn test_open_runs_setup_in_order() {
    let mut factory = MockSurfaceFactory::default();
    let pane = open(&mut factory, "b1");

    let calls = factory.calls();
    let open_at = calls
        .iter()
        .position(|c| matches!(c, SurfaceCall::Open(_)))
        .unwrap();
    let transform_at = calls
        .iter()
        .position(|c| matches!(c, SurfaceCall::SetContentTransform(_)))
        .unwrap();
    let styles_at = calls
        .iter()
        .position(|c| matches!(c, SurfaceCall::SetStyles(_)))
        .unwrap();
    assert!(open_at < transform_at && transform_at < styles_at);
    assert_eq!(calls.last(), Some(&SurfaceCall::GoToFraction(0.0)));

    assert_eq!(pane.viewer().phase(), ViewerPhase::Ready);
    assert_eq!(pane.viewer().dimensions(), Size::new(800.0, 600.0));
    let pipeline = pane.viewer().pipeline().unwrap();
    assert_eq!(pipeline.dimensions, Size::new(800.0, 600.0));
}

#[test]
fn test_open_failures_surface_as_errors() {
    let mut factory = MockSurfaceFactory {
        fail: true,
        ..Default::default()
    };
    let err = ReaderPane::open(config("b1", "en"), Vec::new(), ReadSettings::default(), &mut factory)
        .unwrap_err();
    assert!(matches!(err, ViewerError::SurfaceCreation(_)));
    assert_eq!(factory.created, 0);

    let mut template = MockSurface::new();
    template.fail_init = true;
    let mut factory = MockSurfaceFactory {
        template,
        ..Default::default()
    };
    let err = ReaderPane::open(config("b1", "en"), Vec::new(), ReadSettings::default(), &mut factory)
        .unwrap_err();
    assert!(matches!(err, ViewerError::InitialNavigation(_)));
    assert!(err.is_fatal());
    assert_eq!(factory.calls().last(), Some(&SurfaceCall::Close));
}

#[test]
fn test_rtl_language_opens_right_to_left() {
    let mut factory = MockSurfaceFactory::default();
    let pane = ReaderPane::open(config("b1", "ar-EG"), Vec::new(), ReadSettings::default(), &mut factory)
        .unwrap();
    assert_eq!(pane.viewer().book().dir, Some(TextDirection::Rtl));
}

#[test]
fn test_section_load_binds_listeners_once() {
    let mut factory = MockSurfaceFactory::default();
    let mut pane = open(&mut factory, "b1");
    let mut host = Host::new();
    factory.clear_calls();
    let load = ReaderEvent::Surface(SurfaceEvent::Load(LoadedSection {
        doc_id: 11,
        index: 2,
        direction: None,
    }));

    pane.handle_event(&load, &mut host.services(), Instant::now());
    pane.handle_event(&load, &mut host.services(), Instant::now());

    let calls = factory.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, SurfaceCall::BindFrameListeners(11)))
            .count(),
        1
    );
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, SurfaceCall::MountFonts { index: 2, cjk: false }))
            .count(),
        2
    );
}

#[test]
fn test_resize_broadcast_settles_only_named_books() {
    let mut template = MockSurface::new();
    template.probe = Some(LayoutSnapshot {
        scroll_width: 800.0,
        scroll_height: 600.0,
        child_count: 4,
    });
    let mut factory = MockSurfaceFactory {
        template,
        ..Default::default()
    };
    let mut host = Host::new();
    let start = Instant::now();
    let stable = Rc::new(RefCell::new(Vec::new()));

    let mut panes = ReaderPanes::new();
    for book_id in ["b1", "b2"] {
        let mut pane = open(&mut factory, book_id);
        let sink = Rc::clone(&stable);
        pane.set_layout_stable_callback(Box::new(move |book_ids| {
            sink.borrow_mut().extend(book_ids.iter().cloned());
        }));
        panes.insert(pane, &mut host.status, start);
    }

    panes.broadcast(
        &ReaderEvent::ResizeUpdate {
            book_ids: vec!["b1".into()],
        },
        &mut host.services(),
        start,
    );
    assert!(stable.borrow().is_empty());

    let mut now = start;
    while let Some(due) = panes.next_deadline() {
        assert!(due - start < Duration::from_secs(2), "detector never settled");
        now = due;
        panes.tick(&mut host.status, now);
    }
    assert_eq!(*stable.borrow(), vec!["b1".to_string()]);
    assert!(now - start >= Duration::from_millis(150));
}

#[test]
fn test_destroyed_pane_ignores_events() {
    let mut factory = MockSurfaceFactory::default();
    let mut pane = open(&mut factory, "b1");
    let mut host = Host::new();
    let now = Instant::now();

    pane.destroy(&mut host.status, now);
    pane.destroy(&mut host.status, now);
    assert!(pane.is_destroyed());
    assert_eq!(pane.viewer().phase(), ViewerPhase::Destroyed);
    assert_eq!(
        factory
            .calls()
            .iter()
            .filter(|c| matches!(c, SurfaceCall::Close))
            .count(),
        1
    );

    factory.clear_calls();
    pane.handle_event(&SimulatedEventSource::char_key('l'), &mut host.services(), now);
    assert!(factory.calls().is_empty());
    assert!(!pane.tick(&mut host.status, now + Duration::from_secs(10)));
}
