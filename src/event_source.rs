use std::time::Duration;

use anyhow::{Result, anyhow};
pub use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::event_router::{self, ListenerTarget};
use crate::surface::SurfaceEvent;

/// Input kinds the surface forwards out of its sub-documents.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameMessageKind {
    SingleClick { screen_x: f64 },
    DoubleClick { screen_x: f64 },
    MouseDown { button: u8 },
    MouseUp { button: u8 },
    Wheel { delta_y: f64 },
    /// Positive deltas move toward the start of the section.
    TouchMove { delta: f64 },
    Key(KeyEvent),
}

/// A message posted across the surface boundary, tagged with its book.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    pub book_id: String,
    pub kind: FrameMessageKind,
}

impl FrameMessage {
    pub fn new(book_id: impl Into<String>, kind: FrameMessageKind) -> Self {
        Self {
            book_id: book_id.into(),
            kind,
        }
    }
}

/// Hardware keys that are not part of a keyboard layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKey {
    VolumeUp,
    VolumeDown,
}

/// Everything a reader pane reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    Surface(SurfaceEvent),
    /// The container of one or more panes changed size.
    ResizeUpdate { book_ids: Vec<String> },
    Message(FrameMessage),
    Key(KeyEvent),
    NativeKey(NativeKey),
}

impl ReaderEvent {
    /// Router coordinates of this event.
    pub fn route(&self) -> (ListenerTarget, &'static str) {
        match self {
            ReaderEvent::Surface(SurfaceEvent::PointerUp(_)) => {
                (ListenerTarget::Document, event_router::POINTER_UP)
            }
            ReaderEvent::Surface(event) => (ListenerTarget::Surface, event.name()),
            ReaderEvent::ResizeUpdate { .. } => {
                (ListenerTarget::Window, event_router::RESIZE_UPDATE)
            }
            ReaderEvent::Message(_) => (ListenerTarget::Window, event_router::MESSAGE),
            ReaderEvent::Key(_) | ReaderEvent::NativeKey(_) => {
                (ListenerTarget::Document, event_router::KEY_DOWN)
            }
        }
    }
}

/// Trait for abstracting event sources to enable testing
pub trait EventSource {
    /// Poll for events with a timeout
    fn poll(&mut self, timeout: Duration) -> Result<bool>;

    /// Read the next event
    fn read(&mut self) -> Result<ReaderEvent>;
}

/// Sending half handed to the surface implementation.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: flume::Sender<ReaderEvent>,
}

impl EventSender {
    pub fn send(&self, event: ReaderEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow!("reader event channel closed"))
    }

    pub fn surface(&self, event: SurfaceEvent) -> Result<()> {
        self.send(ReaderEvent::Surface(event))
    }
}

/// Receives events posted across the surface boundary.
pub struct ChannelEventSource {
    rx: flume::Receiver<ReaderEvent>,
    pending: Option<ReaderEvent>,
}

pub fn channel() -> (EventSender, ChannelEventSource) {
    let (tx, rx) = flume::unbounded();
    (EventSender { tx }, ChannelEventSource { rx, pending: None })
}

impl ChannelEventSource {
    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<ReaderEvent> {
        let mut events: Vec<ReaderEvent> = self.pending.take().into_iter().collect();
        events.extend(self.rx.try_iter());
        events
    }
}

impl EventSource for ChannelEventSource {
    fn poll(&mut self, timeout: Duration) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                self.pending = Some(event);
                Ok(true)
            }
            Err(flume::RecvTimeoutError::Timeout) => Ok(false),
            Err(flume::RecvTimeoutError::Disconnected) => Err(anyhow!("reader event channel closed")),
        }
    }

    fn read(&mut self) -> Result<ReaderEvent> {
        if let Some(event) = self.pending.take() {
            return Ok(event);
        }
        self.rx
            .recv()
            .map_err(|_| anyhow!("reader event channel closed"))
    }
}

/// Simulated event source for testing
pub struct SimulatedEventSource {
    pub(crate) events: Vec<ReaderEvent>,
    current_index: usize,
}

impl SimulatedEventSource {
    pub fn new(events: Vec<ReaderEvent>) -> Self {
        Self {
            events,
            current_index: 0,
        }
    }

    pub fn key_event(code: KeyCode, modifiers: KeyModifiers) -> ReaderEvent {
        ReaderEvent::Key(KeyEvent::new(code, modifiers))
    }

    pub fn char_key(c: char) -> ReaderEvent {
        Self::key_event(KeyCode::Char(c), KeyModifiers::empty())
    }

    pub fn single_click(book_id: &str, screen_x: f64) -> ReaderEvent {
        ReaderEvent::Message(FrameMessage::new(
            book_id,
            FrameMessageKind::SingleClick { screen_x },
        ))
    }
}

impl EventSource for SimulatedEventSource {
    fn poll(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(self.current_index < self.events.len())
    }

    fn read(&mut self) -> Result<ReaderEvent> {
        let event = self
            .events
            .get(self.current_index)
            .cloned()
            .ok_or_else(|| anyhow!("simulated events exhausted"))?;
        self.current_index += 1;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::RelocateReason;

    #[test]
    fn test_simulated_event_source() {
        let events = vec![
            SimulatedEventSource::char_key('j'),
            SimulatedEventSource::single_click("b1", 10.0),
        ];
        let mut source = SimulatedEventSource::new(events);

        assert!(source.poll(Duration::from_millis(0)).unwrap());
        if let ReaderEvent::Key(key) = source.read().unwrap() {
            assert_eq!(key.code, KeyCode::Char('j'));
        } else {
            panic!("expected a key event");
        }
        assert!(matches!(source.read().unwrap(), ReaderEvent::Message(_)));
        assert!(!source.poll(Duration::from_millis(0)).unwrap());
        assert!(source.read().is_err());
    }

    #[test]
    fn test_channel_preserves_arrival_order() {
        let (tx, mut source) = channel();
        tx.surface(SurfaceEvent::Scroll).unwrap();
        tx.surface(SurfaceEvent::RendererRelocate {
            reason: RelocateReason::Page,
        })
        .unwrap();

        assert!(source.poll(Duration::from_millis(0)).unwrap());
        assert_eq!(source.read().unwrap(), ReaderEvent::Surface(SurfaceEvent::Scroll));
        let rest = source.drain();
        assert_eq!(rest.len(), 1);
        assert!(!source.poll(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_routes() {
        let resize = ReaderEvent::ResizeUpdate { book_ids: vec![] };
        assert_eq!(
            resize.route(),
            (ListenerTarget::Window, event_router::RESIZE_UPDATE)
        );
        assert_eq!(
            ReaderEvent::Surface(SurfaceEvent::Scroll).route(),
            (ListenerTarget::Surface, event_router::SCROLL)
        );
    }
}
