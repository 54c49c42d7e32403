//! Tagged listener registry with symmetric teardown.
//!
//! Components register handler tags (usually a small enum of their own
//! methods) under an event name and a target class. Incoming events are
//! dispatched by asking the router which tags are registered for them.

use log::debug;

pub const LOAD: &str = "load";
pub const RELOCATE: &str = "relocate";
pub const RENDERER_RELOCATE: &str = "renderer-relocate";
pub const DRAW_ANNOTATION: &str = "draw-annotation";
pub const SHOW_ANNOTATION: &str = "show-annotation";
pub const RESIZE_UPDATE: &str = "resize-update";
pub const MESSAGE: &str = "message";
pub const POINTER_UP: &str = "pointerup";
pub const SCROLL: &str = "scroll";
pub const KEY_DOWN: &str = "keydown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerTarget {
    /// The rendering surface itself.
    Surface,
    /// Host window: resize notifications and cross-context messages.
    Window,
    /// Host document and the sub-documents mounted by the surface.
    Document,
}

#[derive(Debug, Clone)]
struct Registration<H> {
    target: ListenerTarget,
    name: String,
    /// Only events carrying this key reach the handler.
    scope: Option<String>,
    handler: H,
}

#[derive(Debug)]
pub struct EventRouter<H> {
    registrations: Vec<Registration<H>>,
    destroyed: bool,
}

impl<H> Default for EventRouter<H> {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
            destroyed: false,
        }
    }
}

/// The fixed set of rendering-surface events.
pub struct SurfaceHandlers<H> {
    pub load: H,
    pub relocate: H,
    pub renderer_relocate: H,
    pub draw_annotation: Option<H>,
    pub show_annotation: Option<H>,
}

pub struct GlobalHandlers<H> {
    pub resize: H,
    pub message: H,
}

impl<H: Clone> EventRouter<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event_listener(&mut self, name: &str, handler: H) {
        self.register(ListenerTarget::Surface, name, None, handler);
    }

    pub fn add_window_listener(&mut self, name: &str, handler: H) {
        self.register(ListenerTarget::Window, name, None, handler);
    }

    pub fn add_document_listener(&mut self, name: &str, handler: H) {
        self.register(ListenerTarget::Document, name, None, handler);
    }

    pub fn setup_surface_handlers(&mut self, handlers: SurfaceHandlers<H>) {
        self.add_event_listener(LOAD, handlers.load);
        self.add_event_listener(RELOCATE, handlers.relocate);
        self.add_event_listener(RENDERER_RELOCATE, handlers.renderer_relocate);
        if let Some(handler) = handlers.draw_annotation {
            self.add_event_listener(DRAW_ANNOTATION, handler);
        }
        if let Some(handler) = handlers.show_annotation {
            self.add_event_listener(SHOW_ANNOTATION, handler);
        }
    }

    /// Resize notifications are scoped to `book_id`; messages are not.
    pub fn setup_global_listeners(&mut self, book_id: &str, handlers: GlobalHandlers<H>) {
        self.register(
            ListenerTarget::Window,
            RESIZE_UPDATE,
            Some(book_id.to_string()),
            handlers.resize,
        );
        self.add_window_listener(MESSAGE, handlers.message);
    }

    fn register(&mut self, target: ListenerTarget, name: &str, scope: Option<String>, handler: H) {
        self.registrations.push(Registration {
            target,
            name: name.to_string(),
            scope,
            handler,
        });
    }

    /// Handlers registered for `name` on `target`, in registration order.
    pub fn handlers(&self, target: ListenerTarget, name: &str) -> Vec<H> {
        self.registrations
            .iter()
            .filter(|r| r.target == target && r.name == name && r.scope.is_none())
            .map(|r| r.handler.clone())
            .collect()
    }

    /// Like [`handlers`](Self::handlers) but also includes scoped
    /// registrations whose key is among `keys`.
    pub fn scoped_handlers(&self, target: ListenerTarget, name: &str, keys: &[String]) -> Vec<H> {
        self.registrations
            .iter()
            .filter(|r| r.target == target && r.name == name)
            .filter(|r| match &r.scope {
                Some(scope) => keys.iter().any(|k| k == scope),
                None => true,
            })
            .map(|r| r.handler.clone())
            .collect()
    }

    /// Invokes `f` once per handler registered for the event.
    pub fn dispatch(&self, target: ListenerTarget, name: &str, mut f: impl FnMut(&H)) {
        for handler in self.handlers(target, name) {
            f(&handler);
        }
    }

    pub fn listener_count(&self, target: ListenerTarget) -> usize {
        self.registrations
            .iter()
            .filter(|r| r.target == target)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Removes every registration. Returns how many were removed; a second
    /// call removes nothing.
    pub fn remove_all_event_listeners(&mut self) -> usize {
        let removed = self.registrations.len();
        self.registrations.clear();
        if removed > 0 {
            debug!("Removed {removed} event listeners");
        }
        removed
    }

    pub fn destroy(&mut self) {
        self.remove_all_event_listeners();
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}
