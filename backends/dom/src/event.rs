//! Event listeners and dispatch.
//!
//! Listeners are stored as `on<kind>` properties, usually through the `set:`
//! prefix: `h("button").set("onclick", on(|rt, event| ...))`.

use std::{fmt, rc::Rc};

use arbor_core::{NodeId, Result, Value};

use crate::runtime::Runtime;

type ListenerFn = dyn Fn(&mut Runtime, &Event) -> Result<()>;

/// An event travelling from its target towards the root.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Event {
    /// Event type without the `on` prefix, such as `click`.
    pub kind: String,
    /// Node the event was dispatched on.
    pub target: Option<NodeId>,
    /// Node whose listener is running.
    pub current_target: Option<NodeId>,
    /// Payload.
    pub data: Value,
}

impl Event {
    /// Creates an event of the given type.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: None,
            current_target: None,
            data: Value::Null,
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }
}

/// A callback stored on an element property.
#[derive(Clone)]
pub struct Listener(Rc<ListenerFn>);

impl Listener {
    /// Wraps a callback.
    pub fn new(f: impl Fn(&mut Runtime, &Event) -> Result<()> + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invokes the callback.
    ///
    /// # Errors
    ///
    /// Returns whatever the callback returns.
    pub fn call(&self, runtime: &mut Runtime, event: &Event) -> Result<()> {
        (self.0)(runtime, event)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Listener(..)")
    }
}

/// Wraps a callback as a property value.
pub fn on(f: impl Fn(&mut Runtime, &Event) -> Result<()> + 'static) -> Value {
    Value::any(Listener::new(f))
}

impl Runtime {
    /// Dispatches `event` at `target`, invoking `on<kind>` listeners from the
    /// target up to the root. Returns the number of listeners invoked.
    ///
    /// A failing listener is handled like a render error raised at the node it
    /// is attached to.
    ///
    /// # Errors
    ///
    /// Returns the listener error if no component recovers from it.
    pub fn dispatch(&mut self, target: NodeId, mut event: Event) -> Result<usize> {
        let property = format!("on{}", event.kind);
        event.target = Some(target);
        let mut invoked = 0;
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            let listener = self
                .document()
                .property(node, &property)
                .and_then(Value::downcast_ref::<Listener>)
                .cloned();
            if let Some(listener) = listener {
                event.current_target = Some(node);
                invoked += 1;
                if let Err(error) = listener.call(self, &event) {
                    self.throw(node, error)?;
                }
            }
            cursor = self.document().parent(node);
        }
        Ok(invoked)
    }
}
