//! Context propagation between component instances.
//!
//! Every instance owns a [`Context`] frame linked to the frame of the instance
//! that was rendering when it was created. Reads walk the chain towards the
//! root, writes only touch the local frame. The chain is live: values written
//! by an ancestor after a descendant was created are still visible to it.
//!
//! ```
//! use arbor_core::context::{Context, context};
//!
//! let theme = context("light");
//! let root = Context::root();
//! let child = root.child();
//!
//! assert_eq!(theme.get_in(&child), "light");
//! theme.set_in(&root, "dark");
//! assert_eq!(theme.get_in(&child), "dark");
//! ```

use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

struct Frame {
    parent: Option<Context>,
    values: RefCell<HashMap<usize, Rc<dyn Any>>>,
}

/// One frame of a parent-linked key/value chain.
#[derive(Clone)]
pub struct Context(Rc<Frame>);

impl Context {
    /// Creates a frame without a parent.
    #[must_use]
    pub fn root() -> Self {
        Self(Rc::new(Frame {
            parent: None,
            values: RefCell::default(),
        }))
    }

    /// Creates a frame inheriting from `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        Self(Rc::new(Frame {
            parent: Some(self.clone()),
            values: RefCell::default(),
        }))
    }

    /// Returns the parent frame.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.0.parent.as_ref()
    }

    /// Returns `true` if both handles point at the same frame.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn lookup(&self, id: usize) -> Option<Rc<dyn Any>> {
        let mut frame = Some(self);
        while let Some(context) = frame {
            if let Some(value) = context.0.values.borrow().get(&id) {
                return Some(value.clone());
            }
            frame = context.parent();
        }
        None
    }

    fn insert(&self, id: usize, value: Rc<dyn Any>) {
        self.0.values.borrow_mut().insert(id, value);
    }

    fn depth(&self) -> usize {
        let mut depth = 0;
        let mut frame = self.parent();
        while let Some(context) = frame {
            depth += 1;
            frame = context.parent();
        }
        depth
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("depth", &self.depth())
            .field("len", &self.0.values.borrow().len())
            .finish()
    }
}

/// Typed accessor for one context entry.
#[derive(Debug, Clone)]
pub struct ContextSlot<T> {
    id: usize,
    fallback: T,
}

/// Creates a new context entry whose reads return `fallback` until it is set.
pub fn context<T: Clone + 'static>(fallback: T) -> ContextSlot<T> {
    ContextSlot {
        id: NEXT_SLOT.fetch_add(1, Ordering::Relaxed),
        fallback,
    }
}

impl<T: Clone + 'static> ContextSlot<T> {
    /// Reads the nearest value in the chain starting at `context`.
    #[must_use]
    pub fn get_in(&self, context: &Context) -> T {
        context
            .lookup(self.id)
            .and_then(|value| value.downcast_ref::<T>().cloned())
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Writes `value` into `context` itself.
    pub fn set_in(&self, context: &Context, value: T) {
        context.insert(self.id, Rc::new(value));
    }

    /// Reads through the context of the instance currently rendering.
    ///
    /// Returns the fallback outside of a render.
    #[must_use]
    pub fn get(&self) -> T {
        current().map_or_else(|| self.fallback.clone(), |context| self.get_in(&context))
    }

    /// Writes into the context of the instance currently rendering.
    ///
    /// Returns `false` and discards the value outside of a render.
    pub fn set(&self, value: T) -> bool {
        current().is_some_and(|context| {
            self.set_in(&context, value);
            true
        })
    }

    /// The value returned when nothing is set.
    #[must_use]
    pub const fn fallback(&self) -> &T {
        &self.fallback
    }
}

/// Returns the context of the instance currently rendering on this thread.
#[must_use]
pub fn current() -> Option<Context> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Makes `context` current until the returned guard is dropped.
pub fn enter(context: Context) -> CurrentGuard {
    let previous = CURRENT.with(|current| current.replace(Some(context)));
    CurrentGuard { previous }
}

/// Restores the previously current context on drop.
#[must_use = "the context is only current while the guard is alive"]
#[derive(Debug)]
pub struct CurrentGuard {
    previous: Option<Context>,
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_local_to_the_frame() {
        let slot = context(0);
        let root = Context::root();
        let left = root.child();
        let right = root.child();

        slot.set_in(&left, 1);

        assert_eq!(slot.get_in(&left), 1);
        assert_eq!(slot.get_in(&right), 0);
        assert_eq!(slot.get_in(&root), 0);
    }

    #[test]
    fn child_writes_shadow_ancestors() {
        let slot = context("fallback");
        let root = Context::root();
        let child = root.child();

        slot.set_in(&root, "root");
        slot.set_in(&child, "child");

        assert_eq!(slot.get_in(&child.child()), "child");
        assert_eq!(slot.get_in(&root), "root");
    }

    #[test]
    fn accessor_follows_current_context() {
        let slot = context(String::from("none"));
        assert_eq!(slot.get(), "none");
        assert!(!slot.set(String::from("lost")));

        let outer = Context::root();
        {
            let _outer = enter(outer.clone());
            assert!(slot.set(String::from("outer")));
            {
                let _inner = enter(outer.child());
                assert_eq!(slot.get(), "outer");
            }
            assert!(current().is_some_and(|c| c.ptr_eq(&outer)));
        }
        assert!(current().is_none());
    }

    #[test]
    fn slots_are_independent() {
        let a = context(1);
        let b = context(1);
        let root = Context::root();

        a.set_in(&root, 5);
        assert_eq!(a.get_in(&root), 5);
        assert_eq!(b.get_in(&root), 1);
    }
}
