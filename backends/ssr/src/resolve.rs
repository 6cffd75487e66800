//! Resolution of node trees into emission frames.
//!
//! Stateful components are run once, to completion, while resolving. Work
//! that cannot finish synchronously (async components, and islands when
//! streaming) is left behind as a [`Hole`]: a placeholder with a
//! hierarchical id, fallback content and the task that will fill it.

use std::collections::HashMap;

use arbor_core::{
    Attributes, Config, Context, Descriptor, Inert, Mount, Node, Normalized, Pending, Result,
    Scope, context, h, normalize,
};
use tracing::{debug, trace};

/// Allocates hierarchical placeholder ids.
///
/// Top-level ids count up from `"0"`; ids allocated while resolving the
/// content of placeholder `p` are `"p:0"`, `"p:1"` and so on.
#[derive(Debug, Default)]
pub struct IdAllocator {
    counters: HashMap<String, usize>,
}

impl IdAllocator {
    /// Creates an allocator with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id under `parent`.
    pub fn alloc(&mut self, parent: Option<&str>) -> String {
        let counter = self
            .counters
            .entry(parent.unwrap_or_default().to_owned())
            .or_default();
        let index = *counter;
        *counter += 1;
        parent.map_or_else(|| index.to_string(), |parent| format!("{parent}:{index}"))
    }
}

/// A resolved node, ready to be written as markup.
#[derive(Debug)]
pub(crate) enum Resolved {
    Text(String),
    Element(Frame),
    Hole(Hole),
}

/// A host element and its resolved children.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) tag: String,
    pub(crate) attrs: Attributes,
    pub(crate) children: Vec<Resolved>,
    /// Emitted without children.
    pub(crate) skip: bool,
}

/// A placeholder waiting for deferred content.
#[derive(Debug)]
pub(crate) struct Hole {
    pub(crate) id: String,
    pub(crate) fallback: Vec<Resolved>,
    /// Taken once the task is scheduled.
    pub(crate) task: Option<Task>,
    /// Context the deferred content resolves under.
    pub(crate) context: Context,
}

/// Deferred work behind a [`Hole`].
#[derive(Debug)]
pub(crate) enum Task {
    Async(Pending),
    /// Rendered by the client from `src`; `args` carries the arguments.
    Island { src: String, args: Node },
}

/// Resolution state shared by everything emitted for one tree.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) config: Config,
    root: Context,
    ids: IdAllocator,
}

impl Session {
    pub(crate) fn new(config: Config, root: Context) -> Self {
        Self {
            config,
            root,
            ids: IdAllocator::new(),
        }
    }

    /// Resolves `node`. Placeholders get ids under `parent`; islands become
    /// placeholders only when `islands` is set.
    pub(crate) fn resolve(
        &mut self,
        node: Node,
        parent: Option<&str>,
        islands: bool,
    ) -> Result<Vec<Resolved>> {
        Resolver {
            config: &self.config,
            root: &self.root,
            ids: &mut self.ids,
            parent,
            islands,
        }
        .resolve(node)
    }
}

struct Resolver<'a> {
    config: &'a Config,
    root: &'a Context,
    ids: &'a mut IdAllocator,
    parent: Option<&'a str>,
    islands: bool,
}

impl Resolver<'_> {
    fn resolve(&mut self, node: Node) -> Result<Vec<Resolved>> {
        normalize(node, self.config)?
            .into_iter()
            .map(|item| self.item(item))
            .collect()
    }

    fn item(&mut self, item: Normalized) -> Result<Resolved> {
        match item {
            Normalized::Text(text) => Ok(Resolved::Text(text)),
            Normalized::Element(descriptor) => self.element(descriptor),
            Normalized::Async(component, args) => {
                trace!(component = component.name(), "deferring async component");
                let fallback = component.fallback().clone();
                self.hole(fallback, Task::Async(component.start(args)))
            }
        }
    }

    fn element(&mut self, descriptor: Descriptor) -> Result<Resolved> {
        let Descriptor {
            tag,
            attrs,
            children,
            skip,
            mount,
            ..
        } = descriptor;
        let Some(mount) = mount else {
            let children = if skip {
                Vec::new()
            } else {
                self.resolve(Node::List(children))?
            };
            return Ok(Resolved::Element(Frame {
                tag,
                attrs,
                children,
                skip,
            }));
        };

        if self.islands {
            if let Some(src) = mount.component.src() {
                let task = Task::Island {
                    src: src.to_owned(),
                    args: island_args(&tag, &mount),
                };
                let fallback = mount.component.fallback().clone();
                return self.hole(fallback, task);
            }
        }
        let children = self.instance(mount)?;
        Ok(Resolved::Element(Frame {
            tag,
            attrs,
            children,
            skip: false,
        }))
    }

    /// Runs a stateful component for a single render and tears it down.
    ///
    /// Errors raised while resolving its output are offered to the component
    /// first.
    fn instance(&mut self, mount: Mount) -> Result<Vec<Resolved>> {
        let Mount {
            component, args, ..
        } = mount;
        let context = context::current()
            .unwrap_or_else(|| self.root.clone())
            .child();
        let _guard = context::enter(context.clone());
        let mut services = Inert;
        let mut scope = Scope::new(&args, &context, &mut services);
        trace!(component = component.name(), "rendering component");

        let mut routine = component.start(&mut scope)?;
        let step = routine.resume(&mut scope)?;
        let rendered = match self.resolve(step.into_node()) {
            Ok(children) => Ok(children),
            Err(error) => match routine.throw(&mut scope, &error) {
                None => Err(error),
                Some(Err(failure)) => Err(failure.chain(error)),
                Some(Ok(step)) => self.resolve(step.into_node()),
            },
        };
        let finished = routine.finish(&mut scope);
        let children = rendered?;
        finished?;
        Ok(children)
    }

    fn hole(&mut self, fallback: Node, task: Task) -> Result<Resolved> {
        let id = self.ids.alloc(self.parent);
        debug!(%id, "allocated placeholder");
        let fallback = self.resolve(fallback)?;
        Ok(Resolved::Hole(Hole {
            id,
            fallback,
            task: Some(task),
            context: context::current().unwrap_or_else(|| self.root.clone()),
        }))
    }
}

/// Arguments of an island, carried to the client as an element.
fn island_args(tag: &str, mount: &Mount) -> Node {
    let mut element = h(tag);
    element.attrs = mount.args.values().clone();
    element.children = match mount.args.children() {
        Node::List(items) => items.clone(),
        Node::Empty => Vec::new(),
        other => vec![other.clone()],
    };
    element.into()
}
