//! Client side of the streaming protocol.
//!
//! Each [`Patch`] names a placeholder element by id. A patch whose
//! placeholder is not in the document yet is buffered; once a patch is
//! applied, buffered patches nested under its id are replayed. This keeps
//! parents hydrated before their children whatever order patches arrive in.
//! When a placeholder gets its final patch, buffered patches aimed at nested
//! placeholders missing from that content are dropped.

use std::{collections::VecDeque, fmt, rc::Rc};

use arbor_core::{Error, Node, NodeId, Patch, Result, Stateful, h};
use async_channel::{Receiver, Sender};
use futures::future::LocalBoxFuture;
use tracing::{debug, trace};

use crate::{document::Document, runtime::Runtime};

/// Resolves island module references to components.
pub trait ModuleLoader {
    /// Loads the component exported by `src`.
    fn load(&self, src: &str) -> LocalBoxFuture<'static, Result<Stateful>>;
}

impl<F> ModuleLoader for F
where
    F: Fn(&str) -> LocalBoxFuture<'static, Result<Stateful>>,
{
    fn load(&self, src: &str) -> LocalBoxFuture<'static, Result<Stateful>> {
        self(src)
    }
}

/// Applies patches to a [`Runtime`], buffering those that arrive early.
#[derive(Default)]
pub struct Hydrator {
    pending: Vec<Patch>,
    loader: Option<Rc<dyn ModuleLoader>>,
}

impl fmt::Debug for Hydrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hydrator")
            .field("pending", &self.pending.len())
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

impl Hydrator {
    /// Creates a hydrator without a module loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `loader` for island patches.
    #[must_use]
    pub fn with_loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loader = Some(Rc::new(loader));
        self
    }

    /// Patches waiting for their placeholder.
    #[must_use]
    pub fn pending(&self) -> &[Patch] {
        &self.pending
    }

    /// Applies `patch`, then every buffered patch it unblocks.
    ///
    /// # Errors
    ///
    /// Returns render errors, [`Error::MissingLoader`] or loader failures.
    /// A patch whose placeholder never appears is not an error.
    pub async fn hydrate(&mut self, runtime: &mut Runtime, patch: Patch) -> Result<()> {
        let attribute = runtime.config().placeholder_attribute.clone();
        let mut queue = VecDeque::from([patch]);
        while let Some(patch) = queue.pop_front() {
            let Some(placeholder) = runtime.document().query_attribute(&attribute, &patch.id)
            else {
                debug!(id = %patch.id, "placeholder not found, buffering patch");
                self.pending.push(patch);
                continue;
            };
            trace!(id = %patch.id, done = patch.done, "applying patch");
            self.apply(runtime, placeholder, &patch).await?;
            if patch.done {
                let document = runtime.document();
                let reachable =
                    |pending: &Patch| !orphaned(document, &attribute, &patch.id, pending);
                self.pending.retain(reachable);
                queue.retain(reachable);
            }

            let (ready, waiting): (Vec<Patch>, Vec<Patch>) = std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|pending| pending.is_descendant_of(&patch.id));
            self.pending = waiting;
            queue.extend(ready);
        }
        Ok(())
    }

    /// Decodes and applies a JSON patch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPatch`] for invalid payloads, otherwise as
    /// [`Hydrator::hydrate`].
    pub async fn hydrate_json(&mut self, runtime: &mut Runtime, json: &str) -> Result<()> {
        let patch = Patch::from_json(json)?;
        self.hydrate(runtime, patch).await
    }

    /// Applies patches from `patches` in arrival order until every
    /// [`PatchQueue`] is dropped or closed.
    ///
    /// # Errors
    ///
    /// Stops at the first patch that fails.
    pub async fn run(&mut self, runtime: &mut Runtime, patches: Receiver<Patch>) -> Result<()> {
        while let Ok(patch) = patches.recv().await {
            self.hydrate(runtime, patch).await?;
        }
        Ok(())
    }

    async fn apply(&self, runtime: &mut Runtime, placeholder: NodeId, patch: &Patch) -> Result<()> {
        let Some(src) = &patch.src else {
            return runtime.render(patch.h.clone(), placeholder);
        };
        let loader = self
            .loader
            .clone()
            .ok_or_else(|| Error::MissingLoader { src: src.clone() })?;
        let component = loader.load(src).await?;
        debug!(%src, component = component.name(), "hydrating island");
        runtime.render(island(&component, &patch.h), placeholder)
    }
}

/// Returns `true` if `pending` targets a placeholder below `id` that cannot
/// appear once `id` has its final content: the placeholder on its path
/// directly under `id` is missing from the document.
fn orphaned(document: &Document, attribute: &str, id: &str, pending: &Patch) -> bool {
    let Some(rest) = pending.id.strip_prefix(id).and_then(|rest| rest.strip_prefix(':')) else {
        return false;
    };
    let child = rest.split(':').next().unwrap_or(rest);
    let missing = document
        .query_attribute(attribute, &format!("{id}:{child}"))
        .is_none();
    if missing {
        debug!(id = %pending.id, "placeholder can no longer appear, dropping patch");
    }
    missing
}

/// Mounts `component` with the arguments carried by a patch.
fn island(component: &Stateful, args: &Node) -> Node {
    let element = h(component);
    match args {
        Node::Element(carrier) => {
            let mut element = element.children(carrier.children.iter().cloned());
            element.attrs = carrier.attrs.clone();
            element.into()
        }
        Node::Empty => element.into(),
        other => element.child(other.clone()).into(),
    }
}

/// Sending half of a client patch queue, the counterpart of the global push
/// function named in streamed scripts.
#[derive(Debug, Clone)]
pub struct PatchQueue {
    sender: Sender<Patch>,
}

/// Creates an unbounded patch queue.
#[must_use]
pub fn patch_queue() -> (PatchQueue, Receiver<Patch>) {
    let (sender, receiver) = async_channel::unbounded();
    (PatchQueue { sender }, receiver)
}

impl PatchQueue {
    /// Queues a patch. Returns `false` if the receiving side is gone.
    pub fn push(&self, patch: Patch) -> bool {
        self.sender.try_send(patch).is_ok()
    }

    /// Decodes and queues a JSON patch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPatch`] for invalid payloads.
    pub fn push_json(&self, json: &str) -> Result<bool> {
        Ok(self.push(Patch::from_json(json)?))
    }

    /// Closes the queue; the hydrator finishes once buffered patches are consumed.
    pub fn close(&self) -> bool {
        self.sender.close()
    }
}

/// Extracts the patches carried by `<script>` elements under `root`, in
/// document order, as a browser would execute them.
///
/// Scripts that do not call `window.<global>?.push(...)` are ignored.
///
/// # Errors
///
/// Returns [`Error::MalformedPatch`] if a push carries an invalid payload.
pub fn scripted_patches(document: &Document, root: NodeId, global: &str) -> Result<Vec<Patch>> {
    let call = format!("window.{global}?.push(");
    document
        .elements_by_tag(root, "script")
        .into_iter()
        .filter_map(|script| {
            let source = document.text_content(script);
            source
                .trim()
                .strip_prefix(call.as_str())
                .and_then(|rest| rest.strip_suffix(')'))
                .map(Patch::from_json)
        })
        .collect()
}
