//! The document runtime: owns the [`Document`], the per-node side table and the
//! scheduler, and exposes the render, instance and flush entry points.
//!
//! Errors raised while a pass is running travel back through the Rust call
//! stack, giving every instance on the way one chance to recover its subtree.
//! Entry points hand whatever is left to [`Runtime::throw`], which keeps
//! walking up the document from where the pass started.

use std::{collections::HashMap, fmt, rc::Rc};

use arbor_core::{
    Attributes, Config, Context, Error, Key, Memo, Node, NodeId, NodeRef, Result, Schedule, Tier,
};
use tracing::{debug, trace};

use crate::{
    document::Document,
    instance::Instance,
    scheduler::{Scheduler, coalesce},
};

/// Render bookkeeping attached to one live element.
#[derive(Debug, Default)]
pub(crate) struct NodeMeta {
    pub(crate) key: Option<Key>,
    pub(crate) memo: Option<Memo>,
    /// Attributes applied by the last patch. `None` until the reconciler first
    /// touches the node, in which case the live attributes stand in.
    pub(crate) cache: Option<Attributes>,
    pub(crate) node_ref: Option<NodeRef>,
    pub(crate) instance: Option<Instance>,
}

/// Renders trees into a [`Document`] and drives component instances.
pub struct Runtime {
    pub(crate) document: Document,
    pub(crate) meta: HashMap<NodeId, NodeMeta>,
    pub(crate) scheduler: Scheduler,
    pub(crate) schedule: Rc<dyn Schedule>,
    pub(crate) context: Context,
    pub(crate) config: Config,
    /// Hosts whose instances are currently rendering, innermost last.
    pub(crate) rendering: Vec<NodeId>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("document", &self.document)
            .field("instances", &self.instance_count())
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a [`Runtime`].
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: Config,
    document: Option<Document>,
    context: Option<Context>,
}

impl RuntimeBuilder {
    /// Uses `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Renders into an existing document, such as one holding server markup.
    #[must_use]
    pub fn document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    /// Root context frame shared by every top-level instance.
    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates the runtime.
    #[must_use]
    pub fn build(self) -> Runtime {
        let scheduler = Scheduler::new();
        Runtime {
            document: self.document.unwrap_or_default(),
            meta: HashMap::new(),
            schedule: Rc::new(scheduler.clone()),
            scheduler,
            context: self.context.unwrap_or_default(),
            config: self.config,
            rendering: Vec::new(),
        }
    }
}

impl Runtime {
    /// Creates a runtime over an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a runtime over an empty document with the given configuration.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self::builder().config(config).build()
    }

    /// Starts configuring a runtime.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// The document rendered into.
    #[must_use]
    pub const fn document(&self) -> &Document {
        &self.document
    }

    /// Mutable access to the document, for focus changes or loading markup.
    pub const fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The pending work queues.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Root context frame.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// Returns `true` if `node` hosts a live component instance.
    #[must_use]
    pub fn has_instance(&self, node: NodeId) -> bool {
        self.instance(node).is_some_and(|instance| !instance.is_disposed())
    }

    pub(crate) fn instance(&self, node: NodeId) -> Option<&Instance> {
        self.meta.get(&node)?.instance.as_ref()
    }

    pub(crate) fn instance_mut(&mut self, node: NodeId) -> Option<&mut Instance> {
        self.meta.get_mut(&node)?.instance.as_mut()
    }

    fn instance_count(&self) -> usize {
        self.meta.values().filter(|meta| meta.instance.is_some()).count()
    }

    /// Reconciles the children of `host` against `tree`.
    ///
    /// # Errors
    ///
    /// Returns a render error that no component above the failure recovered from.
    pub fn render(&mut self, tree: impl Into<Node>, host: NodeId) -> Result<()> {
        if !self.document.is_element(host) {
            return Err(Error::StaleNode(host));
        }
        match self.patch_children(host, vec![tree.into()]) {
            Ok(()) => Ok(()),
            Err(error) => self.throw(host, error),
        }
    }

    /// Advances the instance hosted by `node` and renders its output now.
    ///
    /// # Errors
    ///
    /// Returns a render error that no enclosing component recovered from.
    pub fn next(&mut self, node: NodeId) -> Result<()> {
        match self.run(node) {
            Ok(()) => Ok(()),
            Err(error) => match self.document.parent(node) {
                Some(parent) => self.throw(parent, error),
                None => Err(error),
            },
        }
    }

    /// Requests a re-render of `node`.
    ///
    /// Outside a pass the instance renders immediately. Inside a pass the
    /// request is queued on the microtask tier, unless an instance currently
    /// rendering already covers `node`.
    ///
    /// # Errors
    ///
    /// Returns a render error raised by an immediate render.
    pub fn refresh(&mut self, node: NodeId) -> Result<()> {
        if self.rendering.is_empty() {
            return self.next(node);
        }
        if self.rendering.iter().any(|&active| self.document.contains(active, node)) {
            trace!(?node, "refresh covered by the running pass");
            return Ok(());
        }
        self.schedule(node, Tier::Microtask);
        Ok(())
    }

    /// Queues a re-render of `node` on `tier`.
    pub fn schedule(&self, node: NodeId, tier: Tier) {
        self.schedule.schedule(node, tier);
    }

    /// Delivers `error` to the nearest component at or above `node` able to
    /// handle it.
    ///
    /// A handler that declines passes the error upwards unchanged. A handler
    /// that fails passes its own error upwards with `error` chained as its cause.
    ///
    /// # Errors
    ///
    /// Returns the error if it reaches the root unhandled.
    pub fn throw(&mut self, node: NodeId, error: Error) -> Result<()> {
        let mut error = error;
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if self.has_instance(current) {
                match self.within(current, |runtime| runtime.recover(current, error)) {
                    Ok(()) => return Ok(()),
                    Err(unhandled) => error = unhandled,
                }
            }
            cursor = self.document.parent(current);
        }
        debug!(%error, "error reached the root unhandled");
        Err(error)
    }

    /// Tears down the instance hosted by `node`.
    ///
    /// Disposal is final: the node keeps its content, and a later render
    /// mounting a component on it starts a fresh instance.
    ///
    /// # Errors
    ///
    /// Returns a teardown error that no component above `node` recovered from.
    pub fn dispose(&mut self, node: NodeId) -> Result<()> {
        match self.terminate(node) {
            Ok(()) => Ok(()),
            Err(error) => match self.document.parent(node) {
                Some(parent) => self.throw(parent, error),
                None => Err(error),
            },
        }
    }

    /// Runs queued re-renders of one tier. Returns the number of instances rendered.
    ///
    /// Requests are coalesced so that each subtree renders at most once, roots
    /// first. Requests for detached or disposed hosts are dropped.
    ///
    /// # Errors
    ///
    /// Every request is processed; the first unhandled error is returned.
    pub fn flush(&mut self, tier: Tier) -> Result<usize> {
        let requests = self.scheduler.take(tier);
        if requests.is_empty() {
            return Ok(0);
        }
        let document = &self.document;
        let mut batch = coalesce(requests, |a, b| document.contains(a, b));
        batch.sort_by_key(|&node| self.document.depth(node));
        debug!(?tier, count = batch.len(), "flushing re-renders");

        let mut rendered = 0;
        let mut first_error = None;
        for node in batch {
            if !self.document.is_connected(node) || !self.has_instance(node) {
                trace!(?node, "dropping request for detached host");
                continue;
            }
            rendered += 1;
            if let Err(error) = self.next(node) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(rendered), Err)
    }

    /// Runs pending effects, children before parents. Returns the number of
    /// instances whose effects ran.
    ///
    /// # Errors
    ///
    /// Every effect runs; the first unhandled error is returned.
    pub fn flush_effects(&mut self) -> Result<usize> {
        let mut nodes = self.scheduler.take_effects();
        nodes.sort_by_key(|&node| std::cmp::Reverse(self.document.depth(node)));

        let mut flushed = 0;
        let mut first_error = None;
        for node in nodes {
            let Some(instance) = self.instance_mut(node) else {
                continue;
            };
            let effects = instance.take_effects();
            flushed += 1;
            for effect in effects {
                match effect() {
                    Ok(Some(disposer)) => {
                        if let Some(instance) = self.instance_mut(node) {
                            instance.push_disposer(disposer);
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        if let Err(error) = self.throw(node, error) {
                            first_error.get_or_insert(error);
                        }
                    }
                }
            }
        }
        first_error.map_or(Ok(flushed), Err)
    }

    /// Flushes every tier and effects until nothing is queued. Returns the
    /// number of instances rendered.
    ///
    /// # Errors
    ///
    /// Stops at the first unhandled error.
    pub fn run_until_idle(&mut self) -> Result<usize> {
        let mut rendered = 0;
        while !self.scheduler.is_idle() {
            rendered += self.flush(Tier::Microtask)?;
            self.flush_effects()?;
            rendered += self.flush(Tier::AnimationFrame)?;
            self.flush_effects()?;
            rendered += self.flush(Tier::Idle)?;
            self.flush_effects()?;
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use arbor_core::{Stateful, h, render_loop};

    use super::*;

    fn counter(renders: Rc<Cell<u32>>) -> Stateful {
        Stateful::builder("Counter", move |_| {
            let renders = renders.clone();
            render_loop(move |_| {
                renders.set(renders.get() + 1);
                Ok(Node::from(renders.get()))
            })
        })
        .build()
        .expect("valid component")
    }

    #[test]
    fn render_rejects_unknown_host() {
        let mut rt = Runtime::new();
        assert!(matches!(
            rt.render("x", NodeId::new(99)),
            Err(Error::StaleNode(_))
        ));
    }

    #[test]
    fn refresh_outside_a_pass_renders_now() {
        let renders = Rc::new(Cell::new(0));
        let mut rt = Runtime::new();
        let body = rt.document().body();
        rt.render(h(counter(renders.clone())), body).expect("render");
        let host = rt.document().children(body)[0];

        rt.refresh(host).expect("refresh");
        assert_eq!(renders.get(), 2);
        assert_eq!(rt.document().text_content(host), "2");
    }

    #[test]
    fn flush_coalesces_requests() {
        let renders = Rc::new(Cell::new(0));
        let mut rt = Runtime::new();
        let body = rt.document().body();
        rt.render(h(counter(renders.clone())), body).expect("render");
        let host = rt.document().children(body)[0];

        rt.schedule(host, Tier::Microtask);
        rt.schedule(host, Tier::Microtask);
        assert_eq!(rt.flush(Tier::Microtask).expect("flush"), 1);
        assert_eq!(renders.get(), 2);
    }

    #[test]
    fn requests_for_removed_hosts_are_dropped() {
        let renders = Rc::new(Cell::new(0));
        let mut rt = Runtime::new();
        let body = rt.document().body();
        rt.render(h(counter(renders.clone())), body).expect("render");
        let host = rt.document().children(body)[0];

        rt.schedule(host, Tier::Idle);
        rt.render(Node::Empty, body).expect("render");
        assert_eq!(rt.run_until_idle().expect("flush"), 0);
        assert_eq!(renders.get(), 1);
    }

    #[test]
    fn disposed_instances_stop_rendering() {
        let renders = Rc::new(Cell::new(0));
        let mut rt = Runtime::new();
        let body = rt.document().body();
        rt.render(h(counter(renders.clone())), body).expect("render");
        let host = rt.document().children(body)[0];

        rt.dispose(host).expect("dispose");
        assert!(!rt.has_instance(host));
        rt.next(host).expect("next is a no-op");
        assert_eq!(renders.get(), 1);
    }

    #[test]
    fn long_running_renders_keep_no_mutation_log() {
        let mut rt = Runtime::new();
        let body = rt.document().body();
        for n in 0..1000 {
            rt.render(h("p").attr("n", n).child(n), body).expect("render");
        }
        assert!(rt.document_mut().take_mutations().is_empty());
        assert_eq!(rt.document().inner_html(body), r#"<p n="999">999</p>"#);
    }

    #[test]
    fn builder_uses_given_config() {
        let config = Config {
            default_tag: "x-host".to_owned(),
            ..Config::default()
        };
        let mut rt = Runtime::builder().config(config).build();
        let body = rt.document().body();
        rt.render(h(counter(Rc::default())), body).expect("render");

        assert_eq!(rt.document().inner_html(body), "<x-host>1</x-host>");
    }
}
