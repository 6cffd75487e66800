//! Renderer entry points.

use std::{collections::VecDeque, mem};

use arbor_core::{Config, Context, Node, Pending, Result, Step, context};
use futures::{
    FutureExt, StreamExt, TryStreamExt,
    future::LocalBoxFuture,
    stream::{self, LocalBoxStream},
};
use tracing::trace;

use crate::{
    html as emit,
    resolve::{Hole, Resolved, Session, Task},
    stream as out_of_order,
};

/// Renders node trees to markup.
///
/// The renderer is cheap to clone; every call starts a fresh placeholder id
/// space and resolves components under a child of the renderer's context.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    config: Config,
    context: Context,
}

impl Renderer {
    /// Creates a renderer with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a renderer using `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            context: Context::root(),
        }
    }

    /// Resolves components under `context` instead of a fresh root.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    fn session(&self) -> Session {
        Session::new(self.config.clone(), self.context.clone())
    }

    /// Renders `tree` synchronously.
    ///
    /// Async components are written as placeholders holding their fallback;
    /// their work is dropped.
    ///
    /// # Errors
    ///
    /// Returns the first render error no component recovered from.
    pub fn render_to_string(&self, tree: Node) -> Result<String> {
        let mut session = self.session();
        let nodes = session.resolve(tree, None, false)?;
        trace!("rendered synchronously");
        Ok(emit::to_string(&nodes, &session.config))
    }

    /// Renders `tree` as a stream of markup chunks, one per top-level node.
    ///
    /// Async components are awaited in place; a streaming component
    /// contributes the value it returns, or nothing. The stream ends after the
    /// first error.
    pub fn html(&self, tree: Node) -> LocalBoxStream<'static, Result<String>> {
        let mut session = self.session();
        let state = session
            .resolve(tree, None, false)
            .map(|nodes| (session, VecDeque::from(nodes)));
        stream::unfold(Some(state), |state| async move {
            let (mut session, mut queue) = match state? {
                Ok(state) => state,
                Err(error) => return Some((Err(error), None)),
            };
            let node = queue.pop_front()?;
            match fill(&mut session, vec![node]).await {
                Ok(nodes) => {
                    let chunk = emit::to_string(&nodes, &session.config);
                    Some((Ok(chunk), Some(Ok((session, queue)))))
                }
                Err(error) => Some((Err(error), None)),
            }
        })
        .boxed_local()
    }

    /// Renders `tree` to a single string, awaiting async components in place.
    ///
    /// # Errors
    ///
    /// Returns the first render error no component recovered from.
    pub async fn render(&self, tree: Node) -> Result<String> {
        let chunks: Vec<String> = self.html(tree).try_collect().await?;
        Ok(chunks.concat())
    }

    /// Streams `tree` out of order.
    ///
    /// The first chunk is the whole document with placeholders for deferred
    /// content. Every following chunk is a `<script>` pushing a patch onto
    /// the configured global, in completion order.
    pub fn stream(&self, tree: Node) -> LocalBoxStream<'static, Result<String>> {
        out_of_order::stream(self.session(), tree)
    }
}

/// Replaces every placeholder in `nodes` with its settled content.
fn fill(session: &mut Session, nodes: Vec<Resolved>) -> LocalBoxFuture<'_, Result<Vec<Resolved>>> {
    async move {
        let mut filled = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Resolved::Text(_) => filled.push(node),
                Resolved::Element(mut frame) => {
                    frame.children = fill(session, mem::take(&mut frame.children)).await?;
                    filled.push(Resolved::Element(frame));
                }
                Resolved::Hole(hole) => filled.extend(settle(session, hole).await?),
            }
        }
        Ok(filled)
    }
    .boxed_local()
}

async fn settle(session: &mut Session, hole: Hole) -> Result<Vec<Resolved>> {
    let Hole {
        id,
        fallback,
        task,
        context,
    } = hole;
    let node = match task {
        Some(Task::Async(Pending::Future(future))) => future.await?,
        Some(Task::Async(Pending::Stream(steps))) => final_value(steps).await?,
        Some(Task::Island { .. }) | None => return fill(session, fallback).await,
    };
    trace!(%id, "settled placeholder");
    let nodes = {
        let _guard = context::enter(context);
        session.resolve(node, Some(&id), false)?
    };
    fill(session, nodes).await
}

/// Drains `steps`, keeping the returned value.
async fn final_value(mut steps: LocalBoxStream<'static, Result<Step>>) -> Result<Node> {
    while let Some(step) = steps.next().await {
        if let Step::Return(node) = step? {
            return Ok(node);
        }
    }
    Ok(Node::Empty)
}

/// Renders `tree` with the default configuration.
///
/// # Errors
///
/// See [`Renderer::render`].
pub async fn render(tree: Node) -> Result<String> {
    Renderer::new().render(tree).await
}

/// Streams buffered markup chunks with the default configuration.
pub fn html(tree: Node) -> LocalBoxStream<'static, Result<String>> {
    Renderer::new().html(tree)
}

/// Renders `tree` synchronously with the default configuration.
///
/// # Errors
///
/// See [`Renderer::render_to_string`].
pub fn render_to_string(tree: Node) -> Result<String> {
    Renderer::new().render_to_string(tree)
}

/// Streams `tree` out of order with the default configuration.
pub fn stream(tree: Node) -> LocalBoxStream<'static, Result<String>> {
    Renderer::new().stream(tree)
}
