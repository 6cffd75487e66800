//! Out-of-order streaming.
//!
//! The stream first yields the markup of the whole tree with placeholders in
//! place of deferred content. Deferred tasks then run concurrently; each
//! result is resolved (possibly allocating nested placeholders and tasks) and
//! yielded as a `<script>` pushing a [`Patch`] to the client.

use std::{
    pin::Pin,
    task::{Context as TaskContext, Poll, ready},
};

use arbor_core::{Context, Node, Patch, Pending, Result, Step, context};
use futures::{
    FutureExt, Stream, StreamExt,
    stream::{self, LocalBoxStream, SelectAll},
};
use pin_project_lite::pin_project;
use tracing::{debug, warn};

use crate::{
    html,
    resolve::{Resolved, Session, Task},
};

/// One piece of deferred content.
#[derive(Debug)]
struct Output {
    id: String,
    node: Node,
    src: Option<String>,
    done: bool,
    context: Context,
}

pin_project! {
    /// Turns the steps of a streaming component into outputs for one placeholder.
    ///
    /// Every yield is a partial output, a return is the final one. A stream
    /// that ends without returning finishes with empty content.
    struct Steps<S> {
        #[pin]
        inner: S,
        id: String,
        context: Context,
        finished: bool,
    }
}

impl<S> Steps<S> {
    const fn new(inner: S, id: String, context: Context) -> Self {
        Self {
            inner,
            id,
            context,
            finished: false,
        }
    }
}

impl<S> Stream for Steps<S>
where
    S: Stream<Item = Result<Step>>,
{
    type Item = Result<Output>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }
        let (node, done) = match ready!(this.inner.poll_next(cx)) {
            Some(Ok(Step::Yield(node))) => (node, false),
            Some(Ok(Step::Return(node))) => (node, true),
            Some(Err(error)) => {
                *this.finished = true;
                return Poll::Ready(Some(Err(error)));
            }
            None => (Node::Empty, true),
        };
        *this.finished = done;
        Poll::Ready(Some(Ok(Output {
            id: this.id.clone(),
            node,
            src: None,
            done,
            context: this.context.clone(),
        })))
    }
}

fn task_stream(
    id: String,
    task: Task,
    context: Context,
) -> LocalBoxStream<'static, Result<Output>> {
    match task {
        Task::Async(Pending::Future(future)) => future
            .map(move |result| {
                result.map(|node| Output {
                    id,
                    node,
                    src: None,
                    done: true,
                    context,
                })
            })
            .into_stream()
            .boxed_local(),
        Task::Async(Pending::Stream(steps)) => Steps::new(steps, id, context).boxed_local(),
        Task::Island { src, args } => stream::iter([Ok(Output {
            id,
            node: args,
            src: Some(src),
            done: true,
            context,
        })])
        .boxed_local(),
    }
}

struct Driver {
    session: Session,
    tasks: SelectAll<LocalBoxStream<'static, Result<Output>>>,
    markup: Option<Result<Vec<Resolved>>>,
    failed: bool,
}

impl Driver {
    /// Schedules the tasks of every hole in `nodes`.
    fn spawn(&mut self, nodes: &mut [Resolved]) {
        for node in nodes {
            match node {
                Resolved::Text(_) => {}
                Resolved::Element(frame) => self.spawn(&mut frame.children),
                Resolved::Hole(hole) => {
                    if let Some(task) = hole.task.take() {
                        self.tasks
                            .push(task_stream(hole.id.clone(), task, hole.context.clone()));
                    }
                    self.spawn(&mut hole.fallback);
                }
            }
        }
    }

    fn markup(&mut self, mut nodes: Vec<Resolved>) -> String {
        self.spawn(&mut nodes);
        debug!(tasks = self.tasks.len(), "markup emitted");
        html::to_string(&nodes, &self.session.config)
    }

    fn patch(&mut self, output: Output) -> Result<String> {
        let Output {
            id,
            node,
            src,
            done,
            context,
        } = output;
        let patch = match src {
            Some(src) => Patch::new(id, node).with_src(src),
            None => {
                let mut nodes = {
                    let _guard = context::enter(context);
                    self.session.resolve(node, Some(&id), true)?
                };
                self.spawn(&mut nodes);
                Patch::new(id, html::into_node(nodes, &self.session.config))
            }
        }
        .with_done(done);
        debug!(id = %patch.id, done, "emitting patch");
        patch.to_script(&self.session.config.stream_global)
    }

    async fn next_chunk(&mut self) -> Option<Result<String>> {
        if self.failed {
            return None;
        }
        let chunk = if let Some(markup) = self.markup.take() {
            markup.map(|nodes| self.markup(nodes))
        } else {
            let output = self.tasks.next().await?;
            output.and_then(|output| self.patch(output))
        };
        if chunk.is_err() {
            self.failed = true;
            if !self.tasks.is_empty() {
                warn!(pending = self.tasks.len(), "stream failed, dropping pending tasks");
            }
        }
        Some(chunk)
    }
}

/// Streams `tree` as markup followed by patch scripts.
pub(crate) fn stream(mut session: Session, tree: Node) -> LocalBoxStream<'static, Result<String>> {
    let markup = session.resolve(tree, None, true);
    let driver = Driver {
        session,
        tasks: SelectAll::new(),
        markup: Some(markup),
        failed: false,
    };
    stream::unfold(driver, |mut driver| async move {
        let chunk = driver.next_chunk().await?;
        Some((chunk, driver))
    })
    .boxed_local()
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn steps_end_with_a_final_output() {
        let steps = stream::iter([Ok::<_, arbor_core::Error>(Step::Yield(Node::from("a")))]);
        let outputs: Vec<_> = block_on(
            Steps::new(steps, "0".to_owned(), Context::root()).collect::<Vec<_>>(),
        );

        let flags: Vec<_> = outputs
            .into_iter()
            .map(|output| output.map(|output| (output.done, output.node.is_empty())))
            .collect::<Result<_>>()
            .expect("no errors");
        assert_eq!(flags, [(false, false), (true, true)]);
    }

    #[test]
    fn steps_stop_after_return() {
        let steps = stream::iter([
            Ok::<_, arbor_core::Error>(Step::Return(Node::from("done"))),
            Ok(Step::Yield(Node::from("ignored"))),
        ]);
        let outputs =
            block_on(Steps::new(steps, "1".to_owned(), Context::root()).collect::<Vec<_>>());
        assert_eq!(outputs.len(), 1);
    }
}
