//! Component definitions and the routine protocol driving stateful components.
//!
//! Three kinds of components exist:
//!
//! - [`Stateless`] functions are inlined by the normalizer.
//! - [`Stateful`] components own a [`Routine`] that is resumed once per render and
//!   keeps its state between renders.
//! - [`AsyncComponent`]s resolve later and are only understood by the server renderer.

use std::{fmt, future::Future, rc::Rc};

use futures::{FutureExt, Stream, StreamExt, future::LocalBoxFuture, stream::LocalBoxStream};

use crate::{
    context::{Context, ContextSlot},
    error::{Error, Result},
    node::{Node, NodeId},
    value::{Attributes, Value},
};

// ============================================================================
// Arguments
// ============================================================================

/// Arguments passed to a component: its non-host attributes plus its children.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Attributes,
    children: Node,
}

impl Args {
    /// Creates an argument set.
    #[must_use]
    pub const fn new(values: Attributes, children: Node) -> Self {
        Self { values, children }
    }

    /// Looks up an argument.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Looks up a string argument.
    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Looks up an integer argument.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    /// Returns `true` if the argument is present and truthy.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.get(name).is_some_and(Value::is_truthy)
    }

    /// Borrows an opaque argument as `T`.
    #[must_use]
    pub fn downcast<T: 'static>(&self, name: &str) -> Option<&T> {
        self.get(name).and_then(Value::downcast_ref)
    }

    /// All named arguments.
    #[must_use]
    pub const fn values(&self) -> &Attributes {
        &self.values
    }

    /// The children passed to the component.
    #[must_use]
    pub const fn children(&self) -> &Node {
        &self.children
    }

    /// Splits into named arguments and children.
    #[must_use]
    pub fn into_parts(self) -> (Attributes, Node) {
        (self.values, self.children)
    }
}

// ============================================================================
// Routines
// ============================================================================

/// Result of advancing a routine once.
#[derive(Debug, Clone)]
pub enum Step {
    /// The routine rendered and can be resumed again.
    Yield(Node),
    /// The routine rendered its final value and is finished.
    Return(Node),
}

impl Step {
    /// The rendered node.
    #[must_use]
    pub fn into_node(self) -> Node {
        match self {
            Self::Yield(node) | Self::Return(node) => node,
        }
    }

    /// Returns `true` for [`Step::Return`].
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Return(_))
    }
}

/// A resumable computation owned by one component instance.
///
/// State that must survive between renders lives in the routine itself.
pub trait Routine: 'static {
    /// Advances the routine by one render.
    ///
    /// # Errors
    ///
    /// Returns the error raised while rendering. The routine is discarded afterwards.
    fn resume(&mut self, scope: &mut Scope<'_>) -> Result<Step>;

    /// Delivers an error raised inside this instance's subtree.
    ///
    /// Return `None` to let the error continue upwards, `Some(Ok(step))` to
    /// render a replacement, or `Some(Err(_))` if handling failed.
    fn throw(&mut self, scope: &mut Scope<'_>, error: &Error) -> Option<Result<Step>> {
        let _ = (scope, error);
        None
    }

    /// Runs teardown. Called once when the instance is removed or the routine returned.
    ///
    /// # Errors
    ///
    /// Returns any error raised during teardown.
    fn finish(&mut self, scope: &mut Scope<'_>) -> Result<()> {
        let _ = scope;
        Ok(())
    }
}

type RecoverFn = Box<dyn FnMut(&mut Scope<'_>, &Error) -> Result<Node>>;
type FinallyFn = Box<dyn FnMut(&mut Scope<'_>) -> Result<()>>;

/// A routine that renders `body` on every resume.
pub struct Loop<F> {
    body: F,
    recover: Option<RecoverFn>,
    finally: Option<FinallyFn>,
}

/// Builds a routine that calls `body` once per render, forever.
pub fn render_loop<F>(body: F) -> Loop<F>
where
    F: FnMut(&mut Scope<'_>) -> Result<Node> + 'static,
{
    Loop {
        body,
        recover: None,
        finally: None,
    }
}

impl<F> Loop<F> {
    /// Handles errors raised in the subtree by rendering a replacement.
    #[must_use]
    pub fn recover(
        mut self,
        recover: impl FnMut(&mut Scope<'_>, &Error) -> Result<Node> + 'static,
    ) -> Self {
        self.recover = Some(Box::new(recover));
        self
    }

    /// Runs `finally` when the instance is torn down.
    #[must_use]
    pub fn finally(mut self, finally: impl FnMut(&mut Scope<'_>) -> Result<()> + 'static) -> Self {
        self.finally = Some(Box::new(finally));
        self
    }
}

impl<F> fmt::Debug for Loop<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loop")
            .field("recover", &self.recover.is_some())
            .field("finally", &self.finally.is_some())
            .finish_non_exhaustive()
    }
}

impl<F> Routine for Loop<F>
where
    F: FnMut(&mut Scope<'_>) -> Result<Node> + 'static,
{
    fn resume(&mut self, scope: &mut Scope<'_>) -> Result<Step> {
        (self.body)(scope).map(Step::Yield)
    }

    fn throw(&mut self, scope: &mut Scope<'_>, error: &Error) -> Option<Result<Step>> {
        let recover = self.recover.as_mut()?;
        Some(recover(scope, error).map(Step::Yield))
    }

    fn finish(&mut self, scope: &mut Scope<'_>) -> Result<()> {
        self.finally.as_mut().map_or(Ok(()), |finally| finally(scope))
    }
}

/// A routine that renders once and returns.
pub struct Once<F>(F);

/// Builds a routine that finishes after its first render.
pub fn render_once<F>(body: F) -> Once<F>
where
    F: FnMut(&mut Scope<'_>) -> Result<Node> + 'static,
{
    Once(body)
}

impl<F> fmt::Debug for Once<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Once(..)")
    }
}

impl<F> Routine for Once<F>
where
    F: FnMut(&mut Scope<'_>) -> Result<Node> + 'static,
{
    fn resume(&mut self, scope: &mut Scope<'_>) -> Result<Step> {
        (self.0)(scope).map(Step::Return)
    }
}

// ============================================================================
// Instance services
// ============================================================================

/// Callback run at teardown or before the next render.
pub type Cleanup = Box<dyn FnOnce() -> Result<()>>;

/// Callback run after a render; may return a [`Cleanup`] run before the next one.
pub type Effect = Box<dyn FnOnce() -> Result<Option<Cleanup>>>;

/// When a scheduled re-render runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tier {
    /// As soon as the current task yields.
    #[default]
    Microtask,
    /// Before the next frame.
    AnimationFrame,
    /// When nothing else is pending.
    Idle,
}

/// Receives re-render requests for live nodes.
pub trait Schedule {
    /// Requests a re-render of the component hosted by `node`.
    fn schedule(&self, node: NodeId, tier: Tier);
}

/// Cheap handle an instance can keep to request its own re-render later.
#[derive(Clone, Default)]
pub struct Handle {
    node: Option<NodeId>,
    scheduler: Option<Rc<dyn Schedule>>,
}

impl Handle {
    /// Creates a handle for the instance hosted by `node`.
    #[must_use]
    pub fn new(node: NodeId, scheduler: Rc<dyn Schedule>) -> Self {
        Self {
            node: Some(node),
            scheduler: Some(scheduler),
        }
    }

    /// A handle whose requests are ignored.
    #[must_use]
    pub const fn detached() -> Self {
        Self {
            node: None,
            scheduler: None,
        }
    }

    /// The host node, if the instance lives in a document.
    #[must_use]
    pub const fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Requests a re-render at the given tier.
    pub fn schedule(&self, tier: Tier) {
        if let (Some(node), Some(scheduler)) = (self.node, &self.scheduler) {
            scheduler.schedule(node, tier);
        }
    }

    /// Requests a re-render on the microtask tier.
    pub fn queue_microtask(&self) {
        self.schedule(Tier::Microtask);
    }

    /// Requests a re-render on the animation frame tier.
    pub fn request_animation_frame(&self) {
        self.schedule(Tier::AnimationFrame);
    }

    /// Requests a re-render on the idle tier.
    pub fn request_idle_callback(&self) {
        self.schedule(Tier::Idle);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("node", &self.node)
            .field("attached", &self.scheduler.is_some())
            .finish()
    }
}

/// Host-provided services backing a [`Scope`].
pub trait Services {
    /// A handle for scheduling the instance.
    fn handle(&self) -> Handle;
    /// Registers an effect for after the current render.
    fn effect(&mut self, effect: Effect);
    /// Registers a teardown callback.
    fn cleanup(&mut self, cleanup: Cleanup);
}

/// Services that discard every registration, used where nothing outlives the render.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inert;

impl Services for Inert {
    fn handle(&self) -> Handle {
        Handle::detached()
    }

    fn effect(&mut self, _effect: Effect) {}

    fn cleanup(&mut self, _cleanup: Cleanup) {}
}

/// What a routine can see and do while it runs.
pub struct Scope<'a> {
    args: &'a Args,
    context: &'a Context,
    services: &'a mut dyn Services,
}

impl<'a> Scope<'a> {
    /// Creates a scope.
    pub fn new(args: &'a Args, context: &'a Context, services: &'a mut dyn Services) -> Self {
        Self {
            args,
            context,
            services,
        }
    }

    /// The instance's current arguments.
    #[must_use]
    pub const fn args(&self) -> &'a Args {
        self.args
    }

    /// The instance's context frame.
    #[must_use]
    pub const fn context(&self) -> &'a Context {
        self.context
    }

    /// A handle for requesting re-renders later.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.services.handle()
    }

    /// Runs `effect` after this render. A returned cleanup runs before the next render.
    pub fn effect(&mut self, effect: impl FnOnce() -> Result<Option<Cleanup>> + 'static) {
        self.services.effect(Box::new(effect));
    }

    /// Runs `cleanup` when the instance is torn down.
    pub fn cleanup(&mut self, cleanup: impl FnOnce() -> Result<()> + 'static) {
        self.services.cleanup(Box::new(cleanup));
    }

    /// Reads a context entry.
    #[must_use]
    pub fn get<T: Clone + 'static>(&self, slot: &ContextSlot<T>) -> T {
        slot.get_in(self.context)
    }

    /// Writes a context entry local to this instance.
    pub fn set<T: Clone + 'static>(&self, slot: &ContextSlot<T>, value: T) {
        slot.set_in(self.context, value);
    }
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("args", self.args)
            .field("context", self.context)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Stateless components
// ============================================================================

type StatelessFn = dyn Fn(&Args) -> Result<Node>;

/// A function component, inlined into its parent during normalization.
#[derive(Clone)]
pub struct Stateless {
    name: Rc<str>,
    render: Rc<StatelessFn>,
}

impl Stateless {
    /// Wraps an infallible render function.
    pub fn new<F, N>(name: &str, render: F) -> Self
    where
        F: Fn(&Args) -> N + 'static,
        N: Into<Node>,
    {
        Self::fallible(name, move |args| Ok(render(args).into()))
    }

    /// Wraps a render function that may fail.
    pub fn fallible<F>(name: &str, render: F) -> Self
    where
        F: Fn(&Args) -> Result<Node> + 'static,
    {
        Self {
            name: Rc::from(name),
            render: Rc::new(render),
        }
    }

    /// Component name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders with `args`.
    ///
    /// # Errors
    ///
    /// Returns whatever the render function returns.
    pub fn call(&self, args: &Args) -> Result<Node> {
        (self.render)(args)
    }
}

impl fmt::Debug for Stateless {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Stateless").field(&self.name).finish()
    }
}

// ============================================================================
// Stateful components
// ============================================================================

type InitFn = dyn Fn(&mut Scope<'_>) -> Result<Box<dyn Routine>>;

struct StatefulDef {
    name: String,
    init: Box<InitFn>,
    is: Option<String>,
    attrs: Attributes,
    args: Attributes,
    src: Option<String>,
    fallback: Node,
}

/// A component whose state lives in a [`Routine`] between renders.
///
/// Two handles are the same component only if they come from the same
/// [`StatefulBuilder::build`] call.
#[derive(Clone)]
pub struct Stateful(Rc<StatefulDef>);

impl Stateful {
    /// Starts defining a component. `init` runs on first render and creates the routine.
    pub fn builder<F, R>(name: impl Into<String>, init: F) -> StatefulBuilder
    where
        F: Fn(&mut Scope<'_>) -> R + 'static,
        R: Routine,
    {
        Self::try_builder(name, move |scope| Ok(init(scope)))
    }

    /// Like [`Stateful::builder`] with a fallible setup.
    pub fn try_builder<F, R>(name: impl Into<String>, init: F) -> StatefulBuilder
    where
        F: Fn(&mut Scope<'_>) -> Result<R> + 'static,
        R: Routine,
    {
        StatefulBuilder {
            def: StatefulDef {
                name: name.into(),
                init: Box::new(move |scope: &mut Scope<'_>| {
                    Ok(Box::new(init(scope)?) as Box<dyn Routine>)
                }),
                is: None,
                attrs: Attributes::new(),
                args: Attributes::new(),
                src: None,
                fallback: Node::Empty,
            },
        }
    }

    /// Component name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Host tag override.
    #[must_use]
    pub fn is(&self) -> Option<&str> {
        self.0.is.as_deref()
    }

    /// Default host attributes.
    #[must_use]
    pub fn attrs(&self) -> &Attributes {
        &self.0.attrs
    }

    /// Default arguments.
    #[must_use]
    pub fn args(&self) -> &Attributes {
        &self.0.args
    }

    /// Module hydrating this component on the client, for islands.
    #[must_use]
    pub fn src(&self) -> Option<&str> {
        self.0.src.as_deref()
    }

    /// Server placeholder content.
    #[must_use]
    pub fn fallback(&self) -> &Node {
        &self.0.fallback
    }

    /// Runs setup and creates a fresh routine.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the setup code.
    pub fn start(&self, scope: &mut Scope<'_>) -> Result<Box<dyn Routine>> {
        (self.0.init)(scope)
    }

    /// Returns `true` if both handles are the same definition.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Stateful {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stateful")
            .field("name", &self.0.name)
            .field("is", &self.0.is)
            .field("src", &self.0.src)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Stateful`] components.
pub struct StatefulBuilder {
    def: StatefulDef,
}

impl StatefulBuilder {
    /// Host tag rendered for the component.
    #[must_use]
    pub fn is(mut self, tag: impl Into<String>) -> Self {
        self.def.is = Some(tag.into());
        self
    }

    /// Default host attribute.
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.def.attrs.insert(name, value);
        self
    }

    /// Default argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.def.args.insert(name, value);
        self
    }

    /// Marks the component as an island loaded from `src` on the client.
    #[must_use]
    pub fn src(mut self, src: impl Into<String>) -> Self {
        self.def.src = Some(src.into());
        self
    }

    /// Placeholder content used while streaming.
    #[must_use]
    pub fn fallback(mut self, fallback: impl Into<Node>) -> Self {
        self.def.fallback = fallback.into();
        self
    }

    /// Validates the definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidComponent`] for an empty name, an invalid host tag
    /// or an empty module reference.
    pub fn build(self) -> Result<Stateful> {
        let def = self.def;
        let invalid = |reason: &str| Error::InvalidComponent {
            name: def.name.clone(),
            reason: reason.to_owned(),
        };
        if def.name.is_empty() {
            return Err(invalid("component name is empty"));
        }
        if let Some(tag) = &def.is {
            if !is_valid_tag(tag) {
                return Err(invalid(&format!("`{tag}` is not a valid host tag")));
            }
        }
        if def.src.as_deref().is_some_and(str::is_empty) {
            return Err(invalid("module reference is empty"));
        }
        Ok(Stateful(Rc::new(def)))
    }
}

impl fmt::Debug for StatefulBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatefulBuilder")
            .field("name", &self.def.name)
            .finish_non_exhaustive()
    }
}

fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

// ============================================================================
// Async components
// ============================================================================

type FutureFn = dyn Fn(Args) -> LocalBoxFuture<'static, Result<Node>>;
type StreamFn = dyn Fn(Args) -> LocalBoxStream<'static, Result<Step>>;

#[derive(Clone)]
enum AsyncBody {
    Future(Rc<FutureFn>),
    Stream(Rc<StreamFn>),
}

/// Work started for an [`AsyncComponent`].
pub enum Pending {
    /// Resolves to a single tree.
    Future(LocalBoxFuture<'static, Result<Node>>),
    /// Produces intermediate trees followed by a final one.
    Stream(LocalBoxStream<'static, Result<Step>>),
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Future(_) => f.write_str("Pending::Future"),
            Self::Stream(_) => f.write_str("Pending::Stream"),
        }
    }
}

/// A component rendered asynchronously by the server renderer.
///
/// Stream components yield [`Step::Yield`] for intermediate content and may end
/// with [`Step::Return`]; a stream ending without a return finishes with nothing.
#[derive(Clone)]
pub struct AsyncComponent {
    name: Rc<str>,
    body: AsyncBody,
    fallback: Node,
}

impl AsyncComponent {
    /// A component backed by a future.
    pub fn future<F, Fut>(name: &str, body: F) -> Self
    where
        F: Fn(Args) -> Fut + 'static,
        Fut: Future<Output = Result<Node>> + 'static,
    {
        Self {
            name: Rc::from(name),
            body: AsyncBody::Future(Rc::new(move |args| body(args).boxed_local())),
            fallback: Node::Empty,
        }
    }

    /// A component backed by a stream of steps.
    pub fn stream<F, S>(name: &str, body: F) -> Self
    where
        F: Fn(Args) -> S + 'static,
        S: Stream<Item = Result<Step>> + 'static,
    {
        Self {
            name: Rc::from(name),
            body: AsyncBody::Stream(Rc::new(move |args| body(args).boxed_local())),
            fallback: Node::Empty,
        }
    }

    /// Content shown in the placeholder until the component resolves.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<Node>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Component name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder content.
    #[must_use]
    pub const fn fallback(&self) -> &Node {
        &self.fallback
    }

    /// Returns `true` if the component can produce several trees.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self.body, AsyncBody::Stream(_))
    }

    /// Starts the component's work.
    #[must_use]
    pub fn start(&self, args: Args) -> Pending {
        match &self.body {
            AsyncBody::Future(body) => Pending::Future(body(args)),
            AsyncBody::Stream(body) => Pending::Stream(body(args)),
        }
    }
}

impl fmt::Debug for AsyncComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncComponent")
            .field("name", &self.name)
            .field("stream", &self.is_stream())
            .finish_non_exhaustive()
    }
}
