//! Component instances and their lifecycle.
//!
//! An instance is created the first time a stateful component is mounted on a
//! host element and lives in that element's side-table entry. Each pass
//! resumes its routine once and renders the result into the host.

use std::{fmt, rc::Rc};

use arbor_core::{
    Args, Cleanup, Context, Effect, Error, Handle, Mount, NodeId, Result, Routine, Schedule, Scope,
    Services, Stateful, Step, context,
};
use tracing::{debug, trace};

use crate::runtime::Runtime;

enum State {
    /// No routine yet, or the previous one returned or failed.
    Created,
    Idle(Box<dyn Routine>),
    /// The routine is checked out for a resume.
    Rendering,
    Disposed,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "Created",
            Self::Idle(_) => "Idle",
            Self::Rendering => "Rendering",
            Self::Disposed => "Disposed",
        })
    }
}

/// State of one mounted stateful component.
pub(crate) struct Instance {
    component: Stateful,
    args: Args,
    context: Context,
    state: State,
    effects: Vec<Effect>,
    disposers: Vec<Cleanup>,
    cleanups: Vec<Cleanup>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("component", &self.component.name())
            .field("state", &self.state)
            .field("effects", &self.effects.len())
            .field("disposers", &self.disposers.len())
            .field("cleanups", &self.cleanups.len())
            .finish_non_exhaustive()
    }
}

impl Instance {
    fn new(component: Stateful, args: Args, context: Context) -> Self {
        Self {
            component,
            args,
            context,
            state: State::Created,
            effects: Vec::new(),
            disposers: Vec::new(),
            cleanups: Vec::new(),
        }
    }

    pub(crate) const fn is_disposed(&self) -> bool {
        matches!(self.state, State::Disposed)
    }

    pub(crate) fn is_instance_of(&self, component: &Stateful) -> bool {
        self.component.same(component)
    }

    pub(crate) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub(crate) fn push_disposer(&mut self, disposer: Cleanup) {
        self.disposers.push(disposer);
    }

    fn has_effects(&self) -> bool {
        !self.effects.is_empty()
    }
}

struct InstanceServices<'a> {
    handle: Handle,
    effects: &'a mut Vec<Effect>,
    cleanups: &'a mut Vec<Cleanup>,
}

impl<'a> InstanceServices<'a> {
    fn new(
        node: NodeId,
        schedule: Rc<dyn Schedule>,
        effects: &'a mut Vec<Effect>,
        cleanups: &'a mut Vec<Cleanup>,
    ) -> Self {
        Self {
            handle: Handle::new(node, schedule),
            effects,
            cleanups,
        }
    }
}

impl Services for InstanceServices<'_> {
    fn handle(&self) -> Handle {
        self.handle.clone()
    }

    fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    fn cleanup(&mut self, cleanup: Cleanup) {
        self.cleanups.push(cleanup);
    }
}

fn advance_routine(
    mut routine: Box<dyn Routine>,
    scope: &mut Scope<'_>,
) -> Result<(Box<dyn Routine>, Step)> {
    let step = routine.resume(scope)?;
    Ok((routine, step))
}

fn run_callbacks(callbacks: Vec<Cleanup>) -> Result<()> {
    let mut first_error = None;
    for callback in callbacks {
        if let Err(error) = callback() {
            first_error.get_or_insert(error);
        }
    }
    first_error.map_or(Ok(()), Err)
}

impl Runtime {
    /// Binds `mount` to the host `node`, creating or replacing its instance,
    /// and renders it.
    pub(crate) fn bind(&mut self, node: NodeId, mount: Mount) -> Result<()> {
        let Mount {
            component,
            args,
            render,
        } = mount;
        let reusable = self
            .instance(node)
            .is_some_and(|instance| !instance.is_disposed() && instance.component.same(&component));

        if reusable {
            if let Some(instance) = self.instance_mut(node) {
                instance.args = args;
            }
            if !render {
                return Ok(());
            }
        } else {
            if self.has_instance(node) {
                self.terminate(node)?;
            }
            let context = self.ambient_context(node).child();
            debug!(?node, component = component.name(), "creating instance");
            self.meta.entry(node).or_default().instance =
                Some(Instance::new(component, args, context));
        }
        self.run(node)
    }

    /// Context new instances below `node` inherit from.
    fn ambient_context(&self, node: NodeId) -> Context {
        if let Some(current) = context::current() {
            return current;
        }
        let mut cursor = self.document.parent(node);
        while let Some(ancestor) = cursor {
            if let Some(instance) = self.instance(ancestor).filter(|i| !i.is_disposed()) {
                return instance.context.clone();
            }
            cursor = self.document.parent(ancestor);
        }
        self.context.clone()
    }

    /// Runs `f` with `node` as the current instance.
    pub(crate) fn within<R>(&mut self, node: NodeId, f: impl FnOnce(&mut Self) -> R) -> R {
        let _guard = self
            .instance(node)
            .map(|instance| context::enter(instance.context.clone()));
        self.rendering.push(node);
        let result = f(self);
        self.rendering.pop();
        result
    }

    /// Advances the instance hosted by `node` once.
    ///
    /// Errors are returned for the caller to propagate; this instance has
    /// already had its chance to recover from failures in its subtree.
    pub(crate) fn run(&mut self, node: NodeId) -> Result<()> {
        let Some(instance) = self.instance(node) else {
            return Ok(());
        };
        if instance.is_disposed() || self.rendering.contains(&node) {
            return Ok(());
        }
        trace!(?node, component = instance.component.name(), "advancing instance");
        self.within(node, |runtime| runtime.advance(node))
    }

    fn advance(&mut self, node: NodeId) -> Result<()> {
        let disposers = self
            .instance_mut(node)
            .map(|instance| std::mem::take(&mut instance.disposers))
            .unwrap_or_default();
        if let Err(error) = run_callbacks(disposers) {
            return self.recover(node, error);
        }

        let step = self.resume(node)?;
        let done = step.is_done();
        self.queue_effects(node);
        if let Err(error) = self.patch_children(node, vec![step.into_node()]) {
            self.recover(node, error)?;
        }
        if let Some(node_ref) = self.meta.get(&node).and_then(|meta| meta.node_ref.clone()) {
            node_ref.call(Some(node));
        }
        if done {
            self.retire(node)?;
        }
        Ok(())
    }

    fn queue_effects(&self, node: NodeId) {
        if self.instance(node).is_some_and(Instance::has_effects) {
            self.scheduler.schedule_effects(node);
        }
    }

    /// Resumes the routine, starting it first if needed. A failing routine is
    /// dropped and the instance goes back to [`State::Created`].
    fn resume(&mut self, node: NodeId) -> Result<Step> {
        let schedule = self.schedule.clone();
        let instance = self.instance_mut(node).ok_or(Error::StaleNode(node))?;
        let previous = std::mem::replace(&mut instance.state, State::Rendering);
        let Instance {
            component,
            args,
            context,
            state,
            effects,
            cleanups,
            ..
        } = &mut *instance;
        let mut services = InstanceServices::new(node, schedule, effects, cleanups);
        let mut scope = Scope::new(args, context, &mut services);

        let outcome = match previous {
            State::Idle(routine) => advance_routine(routine, &mut scope),
            State::Created | State::Rendering | State::Disposed => component
                .start(&mut scope)
                .and_then(|routine| advance_routine(routine, &mut scope)),
        };
        match outcome {
            Ok((routine, step)) => {
                *state = State::Idle(routine);
                Ok(step)
            }
            Err(error) => {
                debug!(?node, %error, "routine failed and was dropped");
                *state = State::Created;
                Err(error)
            }
        }
    }

    /// Offers `error` to the instance hosted by `node`.
    ///
    /// Only a live routine can recover. On success its replacement is rendered
    /// into the host.
    pub(crate) fn recover(&mut self, node: NodeId, error: Error) -> Result<()> {
        let schedule = self.schedule.clone();
        let Some(instance) = self.instance_mut(node) else {
            return Err(error);
        };
        let Instance {
            args,
            context,
            state,
            effects,
            cleanups,
            ..
        } = &mut *instance;
        let State::Idle(routine) = state else {
            return Err(error);
        };
        let mut services = InstanceServices::new(node, schedule, effects, cleanups);
        let mut scope = Scope::new(args, context, &mut services);

        let step = match routine.throw(&mut scope, &error) {
            None => return Err(error),
            Some(Err(failure)) => {
                debug!(?node, %failure, "error handler failed");
                return Err(failure.chain(error));
            }
            Some(Ok(step)) => step,
        };
        debug!(?node, %error, "instance recovered");
        let done = step.is_done();
        self.queue_effects(node);
        self.patch_children(node, vec![step.into_node()])?;
        if done {
            self.retire(node)?;
        }
        Ok(())
    }

    /// Finishes a routine that returned. The instance stays mounted and starts
    /// a fresh routine on its next pass.
    fn retire(&mut self, node: NodeId) -> Result<()> {
        trace!(?node, "routine returned");
        self.finish(node, State::Created)
    }

    /// Tears the instance down for good and cancels its pending work.
    pub(crate) fn terminate(&mut self, node: NodeId) -> Result<()> {
        if !self.has_instance(node) {
            return Ok(());
        }
        debug!(?node, "disposing instance");
        self.scheduler.cancel(node);
        self.within(node, |runtime| runtime.finish(node, State::Disposed))
    }

    /// Runs disposers and cleanups, then the routine's own teardown.
    fn finish(&mut self, node: NodeId, next: State) -> Result<()> {
        let schedule = self.schedule.clone();
        let Some(instance) = self.instance_mut(node) else {
            return Ok(());
        };
        let mut callbacks = std::mem::take(&mut instance.disposers);
        callbacks.append(&mut instance.cleanups);
        instance.effects.clear();
        let mut result = run_callbacks(callbacks);

        let previous = std::mem::replace(&mut instance.state, next);
        if let State::Idle(mut routine) = previous {
            let Instance {
                args,
                context,
                effects,
                cleanups,
                ..
            } = &mut *instance;
            let mut services = InstanceServices::new(node, schedule, effects, cleanups);
            let mut scope = Scope::new(args, context, &mut services);
            if let Err(error) = routine.finish(&mut scope) {
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        result
    }
}
