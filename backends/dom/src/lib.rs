#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::future_not_send)]

//! Document runtime for arbor.
//!
//! [`Runtime`] renders [`arbor_core::Node`] trees into an in-memory
//! [`Document`], keeping render bookkeeping (keys, memo tokens, attribute
//! caches and component instances) in a side table keyed by [`arbor_core::NodeId`].
//! Re-render requests are batched by the [`Scheduler`], and the [`Hydrator`]
//! replays streamed server patches against server markup.

mod document;
mod event;
mod html;
mod hydrate;
mod instance;
mod reconcile;
mod runtime;
mod scheduler;

pub use document::{Document, Mutation};
pub use event::{Event, Listener, on};
pub use hydrate::{Hydrator, ModuleLoader, PatchQueue, patch_queue, scripted_patches};
pub use runtime::{Runtime, RuntimeBuilder};
pub use scheduler::{Scheduler, coalesce};
