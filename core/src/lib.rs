//! # arbor-core
//!
//! Platform independent building blocks of the arbor renderer.
//!
//! This crate defines the virtual [`Node`] model and its [`h`] builder, the
//! [`normalize`](normalize::normalize) pass, component definitions and the
//! [`Routine`] protocol that stateful components implement, context
//! propagation, and the [`Patch`] wire format shared by the DOM runtime
//! (`arbor-dom`) and the server renderer (`arbor-ssr`).

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod markup;
pub mod node;
pub mod normalize;
pub mod patch;
pub mod value;

pub use component::{
    Args, AsyncComponent, Cleanup, Effect, Handle, Inert, Pending, Routine, Schedule, Scope,
    Services, Stateful, StatefulBuilder, Stateless, Step, Tier, render_loop, render_once,
};
pub use config::{Config, SVG_NAMESPACE};
pub use context::{Context, ContextSlot, context};
pub use error::{Error, Result};
pub use node::{Element, Key, Kind, Memo, Node, NodeId, NodeRef, h};
pub use normalize::{Descriptor, Mount, Normalized, normalize};
pub use patch::Patch;
pub use value::{Attributes, Value};
