#![doc = include_str!("../README.md")]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::future_not_send)]

pub mod logging;

pub mod prelude {
    //! Commonly used items for building and rendering trees.
    //!
    //! ```rust
    //! use arbor::prelude::*;
    //!
    //! let page: Node = h("p").child("Hello").into();
    //! assert_eq!(ssr::render_to_string(page).unwrap(), "<p>Hello</p>");
    //! ```
    pub use super::{dom, ssr};
    pub use arbor_core::{
        Args, AsyncComponent, Context, Error, Node, NodeId, Result, Routine, Scope, Stateful,
        Stateless, Step, Tier, context, h, render_loop, render_once,
    };
    pub use arbor_dom::{Event, Runtime, on};
}

#[doc(inline)]
pub use arbor_core::{
    Args, AsyncComponent, Attributes, Cleanup, Config, Context, ContextSlot, Effect, Element,
    Error, Handle, Inert, Key, Kind, Memo, Node, NodeId, NodeRef, Patch, Pending, Result, Routine,
    SVG_NAMESPACE, Schedule, Scope, Services, Stateful, StatefulBuilder, Stateless, Step, Tier,
    Value, context, h, normalize, render_loop, render_once,
};
pub use arbor_core::{component, markup};
pub use arbor_dom as dom;
pub use arbor_ssr as ssr;

pub use tracing as log;
