#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::future_not_send)]

//! Server renderer for arbor.
//!
//! [`Renderer`] turns [`arbor_core::Node`] trees into markup in three ways:
//!
//! - [`Renderer::render_to_string`] renders synchronously and leaves async
//!   components as placeholders showing their fallback.
//! - [`Renderer::render`] and [`Renderer::html`] await async components in
//!   place.
//! - [`Renderer::stream`] writes the document immediately and streams
//!   deferred content afterwards as [`arbor_core::Patch`] scripts, addressed
//!   to placeholders by hierarchical ids from an [`IdAllocator`].

mod html;
mod render;
mod resolve;
mod stream;

pub use render::{Renderer, html, render, render_to_string, stream};
pub use resolve::IdAllocator;
