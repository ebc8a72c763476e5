//! xrdiff core - object model and render contract
//!
//! This crate provides:
//! - **Object helpers**: GVK extraction, nested field access, deep merge and
//!   diff-oriented cleanup for dynamically typed cluster objects
//! - **Typed views**: explicit conversions from dynamic objects to
//!   `Composition`, `Xrd` and `Function`
//! - **Render contract**: the `Renderer` trait plus its input/output types,
//!   implemented outside this workspace by the actual composition engine

pub mod composition;
pub mod error;
pub mod object;
pub mod render;

pub use composition::{Composition, CompositionSpec, Function, FunctionRef, PipelineStep, TypeRef, Xrd, XrdNames, XrdVersion};
pub use error::{CoreError, Result};
pub use object::{ResourceKey, cleanup_for_diff, gvk_display, gvk_of, merge_over, to_canonical_yaml};
pub use render::{RenderFailure, RenderInputs, RenderOutputs, Renderer, Requirement};
