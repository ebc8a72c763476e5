//! xrdiff processor - render loop, validation and diff generation
//!
//! This crate provides:
//! - **DiffCalculator**: the iterative requirements render loop, per-object
//!   diff calculation and removal detection
//! - **RequirementsProvider**: turns renderer requirements into live objects
//! - **SchemaValidator**: XRD/CRD-backed structural validation
//! - **ResourceManager**: desired-to-live matching, owner-reference UIDs
//! - **DiffProcessor**: the per-XR pipeline wiring it all together
//! - **Formatter**: GNU-style full/compact diff text with optional color

pub mod calculator;
pub mod error;
pub mod formatter;
pub mod processor;
pub mod requirements;
pub mod resources;
pub mod schema;

pub use calculator::{DiffCalculator, MAX_REQUIREMENT_ITERATIONS};
pub use error::{DiffError, Result, ResultExt};
pub use formatter::{format_diff, generate_diff, DiffLine, DiffOptions, DiffType, LineTag, ResourceDiff};
pub use processor::DiffProcessor;
pub use requirements::RequirementsProvider;
pub use resources::{ResourceManager, COMPOSITE_LABEL, RESOURCE_NAME_ANNOTATION};
pub use schema::{CrdSchema, CrdScope, CrdVersion, SchemaValidator};
