//! Core utilities for Conduit.
//!
//! This crate provides foundational types used throughout conduit:
//! - `arena`: Generational arena with typed handles
//! - `path`: Response paths
//! - `error`: Client-facing GraphQL errors
//! - `diagnostics`: Error kinds and diagnostic scopes

pub mod arena;
pub mod diagnostics;
pub mod error;
pub mod path;

pub use arena::{Arena, Id};
pub use diagnostics::{DiagnosticScope, ErrorKind};
pub use error::{codes, GraphqlError};
pub use path::{Path, PathSegment};
