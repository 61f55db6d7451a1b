//! jitportal: quasi-immutable field versioning and a compilation portal for
//! tracing JITs
//!
//! A tracing JIT may fold a rarely written ("quasi-immutable") field into
//! compiled code as a constant, provided the code is discarded as soon as the
//! field is written. This crate provides that versioning core and the
//! observer contract through which the compiler reports aborts, compiled
//! loops and bridges.
//!
//! # Quick Start
//!
//! ```no_run
//! use jitportal::config::JitConfig;
//! use jitportal::metainterp::{programs::QuasiImmutCounter, MetaInterp};
//! use jitportal::portal::LoggingPortal;
//! use std::sync::Arc;
//!
//! fn main() -> jitportal::Result<()> {
//!     let mut jit = MetaInterp::with_portal(JitConfig::for_tests(), Arc::new(LoggingPortal));
//!     let mut program = QuasiImmutCounter::setup(jit.heap_mut(), 100)?;
//!     let state = jit.run(&mut program, QuasiImmutCounter::start(7))?;
//!     println!("total = {}", state.total);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`quasi_immut`], [`jit`], [`portal`] |
//! | **Compiler side** | [`registry`], [`metainterp`] |
//! | **Support** | [`config`], [`error`](Error) |
#![allow(clippy::too_many_arguments)]
#![allow(clippy::new_without_default)]

pub mod config;
pub mod jit;
pub mod metainterp;
pub mod portal;
pub mod quasi_immut;
pub mod registry;

mod error;

pub use error::{Error, ErrorKind, Result};
pub use jit::{AbortReason, ArtifactHandle, CompileKind, EntryPoint, SpecializationKey, TraceOp};
pub use portal::{JitPortal, PortalDispatcher};
pub use quasi_immut::{FieldVersion, QuasiImmutGuard, VersionTable};

/// jitportal version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
