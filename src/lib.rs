//! # Native Bridge
//!
//! Host-side bridge that loads native behavior modules (shared libraries) at
//! runtime and drives them once per frame through a fixed-layout C ABI.
//!
//! ## Features
//!
//! - **Module Pool**: reference-counted loading keyed by module name, one OS load per resident module
//! - **Typed Entry Points**: `start`/`update`/`destroy` bound with optional/required policy and an ABI handshake
//! - **Frame Bridge**: per-instance lifecycle state machine with start-before-update and destroy-exactly-once guarantees
//! - **Entity Lookup**: tag-based lookups from native code through an explicit host API, cached per instance
//! - **ECS Host**: bevy_ecs integration that attaches behaviors to tagged entities
//!
//! ## Architecture Design
//!
//! - **abi**: the wire contract shared with native modules, nothing else
//! - **bridge**: loading, resolution and per-instance orchestration, independent of any scene model
//! - **host**: drives bridges against a `World`, owns the clock
//!
//! ### Example
//!
//! ```no_run
//! use native_bridge::config::BridgeConfig;
//! use native_bridge::host::run_simulation;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::from_toml_file("bridge.toml")?;
//!     let report = run_simulation(&config)?;
//!     println!("{} behavior(s), {} inert", report.behaviors, report.inert);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`abi`]: Fixed-layout boundary types and entry-point signatures
//! - [`bridge`]: Module pool, function resolver, lookup cache and frame bridge
//! - [`config`]: Configuration system
//! - [`core`]: Errors, logging and shared macros
//! - [`ecs`]: Scene components and the world-backed entity registry
//! - [`host`]: Behavior host and frame clock

/// Core functionality: errors, logging, macros
#[macro_use]
pub mod core;
/// Fixed-layout boundary contract
pub mod abi;
/// Native module bridging
pub mod bridge;
/// Configuration system
pub mod config;
/// Entity Component System integration
pub mod ecs;
/// Behavior host driving bridges against a world
pub mod host;

pub use crate::abi::{BoundaryStringCodec, FrameContext, HostApi, StatusCode, ABI_VERSION};
pub use crate::bridge::{
    EntityLookupCache, FrameBridge, FunctionResolver, ModulePool, Requirement,
};
pub use crate::core::{BridgeError, BridgeResult};
pub use crate::host::BehaviorHost;
