// Allow uninlined format args for cleaner bail!/anyhow! macros
#![allow(clippy::uninlined_format_args)]
#![doc = include_str!("../README.md")]

pub mod backend;
pub mod bootstrap;
pub mod bundler;
pub mod chunk;
pub mod compile;
pub mod config;
pub mod error;
pub mod fs;
pub mod hash;
pub mod host;
pub mod module;
pub mod runtime;

#[macro_use]
extern crate lazy_static;

pub use anyhow;
pub use backend::{BackendHandle, BuildRequest, NativeBundler, SwcBackend};
pub use bundler::{Bundler, EntryPartition};
pub use chunk::{BundledMap, Chunk, ChunkBuilder};
pub use compile::CompileCache;
pub use config::{Browser, BuildTarget, BundlerConfig};
pub use error::{BundleError, BundleResult, LoaderError};
pub use host::{BundleHost, TransformOptions, TransformOutput};
pub use module::{EntryModule, Module, ModuleGraph, ModuleSource, SourceType};
pub use runtime::{runtime_script, LoadOutcome, ModuleLoader, ScriptHost};
pub use serde_json;

/// Framework version folded into every chunk hash.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
