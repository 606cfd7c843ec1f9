//! Collaborators the pipeline consumes but does not implement.
//!
//! A [`BundleHost`] owns the module graph and the source transform. The
//! pipeline only asks it questions; it never rewrites module bodies itself
//! apart from filling in star re-export names.

use crate::module::{Module, ModuleSource, SourceType};
use std::future::Future;

/// Options handed to [`BundleHost::transform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    /// Always `true` for client chunks: imports of `bundle_externals` become
    /// lookups into the runtime loader's `pack` table.
    pub bundle_mode: bool,
    pub bundle_externals: Vec<String>,
    pub source_type: SourceType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutput {
    pub code: String,
    /// Specifiers of `export * from` statements whose names are not yet known,
    /// in statement order. Position `i` matches the `$$star_{i}` placeholder.
    pub star_exports: Vec<String>,
}

pub trait BundleHost {
    /// Looks up a module record in the upstream graph.
    fn module(&self, specifier: &str) -> Option<&Module>;

    /// Loads the original source text, `None` when the module kind is not
    /// supported on the client.
    fn load_module_source(
        &self,
        specifier: &str,
    ) -> impl Future<Output = anyhow::Result<Option<ModuleSource>>>;

    fn transform(
        &self,
        specifier: &str,
        source: &str,
        options: &TransformOptions,
    ) -> impl Future<Output = anyhow::Result<TransformOutput>>;

    /// Names exported by `specifier`, `default` included.
    fn parse_module_export_names(
        &self,
        specifier: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<String>>>;

    /// The application's own bootstrap code appended to the main chunk.
    fn bootstrap_script(&self) -> String;
}
