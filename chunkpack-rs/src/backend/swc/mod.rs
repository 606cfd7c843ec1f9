//! In-process backend built on the SWC bundler shipped with `deno_ast`.
//!
//! Every module a chunk reaches must already be on disk: remote `http(s)`
//! imports are not fetched and fail the build.
//!
//! - `emit`: loads modules from disk and prints one bundle
//! - `bundle_hook`: replaces `import.meta`, which classic scripts cannot use

mod bundle_hook;
mod emit;

pub use emit::{bundle_file, es_version, EmitOptions};

use super::{BuildRequest, Format, NativeBundler};
use anyhow::{anyhow, bail};
use deno_ast::swc::ast::EsVersion;
use log::{debug, info};

/// Version of `deno_ast` pinned in the workspace manifest.
const DENO_AST_VERSION: &str = "0.52.0";

#[derive(Debug, Default)]
pub struct SwcBackend;

impl SwcBackend {
    pub fn new() -> Self {
        Self
    }
}

impl NativeBundler for SwcBackend {
    fn version(&self) -> String {
        format!("swc_bundler/deno_ast@{DENO_AST_VERSION}")
    }

    async fn build(&self, request: &BuildRequest) -> anyhow::Result<()> {
        if !request.bundle {
            bail!("The swc backend always bundles");
        }
        if request.sourcemap {
            debug!("Source maps are not emitted by the swc backend");
        }

        let target = request
            .targets
            .first()
            .and_then(|target| es_version(target))
            .unwrap_or(EsVersion::Es2015);
        if request.targets.len() > 1 {
            debug!(
                "Browser targets {:?} are approximated by {:?}",
                &request.targets[1..],
                target
            );
        }

        let options = EmitOptions {
            format: request.format,
            minify: request.minify,
            tree_shaking: request.tree_shaking,
            target,
        };
        let entry = request.entry_point.clone();
        let code = tokio::task::spawn_blocking(move || bundle_file(&entry, &options))
            .await
            .map_err(|err| anyhow!("Bundler task failed: {}", err))??;

        if let Some(parent) = request.outfile.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&request.outfile, code).await?;
        info!(
            "Bundled {} -> {} ({})",
            request.entry_point.display(),
            request.outfile.display(),
            match request.format {
                Format::Iife => "iife",
                Format::Esm => "esm",
            }
        );
        Ok(())
    }

    fn stop(&self) {
        // nothing outlives a build
    }
}
