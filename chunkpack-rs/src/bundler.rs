//! Bundle orchestration.
//!
//! One [`Bundler::bundle`] run builds, strictly in order: `polyfills` (unless
//! the target is `esnext`), `deps` from remote shared entries, `shared` from
//! local shared entries, one chunk per page, and finally `main`.

use crate::backend::{BackendHandle, NativeBundler};
use crate::chunk::{BundledMap, Chunk, ChunkBuilder, DEPS_CHUNK, RESERVED_CHUNKS, SHARED_CHUNK};
use crate::compile::CompileCache;
use crate::config::BundlerConfig;
use crate::error::{BundleError, BundleResult};
use crate::fs::ensure_dir;
use crate::host::BundleHost;
use crate::module::{is_remote_url, trim_module_ext, EntryModule};
use crate::runtime::INTERNAL_PREFIX;
use futures::future::try_join_all;
use log::{debug, info};
use std::collections::HashSet;
use std::path::Path;

/// Entries split by the chunk they land in, first-seen order, no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPartition {
    pub remote_shared: Vec<String>,
    pub local_shared: Vec<String>,
    pub pages: Vec<String>,
}

impl EntryPartition {
    /// A specifier listed twice keeps the kind of its first occurrence.
    pub fn new(entries: &[EntryModule]) -> Self {
        let mut seen = HashSet::new();
        let mut partition = Self::default();
        for entry in entries {
            if !seen.insert(entry.specifier.as_str()) {
                continue;
            }
            let specifier = entry.specifier.clone();
            if !entry.shared {
                partition.pages.push(specifier);
            } else if is_remote_url(&specifier) {
                partition.remote_shared.push(specifier);
            } else {
                partition.local_shared.push(specifier);
            }
        }
        partition
    }

    /// Externals of a page chunk: every shared entry.
    pub fn page_externals(&self) -> Vec<String> {
        [self.remote_shared.as_slice(), self.local_shared.as_slice()].concat()
    }
}

pub struct Bundler<H, B> {
    host: H,
    backend: B,
    builder: ChunkBuilder,
}

impl<H: BundleHost, B: NativeBundler> Bundler<H, B> {
    pub fn new(config: BundlerConfig, host: H, backend: B) -> BundleResult<Self> {
        Ok(Self {
            host,
            backend,
            builder: ChunkBuilder::new(config)?,
        })
    }

    pub fn config(&self) -> &BundlerConfig {
        self.builder.config()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn compile_cache(&self) -> &CompileCache {
        self.builder.compile_cache()
    }

    pub fn bundled_file(&self, name: &str) -> Option<&str> {
        self.builder.bundled().get(name)
    }

    pub fn bundled_map(&self) -> BundledMap {
        self.builder.bundled().clone()
    }

    pub fn chunks(&self) -> &[Chunk] {
        self.builder.chunks()
    }

    /// Builds every chunk for `entries`. The backend is stopped once when the
    /// run ends, whether it succeeded or not.
    pub async fn bundle(&mut self, entries: &[EntryModule]) -> BundleResult<()> {
        let handle = BackendHandle::acquire(&self.backend);
        let result = build_all(&mut self.builder, &self.host, handle.backend(), entries).await;
        handle.release();
        result
    }

    /// Copies every registered bundle file into `<output_dir>/_internal/`.
    pub async fn copy_dist(&self, output_dir: impl AsRef<Path>) -> BundleResult<()> {
        let target_dir = output_dir.as_ref().join(INTERNAL_PREFIX);
        ensure_dir(&target_dir).await?;
        let build_dir = self.builder.build_dir();
        try_join_all(self.builder.bundled().iter().map(|(_, filename)| {
            let from = build_dir.join(filename);
            let to = target_dir.join(filename);
            async move {
                tokio::fs::copy(&from, &to)
                    .await
                    .map_err(|err| BundleError::io(&from, err))?;
                debug!("Copied {} to {}", from.display(), to.display());
                Ok::<_, BundleError>(())
            }
        }))
        .await?;
        Ok(())
    }
}

async fn build_all<H: BundleHost, B: NativeBundler>(
    builder: &mut ChunkBuilder,
    host: &H,
    backend: &B,
    entries: &[EntryModule],
) -> BundleResult<()> {
    let partition = EntryPartition::new(entries);
    if let Some(page) = partition
        .pages
        .iter()
        .find(|page| RESERVED_CHUNKS.contains(&trim_module_ext(page)))
    {
        return Err(BundleError::Config(format!(
            "page '{}' would replace the '{}' chunk",
            page,
            trim_module_ext(page)
        )));
    }

    if !builder.config().target.is_latest() {
        builder.build_polyfills(backend).await?;
    }

    builder
        .build_chunk(host, backend, DEPS_CHUNK, &partition.remote_shared, &[])
        .await?;

    if !partition.local_shared.is_empty() {
        builder
            .build_chunk(
                host,
                backend,
                SHARED_CHUNK,
                &partition.local_shared,
                &partition.remote_shared,
            )
            .await?;
    }

    let externals = partition.page_externals();
    for page in &partition.pages {
        builder
            .build_chunk(
                host,
                backend,
                trim_module_ext(page),
                std::slice::from_ref(page),
                &externals,
            )
            .await?;
    }

    let main = builder.create_main_js(host).await?;
    info!(
        "Bundled {} chunks, main is {}",
        builder.bundled().len(),
        main.filename
    );
    Ok(())
}
