//! Chunk construction.
//!
//! A chunk is one content-addressed script built from a synthetic entry that
//! imports each entry module and registers it into the runtime loader's
//! `pack` table. Chunks already on disk are not rebuilt.

use crate::backend::{BuildRequest, NativeBundler};
use crate::compile::CompileCache;
use crate::config::BundlerConfig;
use crate::error::{BundleError, BundleResult};
use crate::fs::{absolute_path, clear_stale_bundles, ensure_text_file, exists_file, lazy_remove};
use crate::hash::{bundle_filename, compute_hash};
use crate::host::BundleHost;
use crate::module::{chunk_file_stem, closure_fingerprint};
use crate::runtime::RUNTIME_GLOBAL;
use deno_ast::ModuleSpecifier;
use futures::future::try_join_all;
use log::{debug, info};
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};

pub const POLYFILLS_CHUNK: &str = "polyfills";
pub const DEPS_CHUNK: &str = "deps";
pub const SHARED_CHUNK: &str = "shared";
pub const MAIN_CHUNK: &str = "main";

/// Names the orchestrator builds itself; page chunks may not use them.
pub const RESERVED_CHUNKS: &[&str] = &[POLYFILLS_CHUNK, DEPS_CHUNK, SHARED_CHUNK, MAIN_CHUNK];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub name: String,
    pub entry_specifiers: Vec<String>,
    pub externals: Vec<String>,
    /// Full sha256 hex digest; the filename embeds its first 8 characters.
    pub content_hash: String,
    pub filename: String,
}

/// Chunk name to bundle filename, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundledMap {
    entries: Vec<(String, String)>,
}

impl BundledMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `filename` under `name`, returning the filename it replaced.
    pub fn insert(&mut self, name: impl Into<String>, filename: impl Into<String>) -> Option<String> {
        let name = name.into();
        let filename = filename.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, filename)),
            None => {
                self.entries.push((name, filename));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, filename)| filename.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, filename)| (name.as_str(), filename.as_str()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|(name, _)| name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// JSON object of every entry not named in `excluded`.
    pub fn to_json_excluding(&self, excluded: &[&str]) -> serde_json::Value {
        serde_json::Value::Object(
            self.iter()
                .filter(|(name, _)| !excluded.contains(name))
                .map(|(name, filename)| {
                    (
                        name.to_string(),
                        serde_json::Value::String(filename.to_string()),
                    )
                })
                .collect(),
        )
    }
}

impl Serialize for BundledMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// Builds chunks into the build directory and keeps the registry of the ones
/// that succeeded.
pub struct ChunkBuilder {
    pub(crate) config: BundlerConfig,
    pub(crate) cache: CompileCache,
    pub(crate) bundled: BundledMap,
    chunks: Vec<Chunk>,
}

impl ChunkBuilder {
    /// Relative `build_dir` and `polyfills_dir` are resolved against the
    /// current directory so entry scripts can import `file://` URLs.
    pub fn new(mut config: BundlerConfig) -> BundleResult<Self> {
        config.build_dir = absolute_path(&config.build_dir)?;
        config.polyfills_dir = absolute_path(&config.polyfills_dir)?;
        let cache = CompileCache::new(config.build_dir.clone());
        Ok(Self {
            config,
            cache,
            bundled: BundledMap::new(),
            chunks: Vec::new(),
        })
    }

    pub fn config(&self) -> &BundlerConfig {
        &self.config
    }

    pub fn build_dir(&self) -> &Path {
        &self.config.build_dir
    }

    pub fn compile_cache(&self) -> &CompileCache {
        &self.cache
    }

    pub fn bundled(&self) -> &BundledMap {
        &self.bundled
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub async fn build_chunk<H: BundleHost, B: NativeBundler>(
        &mut self,
        host: &H,
        backend: &B,
        name: &str,
        entry_specifiers: &[String],
        externals: &[String],
    ) -> BundleResult<Chunk> {
        let imports = try_join_all(entry_specifiers.iter().enumerate().map(|(index, specifier)| {
            entry_import(&self.cache, host, index, specifier, externals)
        }))
        .await?;
        let entry_code = imports.into_iter().flatten().collect::<Vec<_>>().join("\n");

        let fingerprint =
            closure_fingerprint(|specifier| host.module(specifier), entry_specifiers, externals)?;
        let backend_version = backend.version();
        let hash = compute_hash([
            entry_code.as_str(),
            crate::VERSION,
            backend_version.as_str(),
            fingerprint.as_str(),
        ]);

        let stem = chunk_file_stem(name);
        let filename = bundle_filename(&stem, &hash);
        let outfile = self.config.build_dir.join(&filename);

        if exists_file(&outfile).await {
            debug!("Chunk {} is up to date ({})", name, filename);
        } else {
            clear_stale_bundles(&self.config.build_dir, &stem, &filename).await;
            let entry_file = self
                .config
                .build_dir
                .join(format!("{stem}.bundle.entry.js"));
            ensure_text_file(&entry_file, &entry_code).await?;
            let result = self.run_backend(backend, name, &entry_file, &outfile).await;
            lazy_remove(&entry_file).await;
            result?;
            info!("Built chunk {} -> {}", name, filename);
        }

        Ok(self.register(Chunk {
            name: name.to_string(),
            entry_specifiers: entry_specifiers.to_vec(),
            externals: externals.to_vec(),
            content_hash: hash,
            filename,
        }))
    }

    /// Builds the `polyfills` chunk for the configured target.
    pub async fn build_polyfills<B: NativeBundler>(&mut self, backend: &B) -> BundleResult<Chunk> {
        let target = self.config.target.polyfill_target().ok_or_else(|| {
            BundleError::Config(format!("target {} needs no polyfills", self.config.target))
        })?;
        let backend_version = backend.version();
        let hash = compute_hash([
            target.as_str(),
            "/",
            backend_version.as_str(),
            "/",
            crate::VERSION,
        ]);
        let filename = bundle_filename(POLYFILLS_CHUNK, &hash);
        let outfile = self.config.build_dir.join(&filename);
        let entry_file = self.config.polyfills_dir.join(&target).join("mod.js");

        if exists_file(&outfile).await {
            debug!("Polyfills for {} are up to date ({})", target, filename);
        } else {
            if !exists_file(&entry_file).await {
                return Err(BundleError::build(
                    POLYFILLS_CHUNK,
                    anyhow::anyhow!("Polyfill entry {} not found", entry_file.display()),
                ));
            }
            clear_stale_bundles(&self.config.build_dir, POLYFILLS_CHUNK, &filename).await;
            self.run_backend(backend, POLYFILLS_CHUNK, &entry_file, &outfile)
                .await?;
            info!("Built polyfills for {} -> {}", target, filename);
        }

        Ok(self.register(Chunk {
            name: POLYFILLS_CHUNK.to_string(),
            entry_specifiers: vec![entry_file.to_string_lossy().into_owned()],
            externals: Vec::new(),
            content_hash: hash,
            filename,
        }))
    }

    async fn run_backend<B: NativeBundler>(
        &self,
        backend: &B,
        name: &str,
        entry_file: &Path,
        outfile: &Path,
    ) -> BundleResult<()> {
        let request = BuildRequest::browser_chunk(
            entry_file,
            outfile,
            self.config.backend_targets(),
            self.config.minify,
        );
        if let Err(cause) = backend.build(&request).await {
            lazy_remove(outfile).await;
            return Err(BundleError::build(name, cause));
        }
        Ok(())
    }

    pub(crate) fn register(&mut self, chunk: Chunk) -> Chunk {
        self.bundled.insert(chunk.name.clone(), chunk.filename.clone());
        match self.chunks.iter_mut().find(|c| c.name == chunk.name) {
            Some(existing) => *existing = chunk.clone(),
            None => self.chunks.push(chunk.clone()),
        }
        chunk
    }
}

/// Import and registration lines for entry `index`, `None` when the module
/// has no client output.
async fn entry_import<H: BundleHost>(
    cache: &CompileCache,
    host: &H,
    index: usize,
    specifier: &str,
    externals: &[String],
) -> BundleResult<Option<String>> {
    let module = host
        .module(specifier)
        .ok_or_else(|| BundleError::resolution(specifier))?;
    if !module.has_compiled_file() {
        debug!("{} has no compiled file, skipping", specifier);
        return Ok(None);
    }

    let file: PathBuf = if externals.is_empty() {
        module.compiled_path(cache.build_dir())
    } else {
        cache.compile(host, module, externals).await?
    };
    let url = ModuleSpecifier::from_file_path(&file).map_err(|_| {
        BundleError::Config(format!("{} is not an absolute path", file.display()))
    })?;

    Ok(Some(format!(
        "import * as mod_{index} from {};\n{RUNTIME_GLOBAL}.pack[{}] = mod_{index};",
        js_string(url.as_str()),
        js_string(specifier)
    )))
}

fn js_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}
