//! Per-module compile cache for externals-aware client builds.
//!
//! A module that is reachable from several chunks is transformed once per
//! process. The first caller claims the specifier before awaiting anything;
//! every later caller, including one that reaches the module again through an
//! import cycle, gets the claimed path back without compiling.

use crate::error::{BundleError, BundleResult};
use crate::fs::{ensure_text_file, exists_file};
use crate::host::{BundleHost, TransformOptions};
use crate::module::Module;
use futures::future::{try_join_all, FutureExt, LocalBoxFuture};
use log::debug;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

lazy_static! {
    static ref STAR_CONST_RE: Regex = Regex::new(r"export const \$\$star_(\d+)\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Claimed by a caller that has not finished writing the artifact yet.
    Compiling,
    Compiled,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    output_path: PathBuf,
    state: CacheState,
}

/// A finished client build of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub specifier: String,
    pub output_path: PathBuf,
}

enum Claim {
    Cached(PathBuf),
    Owned(PathBuf),
}

pub struct CompileCache {
    build_dir: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
    transformed: AtomicUsize,
}

impl CompileCache {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            entries: Mutex::new(HashMap::new()),
            transformed: AtomicUsize::new(0),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Number of modules handed to the transform by this cache.
    pub fn compiled_count(&self) -> usize {
        self.transformed.load(Ordering::SeqCst)
    }

    pub fn state(&self, specifier: &str) -> Option<CacheState> {
        self.lock().get(specifier).map(|entry| entry.state)
    }

    pub fn artifacts(&self) -> Vec<CompiledArtifact> {
        let mut artifacts: Vec<_> = self
            .lock()
            .iter()
            .filter(|(_, entry)| entry.state == CacheState::Compiled)
            .map(|(specifier, entry)| CompiledArtifact {
                specifier: specifier.clone(),
                output_path: entry.output_path.clone(),
            })
            .collect();
        artifacts.sort_by(|a, b| a.specifier.cmp(&b.specifier));
        artifacts
    }

    /// Compiles `module` so that everything in `externals` is resolved through
    /// the runtime loader instead of being bundled, and returns the output
    /// path. Static dependencies outside `externals` are compiled as well.
    pub fn compile<'a, H: BundleHost>(
        &'a self,
        host: &'a H,
        module: &'a Module,
        externals: &'a [String],
    ) -> LocalBoxFuture<'a, BundleResult<PathBuf>> {
        async move {
            let output_path = match self.claim(module, externals) {
                Claim::Cached(path) => return Ok(path),
                Claim::Owned(path) => path,
            };
            match self
                .compile_claimed(host, module, externals, &output_path)
                .await
            {
                Ok(()) => {
                    self.mark_compiled(&module.specifier);
                    Ok(output_path)
                }
                Err(err) => {
                    self.evict(&module.specifier);
                    Err(err)
                }
            }
        }
        .boxed_local()
    }

    async fn compile_claimed<H: BundleHost>(
        &self,
        host: &H,
        module: &Module,
        externals: &[String],
        output_path: &Path,
    ) -> BundleResult<()> {
        let specifier = module.specifier.as_str();
        // A disk hit only covers this module; its dependencies have their own
        // client files and are still walked below.
        let code = if exists_file(output_path).await {
            debug!("Compile cache hit on disk for {}", specifier);
            None
        } else {
            Some(self.transform_module(host, specifier, externals).await?)
        };

        let mut deps = Vec::new();
        for dep in &module.deps {
            if !dep.is_bundled_with_parent() || externals.contains(&dep.specifier) {
                continue;
            }
            let dep_module = host
                .module(&dep.specifier)
                .ok_or_else(|| BundleError::resolution(&dep.specifier))?;
            deps.push(self.compile(host, dep_module, externals));
        }
        try_join_all(deps).await?;

        if let Some(code) = code {
            ensure_text_file(output_path, &code)
                .await
                .map_err(|err| BundleError::compile(specifier, err))?;
            debug!("Compiled {} -> {}", specifier, output_path.display());
        }
        Ok(())
    }

    /// Loads and transforms one module, star re-exports filled in.
    async fn transform_module<H: BundleHost>(
        &self,
        host: &H,
        specifier: &str,
        externals: &[String],
    ) -> BundleResult<String> {
        let source = host
            .load_module_source(specifier)
            .await
            .map_err(|err| BundleError::compile(specifier, err))?
            .ok_or_else(|| {
                BundleError::compile(
                    specifier,
                    anyhow::anyhow!("Unsupported module '{}'", specifier),
                )
            })?;

        self.transformed.fetch_add(1, Ordering::SeqCst);
        let options = TransformOptions {
            bundle_mode: true,
            bundle_externals: externals.to_vec(),
            source_type: source.source_type,
        };
        let output = host
            .transform(specifier, &source.code, &options)
            .await
            .map_err(|err| BundleError::compile(specifier, err))?;

        let mut code = output.code;
        for (index, star_specifier) in output.star_exports.iter().enumerate() {
            let names = host
                .parse_module_export_names(star_specifier)
                .await
                .map_err(|err| BundleError::compile(specifier, err))?;
            code = rewrite_star_export(&code, index, star_specifier, &names);
        }
        Ok(code)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, module: &Module, externals: &[String]) -> Claim {
        let mut entries = self.lock();
        // A `Compiling` entry hands back its path before the file is written.
        // Cyclic callers need exactly that; concurrent callers are safe because
        // every fan-out joins all compiles before the paths are read.
        if let Some(entry) = entries.get(&module.specifier) {
            if entry.state == CacheState::Compiling {
                debug!("{} is already being compiled", module.specifier);
            }
            return Claim::Cached(entry.output_path.clone());
        }
        let output_path = module.client_path(&self.build_dir, externals);
        entries.insert(
            module.specifier.clone(),
            CacheEntry {
                output_path: output_path.clone(),
                state: CacheState::Compiling,
            },
        );
        Claim::Owned(output_path)
    }

    fn mark_compiled(&self, specifier: &str) {
        if let Some(entry) = self.lock().get_mut(specifier) {
            entry.state = CacheState::Compiled;
        }
    }

    fn evict(&self, specifier: &str) {
        self.lock().remove(specifier);
    }
}

/// Fills in the export names of the star re-export at position `index`.
///
/// Two placeholder forms are rewritten, `default` is never re-exported:
/// - `export * from "[<specifier>]:<url>"` becomes `export {a,b} from "<url>"`
/// - `export const $$star_<index> = ...` becomes `export const {a,b} = ...`
pub fn rewrite_star_export(code: &str, index: usize, specifier: &str, names: &[String]) -> String {
    let names = names
        .iter()
        .filter(|name| name.as_str() != "default")
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",");
    let code = code.replace(
        &format!("export * from \"[{specifier}]:"),
        &format!("export {{{names}}} from \""),
    );
    STAR_CONST_RE
        .replace_all(&code, |caps: &Captures| {
            if caps[1].parse::<usize>().ok() == Some(index) {
                format!("export const {{{names}}}")
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}
