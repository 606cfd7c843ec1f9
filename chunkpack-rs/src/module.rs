//! Module graph records consumed by the bundle pipeline.
//!
//! The graph is produced upstream; this crate only reads it to decide chunk
//! membership and to walk static dependencies.

use crate::error::{BundleError, BundleResult};
use crate::hash::{compute_hash, short_hash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Module extensions stripped when a specifier names a chunk.
pub const BUILTIN_MODULE_EXTS: &[&str] = &["tsx", "jsx", "ts", "js", "mjs"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dep {
    pub specifier: String,
    #[serde(default)]
    pub is_dynamic: bool,
}

impl Dep {
    /// Static, non-`#` dependencies are pulled into a chunk's closure.
    pub fn is_bundled_with_parent(&self) -> bool {
        !self.is_dynamic && !self.specifier.starts_with('#')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub specifier: String,
    /// Compiled output relative to the build directory. Empty when the module
    /// has no client output.
    #[serde(default)]
    pub compiled_file: PathBuf,
    #[serde(default)]
    pub deps: Vec<Dep>,
    #[serde(default)]
    pub source_hash: String,
}

impl Module {
    pub fn new(specifier: impl Into<String>, compiled_file: impl Into<PathBuf>) -> Self {
        Self {
            specifier: specifier.into(),
            compiled_file: compiled_file.into(),
            deps: Vec::new(),
            source_hash: String::new(),
        }
    }

    pub fn with_dep(mut self, specifier: impl Into<String>) -> Self {
        self.deps.push(Dep {
            specifier: specifier.into(),
            is_dynamic: false,
        });
        self
    }

    pub fn with_dynamic_dep(mut self, specifier: impl Into<String>) -> Self {
        self.deps.push(Dep {
            specifier: specifier.into(),
            is_dynamic: true,
        });
        self
    }

    pub fn with_source_hash(mut self, hash: impl Into<String>) -> Self {
        self.source_hash = hash.into();
        self
    }

    pub fn has_compiled_file(&self) -> bool {
        !self.compiled_file.as_os_str().is_empty()
    }

    /// Absolute path of the upstream compiled file.
    pub fn compiled_path(&self, build_dir: &Path) -> PathBuf {
        build_dir.join(&self.compiled_file)
    }

    /// Path of the externals-aware client build of this module. The name
    /// embeds the source hash and the externals so a stale file from an
    /// earlier run is never mistaken for the current build.
    pub fn client_path(&self, build_dir: &Path, externals: &[String]) -> PathBuf {
        let compiled = self.compiled_file.to_string_lossy();
        let stem = compiled.strip_suffix(".js").unwrap_or(&compiled);
        let externals = externals.join("\n");
        let hash = compute_hash([self.source_hash.as_str(), "\n", externals.as_str()]);
        build_dir.join(format!("{stem}.client.{}.js", short_hash(&hash)))
    }
}

/// Source text returned by the host for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    pub code: String,
    pub source_type: SourceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Js,
    Jsx,
    Ts,
    Tsx,
}

impl SourceType {
    pub fn from_specifier(specifier: &str) -> Self {
        let path = specifier.split(['?', '#']).next().unwrap_or(specifier);
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("jsx") => SourceType::Jsx,
            Some("ts") | Some("mts") => SourceType::Ts,
            Some("tsx") => SourceType::Tsx,
            _ => SourceType::Js,
        }
    }
}

/// A module the application declares as a bundle entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryModule {
    pub specifier: String,
    #[serde(default)]
    pub shared: bool,
}

impl EntryModule {
    pub fn shared(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            shared: true,
        }
    }

    pub fn page(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            shared: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleGraph {
    #[serde(with = "module_list")]
    modules: HashMap<String, Module>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> BundleResult<Self> {
        serde_json::from_str(text).map_err(|err| BundleError::Config(err.to_string()))
    }

    pub fn insert(&mut self, module: Module) {
        self.modules.insert(module.specifier.clone(), module);
    }

    pub fn with(mut self, module: Module) -> Self {
        self.insert(module);
        self
    }

    pub fn get(&self, specifier: &str) -> Option<&Module> {
        self.modules.get(specifier)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Collects every module statically reachable from `roots`, stopping at
    /// `externals`.
    pub fn static_closure<'a>(
        &'a self,
        roots: &[String],
        externals: &[String],
    ) -> BundleResult<Vec<&'a Module>> {
        static_closure(|specifier| self.get(specifier), roots, externals)
    }

    pub fn fingerprint(&self, roots: &[String], externals: &[String]) -> BundleResult<String> {
        closure_fingerprint(|specifier| self.get(specifier), roots, externals)
    }
}

/// Walks static dependencies from `roots` through `lookup`, stopping at
/// `externals`. Reachable specifiers `lookup` does not know are a resolution
/// error.
pub fn static_closure<'a>(
    lookup: impl Fn(&str) -> Option<&'a Module>,
    roots: &[String],
    externals: &[String],
) -> BundleResult<Vec<&'a Module>> {
    let mut seen = HashSet::new();
    let mut stack: Vec<&str> = roots.iter().map(String::as_str).collect();
    let mut out = Vec::new();
    while let Some(specifier) = stack.pop() {
        if !seen.insert(specifier.to_string()) {
            continue;
        }
        let module = lookup(specifier).ok_or_else(|| BundleError::resolution(specifier))?;
        for dep in &module.deps {
            if dep.is_bundled_with_parent() && !externals.contains(&dep.specifier) {
                stack.push(&dep.specifier);
            }
        }
        out.push(module);
    }
    Ok(out)
}

/// Sorted `specifier@source_hash` lines for a chunk closure.
pub fn closure_fingerprint<'a>(
    lookup: impl Fn(&str) -> Option<&'a Module>,
    roots: &[String],
    externals: &[String],
) -> BundleResult<String> {
    let lines: BTreeSet<String> = static_closure(lookup, roots, externals)?
        .into_iter()
        .map(|m| format!("{}@{}", m.specifier, m.source_hash))
        .collect();
    Ok(lines.into_iter().collect::<Vec<_>>().join("\n"))
}

mod module_list {
    use super::Module;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        modules: &HashMap<String, Module>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut list: Vec<&Module> = modules.values().collect();
        list.sort_by(|a, b| a.specifier.cmp(&b.specifier));
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<String, Module>, D::Error> {
        let list = Vec::<Module>::deserialize(deserializer)?;
        Ok(list
            .into_iter()
            .map(|m| (m.specifier.clone(), m))
            .collect())
    }
}

pub fn is_remote_url(specifier: &str) -> bool {
    specifier.starts_with("https://") || specifier.starts_with("http://")
}

/// Strips a trailing builtin module extension: `/pages/x.tsx` -> `/pages/x`.
pub fn trim_module_ext(specifier: &str) -> &str {
    if let Some((stem, ext)) = specifier.rsplit_once('.') {
        if BUILTIN_MODULE_EXTS.contains(&ext) && !stem.is_empty() && !stem.ends_with('/') {
            return stem;
        }
    }
    specifier
}

/// File-name stem for a chunk name. Names made only of `[A-Za-z0-9_.-]` are
/// used as is; anything else is flattened (`./pages/home` -> `pages-home`) and
/// suffixed with a short hash of the raw name, so two names never share a stem.
pub fn chunk_file_stem(name: &str) -> String {
    let is_plain = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if is_plain {
        return name.to_string();
    }
    let readable: String = name
        .trim_start_matches("./")
        .trim_start_matches("../")
        .trim_start_matches('/')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let hash = compute_hash([name]);
    format!("{}-{}", readable, short_hash(&hash))
}
