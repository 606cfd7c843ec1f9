//! The runtime module loader.
//!
//! [`runtime_script`] is the artifact shipped to the browser. [`ModuleLoader`]
//! carries the same resolution rules as an explicit instance so they can be
//! exercised without a DOM: the page's script injection sits behind
//! [`ScriptHost`].

use crate::chunk::BundledMap;
use crate::error::LoaderError;
use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the global loader object chunks register their exports on.
pub const RUNTIME_GLOBAL: &str = "__chunkpack";

/// URL prefix chunk files are served under, relative to the base path.
pub const INTERNAL_PREFIX: &str = "_internal";

lazy_static! {
    static ref MODULE_EXT_RE: Regex = Regex::new(r"\.[a-zA-Z0-9]+$").unwrap();
}

const RUNTIME_JS: &str = r#"(function (g) {
  var rt = g.__chunkpack;
  if (rt) {
    rt.basePath = __BASE_PATH__;
    return;
  }
  g.__chunkpack = {
    basePath: __BASE_PATH__,
    pack: {},
    bundled: {},
    import: function (s, r) {
      var a = this.pack,
        l = this.bundled,
        d = document;
      if (s in a) {
        return Promise.resolve(a[s]);
      }
      var f = l[s] || l[s.replace(/\.[a-zA-Z0-9]+$/, "")];
      if (!f) {
        return Promise.reject(new Error("invalid specifier: " + s));
      }
      var p = this.basePath.replace(/\/+$/, "") + "/_internal/" + f;
      if (r) {
        p += "?t=" + Date.now();
      }
      return new Promise(function (resolve, reject) {
        var e = d.createElement("script");
        e.onload = function () {
          resolve(a[s]);
        };
        e.onerror = reject;
        e.src = p;
        d.body.appendChild(e);
      });
    }
  };
})(window);
"#;

/// Browser loader source with `base_path` baked in. Evaluating it twice keeps
/// the tables populated by the first evaluation.
pub fn runtime_script(base_path: &str) -> String {
    let base_path = serde_json::Value::String(base_path.to_string()).to_string();
    RUNTIME_JS.replace("__BASE_PATH__", &base_path)
}

/// Public URL of a chunk file.
pub fn chunk_url(base_path: &str, filename: &str) -> String {
    format!(
        "{}/{}/{}",
        base_path.trim_end_matches('/'),
        INTERNAL_PREFIX,
        filename
    )
}

/// Result of [`ModuleLoader::import`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome<V> {
    Loaded { exports: V },
    Failed { error: LoaderError },
}

impl<V> LoadOutcome<V> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded { .. })
    }

    pub fn into_result(self) -> Result<V, LoaderError> {
        match self {
            LoadOutcome::Loaded { exports } => Ok(exports),
            LoadOutcome::Failed { error } => Err(error),
        }
    }
}

/// Injects chunk scripts into the page.
pub trait ScriptHost<V> {
    /// Loads the script at `src` and resolves once its load event fired,
    /// yielding the `(specifier, exports)` pairs the chunk put into `pack`.
    /// An `Err` carries the script error.
    fn load_script(&self, src: &str) -> impl Future<Output = Result<Vec<(String, V)>, String>>;
}

/// Explicit loader instance: `pack` holds evaluated exports, `bundled` maps a
/// specifier or chunk name to a chunk file.
///
/// Concurrent imports of the same specifier that has not loaded yet each
/// inject their own script; nothing here coalesces them.
pub struct ModuleLoader<V, S> {
    base_path: String,
    bundled: HashMap<String, String>,
    pack: RefCell<HashMap<String, V>>,
    script_host: S,
}

impl<V: Clone, S: ScriptHost<V>> ModuleLoader<V, S> {
    pub fn new(
        base_path: impl Into<String>,
        bundled: HashMap<String, String>,
        script_host: S,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            bundled,
            pack: RefCell::new(HashMap::new()),
            script_host,
        }
    }

    pub fn from_bundled_map(base_path: impl Into<String>, map: &BundledMap, script_host: S) -> Self {
        let bundled = map
            .iter()
            .map(|(name, filename)| (name.to_string(), filename.to_string()))
            .collect();
        Self::new(base_path, bundled, script_host)
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn script_host(&self) -> &S {
        &self.script_host
    }

    /// Records exports evaluated outside of [`ModuleLoader::import`], e.g. by
    /// chunks included with a plain script tag.
    pub fn register(&self, specifier: impl Into<String>, exports: V) {
        self.pack.borrow_mut().insert(specifier.into(), exports);
    }

    pub fn is_loaded(&self, specifier: &str) -> bool {
        self.pack.borrow().contains_key(specifier)
    }

    /// Chunk file owning `specifier`: exact key first, then the key with the
    /// module extension stripped.
    pub fn chunk_filename(&self, specifier: &str) -> Option<&str> {
        self.bundled
            .get(specifier)
            .or_else(|| {
                let trimmed = MODULE_EXT_RE.replace(specifier, "");
                self.bundled.get(trimmed.as_ref())
            })
            .map(String::as_str)
    }

    pub async fn import(&self, specifier: &str, force_refetch: bool) -> LoadOutcome<V> {
        if let Some(exports) = self.pack.borrow().get(specifier) {
            return LoadOutcome::Loaded {
                exports: exports.clone(),
            };
        }

        let Some(filename) = self.chunk_filename(specifier) else {
            return LoadOutcome::Failed {
                error: LoaderError::InvalidSpecifier(specifier.to_string()),
            };
        };

        let mut src = chunk_url(&self.base_path, filename);
        if force_refetch {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            src.push_str(&format!("?t={now}"));
        }

        let registered = match self.script_host.load_script(&src).await {
            Ok(registered) => registered,
            Err(message) => {
                return LoadOutcome::Failed {
                    error: LoaderError::ScriptLoad { src, message },
                }
            }
        };

        let mut pack = self.pack.borrow_mut();
        pack.extend(registered);
        match pack.get(specifier) {
            Some(exports) => LoadOutcome::Loaded {
                exports: exports.clone(),
            },
            None => LoadOutcome::Failed {
                error: LoaderError::NotRegistered {
                    specifier: specifier.to_string(),
                    filename: filename.to_string(),
                },
            },
        }
    }
}
