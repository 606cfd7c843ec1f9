use crate::error::{BundleError, BundleResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// JavaScript language level the bundles are emitted for.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BuildTarget {
    #[default]
    Es2015,
    Es2016,
    Es2017,
    Es2018,
    Es2019,
    Es2020,
    Es2021,
    Es2022,
    Esnext,
}

impl BuildTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildTarget::Es2015 => "es2015",
            BuildTarget::Es2016 => "es2016",
            BuildTarget::Es2017 => "es2017",
            BuildTarget::Es2018 => "es2018",
            BuildTarget::Es2019 => "es2019",
            BuildTarget::Es2020 => "es2020",
            BuildTarget::Es2021 => "es2021",
            BuildTarget::Es2022 => "es2022",
            BuildTarget::Esnext => "esnext",
        }
    }

    /// `esnext` needs no polyfills.
    pub fn is_latest(&self) -> bool {
        matches!(self, BuildTarget::Esnext)
    }

    /// Name of the polyfill set covering everything above this target,
    /// e.g. `es2016` for `es2015`.
    pub fn polyfill_target(&self) -> Option<String> {
        let year: u32 = self.as_str().strip_prefix("es")?.parse().ok()?;
        Some(format!("es{}", year + 1))
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildTarget {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "es2015" => BuildTarget::Es2015,
            "es2016" => BuildTarget::Es2016,
            "es2017" => BuildTarget::Es2017,
            "es2018" => BuildTarget::Es2018,
            "es2019" => BuildTarget::Es2019,
            "es2020" => BuildTarget::Es2020,
            "es2021" => BuildTarget::Es2021,
            "es2022" => BuildTarget::Es2022,
            "esnext" => BuildTarget::Esnext,
            _ => return Err(BundleError::Config(format!("unsupported build target: {s}"))),
        })
    }
}

/// Legacy browsers that can be added as extra backend targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chrome,
    Edge,
    Firefox,
    Ios,
    Safari,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Edge => "edge",
            Browser::Firefox => "firefox",
            Browser::Ios => "ios",
            Browser::Safari => "safari",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct BundlerConfig {
    /// Directory holding compiled modules and bundle files.
    pub build_dir: PathBuf,
    /// Public base path the runtime loader prefixes to chunk URLs.
    pub base_path: String,
    pub target: BuildTarget,
    /// Minimum browser versions, e.g. `{"chrome": "70"}`.
    pub browsers: BTreeMap<Browser, String>,
    /// Root of `<target>/mod.js` polyfill entry modules.
    pub polyfills_dir: PathBuf,
    pub minify: bool,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from(".chunkpack"),
            base_path: "/".to_string(),
            target: BuildTarget::default(),
            browsers: BTreeMap::new(),
            polyfills_dir: PathBuf::from("polyfills"),
            minify: true,
        }
    }
}

impl BundlerConfig {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            ..Default::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> BundleResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| BundleError::io(path, err))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> BundleResult<Self> {
        serde_json::from_str(text).map_err(|err| BundleError::Config(err.to_string()))
    }

    /// Target list handed to the backend: the baseline language level
    /// followed by one entry per configured browser.
    pub fn backend_targets(&self) -> Vec<String> {
        std::iter::once(self.target.to_string())
            .chain(
                self.browsers
                    .iter()
                    .map(|(browser, version)| format!("{}{}", browser.as_str(), version)),
            )
            .collect()
    }
}
