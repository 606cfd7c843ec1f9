use chunkpack_rs::backend::BuildRequest;
use chunkpack_rs::module::chunk_file_stem;
use chunkpack_rs::{
    BuildTarget, BundleError, BundleHost, Bundler, BundlerConfig, EntryModule, LoadOutcome,
    Module, ModuleGraph, ModuleLoader, ModuleSource, NativeBundler, ScriptHost, SourceType,
    TransformOptions, TransformOutput,
};
use rstest::rstest;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const REACT: &str = "https://esm.sh/react";
const BUTTON: &str = "./ui/button.ts";
const HOME: &str = "./pages/home.ts";
const ABOUT: &str = "./pages/about.ts";
const UTIL: &str = "./pages/util.ts";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Module host backed by an in-memory graph. Every transform call is recorded.
struct FakeHost {
    graph: ModuleGraph,
    sources: HashMap<String, String>,
    stars: HashMap<String, Vec<String>>,
    exports: HashMap<String, Vec<String>>,
    transforms: RefCell<Vec<(String, Vec<String>)>>,
}

impl FakeHost {
    fn new(graph: ModuleGraph) -> Self {
        Self {
            graph,
            sources: HashMap::new(),
            stars: HashMap::new(),
            exports: HashMap::new(),
            transforms: RefCell::new(Vec::new()),
        }
    }

    fn with_source(mut self, specifier: &str, code: &str, stars: &[&str]) -> Self {
        self.sources.insert(specifier.to_string(), code.to_string());
        self.stars.insert(
            specifier.to_string(),
            stars.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    fn with_exports(mut self, specifier: &str, names: &[&str]) -> Self {
        self.exports.insert(
            specifier.to_string(),
            names.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    fn transformed(&self) -> Vec<String> {
        self.transforms
            .borrow()
            .iter()
            .map(|(specifier, _)| specifier.clone())
            .collect()
    }

    fn externals_for(&self, specifier: &str) -> Option<Vec<String>> {
        self.transforms
            .borrow()
            .iter()
            .find(|(s, _)| s == specifier)
            .map(|(_, externals)| externals.clone())
    }
}

impl BundleHost for FakeHost {
    fn module(&self, specifier: &str) -> Option<&Module> {
        self.graph.get(specifier)
    }

    async fn load_module_source(&self, specifier: &str) -> anyhow::Result<Option<ModuleSource>> {
        if self.graph.get(specifier).is_none() {
            return Ok(None);
        }
        let code = self
            .sources
            .get(specifier)
            .cloned()
            .unwrap_or_else(|| format!("export default {:?};\n", specifier));
        Ok(Some(ModuleSource {
            code,
            source_type: SourceType::from_specifier(specifier),
        }))
    }

    async fn transform(
        &self,
        specifier: &str,
        source: &str,
        options: &TransformOptions,
    ) -> anyhow::Result<TransformOutput> {
        assert!(options.bundle_mode);
        self.transforms
            .borrow_mut()
            .push((specifier.to_string(), options.bundle_externals.clone()));
        Ok(TransformOutput {
            code: source.to_string(),
            star_exports: self.stars.get(specifier).cloned().unwrap_or_default(),
        })
    }

    async fn parse_module_export_names(&self, specifier: &str) -> anyhow::Result<Vec<String>> {
        self.exports
            .get(specifier)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no exports known for {}", specifier))
    }

    fn bootstrap_script(&self) -> String {
        "window.__app_booted = true;".to_string()
    }
}

/// Backend that writes the entry script through unchanged and records every
/// request together with the entry script it saw.
#[derive(Default)]
struct RecordingBackend {
    builds: RefCell<Vec<(BuildRequest, String)>>,
    stops: Cell<usize>,
    fail_on: Option<String>,
}

impl RecordingBackend {
    fn failing_on(stem: &str) -> Self {
        Self {
            fail_on: Some(stem.to_string()),
            ..Default::default()
        }
    }

    fn built_stems(&self) -> Vec<String> {
        self.builds
            .borrow()
            .iter()
            .map(|(request, _)| stem_of(&request.outfile))
            .collect()
    }

    fn entry_script(&self, stem: &str) -> String {
        self.builds
            .borrow()
            .iter()
            .find(|(request, _)| stem_of(&request.outfile) == stem)
            .map(|(_, entry)| entry.clone())
            .unwrap_or_else(|| panic!("no build recorded for {}", stem))
    }
}

impl NativeBundler for RecordingBackend {
    fn version(&self) -> String {
        "recording-1".to_string()
    }

    async fn build(&self, request: &BuildRequest) -> anyhow::Result<()> {
        let entry = std::fs::read_to_string(&request.entry_point)?;
        self.builds.borrow_mut().push((request.clone(), entry.clone()));
        if self.fail_on.as_deref() == Some(stem_of(&request.outfile).as_str()) {
            std::fs::write(&request.outfile, "partial")?;
            anyhow::bail!("backend exploded");
        }
        std::fs::write(&request.outfile, format!("(function(){{\n{entry}\n}})();"))?;
        Ok(())
    }

    fn stop(&self) {
        self.stops.set(self.stops.get() + 1);
    }
}

fn home_stem() -> String {
    chunk_file_stem("./pages/home")
}

fn stems(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| chunk_file_stem(name)).collect()
}

fn stem_of(path: &Path) -> String {
    let name = path.file_name().unwrap().to_str().unwrap();
    name.split(".bundle.").next().unwrap().to_string()
}

fn app_graph(util_hash: &str) -> ModuleGraph {
    ModuleGraph::new()
        .with(Module::new(REACT, "-/esm.sh/react.js").with_source_hash("r1"))
        .with(
            Module::new(BUTTON, "ui/button.js")
                .with_dep(REACT)
                .with_source_hash("b1"),
        )
        .with(
            Module::new(HOME, "pages/home.js")
                .with_dep(REACT)
                .with_dep(BUTTON)
                .with_dep(UTIL)
                .with_dynamic_dep(ABOUT)
                .with_source_hash("h1"),
        )
        .with(
            Module::new(ABOUT, "pages/about.js")
                .with_dep(UTIL)
                .with_source_hash("a1"),
        )
        .with(Module::new(UTIL, "pages/util.js").with_source_hash(util_hash))
}

fn app_entries() -> Vec<EntryModule> {
    vec![
        EntryModule::shared(REACT),
        EntryModule::shared(BUTTON),
        EntryModule::page(HOME),
    ]
}

fn config(dir: &Path, target: BuildTarget) -> BundlerConfig {
    let mut config = BundlerConfig::new(dir.join("build"));
    config.target = target;
    config.polyfills_dir = dir.join("polyfills");
    config
}

fn bundler(
    dir: &Path,
    host: FakeHost,
    backend: RecordingBackend,
) -> Bundler<FakeHost, RecordingBackend> {
    Bundler::new(config(dir, BuildTarget::Esnext), host, backend).unwrap()
}

fn build_file(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join("build").join(name)
}

#[tokio::test]
async fn test_end_to_end_chunks() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut bundler = bundler(dir.path(), FakeHost::new(app_graph("u1")), RecordingBackend::default());

    bundler.bundle(&app_entries()).await.unwrap();

    let bundled = bundler.bundled_map();
    assert_eq!(bundled.names(), vec!["deps", "shared", "./pages/home", "main"]);
    for (name, filename) in bundled.iter() {
        assert!(build_file(&dir, filename).exists(), "{} missing", name);
    }
    let page_file = bundler.bundled_file("./pages/home").unwrap();
    assert!(page_file.starts_with(&format!("{}.bundle.", home_stem())));

    let backend = bundler.backend();
    assert_eq!(backend.built_stems(), stems(&["deps", "shared", "./pages/home"]));
    assert_eq!(backend.stops.get(), 1);

    // deps imports compiled files directly
    let deps_entry = backend.entry_script("deps");
    assert!(deps_entry.contains("import * as mod_0 from \"file://"));
    assert!(deps_entry.contains("-/esm.sh/react.js\""));
    assert!(deps_entry.contains(&format!("__chunkpack.pack[\"{REACT}\"] = mod_0;")));

    // shared treats remote shared entries as externals
    let shared_entry = backend.entry_script("shared");
    assert!(shared_entry.contains("ui/button.client."));
    assert!(shared_entry.contains(&format!("__chunkpack.pack[\"{BUTTON}\"] = mod_0;")));
    let host = bundler.host();
    assert_eq!(host.externals_for(BUTTON), Some(vec![REACT.to_string()]));

    // pages treat every shared entry as external, static deps are compiled
    // with the same externals, dynamic deps are left out
    let page_externals = vec![REACT.to_string(), BUTTON.to_string()];
    assert_eq!(host.externals_for(HOME), Some(page_externals.clone()));
    assert_eq!(host.externals_for(UTIL), Some(page_externals));
    assert_eq!(host.externals_for(ABOUT), None);
    assert_eq!(host.externals_for(REACT), None);

    let main_file = bundler.bundled_file("main").unwrap();
    let main = std::fs::read_to_string(build_file(&dir, main_file)).unwrap();
    assert!(main.contains(&format!("__chunkpack.bundled={{\"./pages/home\":\"{page_file}\"}};")));
    assert!(main.ends_with("window.__app_booted = true;"));
    assert!(!main.contains("\"deps\""));

    // temporary entry scripts are gone
    assert!(!build_file(&dir, "deps.bundle.entry.js").exists());
    assert!(!build_file(&dir, &format!("{}.bundle.entry.js", home_stem())).exists());
}

#[tokio::test]
async fn test_rebuild_is_a_cache_hit() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();

    let mut first = bundler(dir.path(), FakeHost::new(app_graph("u1")), RecordingBackend::default());
    first.bundle(&app_entries()).await.unwrap();
    let first_map = first.bundled_map();

    let mut second = bundler(dir.path(), FakeHost::new(app_graph("u1")), RecordingBackend::default());
    second.bundle(&app_entries()).await.unwrap();

    assert_eq!(second.bundled_map(), first_map);
    assert!(second.backend().builds.borrow().is_empty());
    assert!(second.host().transformed().is_empty());
    assert_eq!(second.backend().stops.get(), 1);
}

#[tokio::test]
async fn test_content_change_renames_only_affected_chunk() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();

    let mut first = bundler(dir.path(), FakeHost::new(app_graph("u1")), RecordingBackend::default());
    first.bundle(&app_entries()).await.unwrap();

    let mut second = bundler(dir.path(), FakeHost::new(app_graph("u2")), RecordingBackend::default());
    second.bundle(&app_entries()).await.unwrap();

    for name in ["deps", "shared"] {
        assert_eq!(first.bundled_file(name), second.bundled_file(name));
    }
    assert_ne!(
        first.bundled_file("./pages/home"),
        second.bundled_file("./pages/home")
    );
    assert_ne!(first.bundled_file("main"), second.bundled_file("main"));
    assert_eq!(second.backend().built_stems(), stems(&["./pages/home"]));

    // the previous build of the page chunk was cleared
    let old_page = first.bundled_file("./pages/home").unwrap();
    assert!(!build_file(&dir, old_page).exists());
}

#[tokio::test]
async fn test_changed_dependency_is_recompiled() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();

    let mut first = bundler(dir.path(), FakeHost::new(app_graph("u1")), RecordingBackend::default());
    first.bundle(&app_entries()).await.unwrap();

    let mut second = bundler(dir.path(), FakeHost::new(app_graph("u2")), RecordingBackend::default());
    second.bundle(&app_entries()).await.unwrap();

    // the page module itself is unchanged and reused from disk
    assert_eq!(second.host().transformed(), vec![UTIL]);

    let util_output = |bundler: &Bundler<FakeHost, RecordingBackend>| {
        bundler
            .compile_cache()
            .artifacts()
            .into_iter()
            .find(|artifact| artifact.specifier == UTIL)
            .map(|artifact| artifact.output_path)
            .unwrap()
    };
    let old_util = util_output(&first);
    let new_util = util_output(&second);
    assert_ne!(old_util, new_util);
    assert!(new_util.exists());
}

#[tokio::test]
async fn test_similar_page_names_keep_their_chunks() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let graph = ModuleGraph::new()
        .with(Module::new("./pages/a-b.ts", "pages/a-b.js"))
        .with(Module::new("./pages/a/b.ts", "pages/a/b.js"))
        .with(Module::new("./deps.ts", "deps.js"));
    let mut bundler = bundler(dir.path(), FakeHost::new(graph), RecordingBackend::default());

    bundler
        .bundle(&[
            EntryModule::page("./pages/a-b.ts"),
            EntryModule::page("./pages/a/b.ts"),
            EntryModule::page("./deps.ts"),
        ])
        .await
        .unwrap();

    let bundled = bundler.bundled_map();
    assert_eq!(
        bundled.names(),
        vec!["deps", "./pages/a-b", "./pages/a/b", "./deps", "main"]
    );
    for (name, filename) in bundled.iter() {
        assert!(build_file(&dir, filename).exists(), "{} -> {} missing", name, filename);
    }
    assert_ne!(bundled.get("./pages/a-b"), bundled.get("./pages/a/b"));
    assert_ne!(bundled.get("./deps"), bundled.get("deps"));
}

#[tokio::test]
async fn test_page_named_like_builtin_chunk_is_rejected() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let graph = ModuleGraph::new().with(Module::new("main.ts", "main.js"));
    let mut bundler = bundler(dir.path(), FakeHost::new(graph), RecordingBackend::default());

    let err = bundler
        .bundle(&[EntryModule::page("main.ts")])
        .await
        .unwrap_err();
    assert!(matches!(err, BundleError::Config(_)));
    assert!(bundler.backend().builds.borrow().is_empty());
    assert_eq!(bundler.backend().stops.get(), 1);
}

#[tokio::test]
async fn test_concurrent_entries_share_one_compile() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    const CARD: &str = "./ui/card.ts";
    const THEME: &str = "./ui/theme.ts";
    let graph = ModuleGraph::new()
        .with(Module::new(REACT, "-/esm.sh/react.js"))
        .with(Module::new(BUTTON, "ui/button.js").with_dep(THEME).with_dep(REACT))
        .with(Module::new(CARD, "ui/card.js").with_dep(THEME).with_dep(REACT))
        .with(Module::new(THEME, "ui/theme.js").with_source_hash("t1"));
    let mut bundler = bundler(dir.path(), FakeHost::new(graph), RecordingBackend::default());

    bundler
        .bundle(&[
            EntryModule::shared(REACT),
            EntryModule::shared(BUTTON),
            EntryModule::shared(CARD),
        ])
        .await
        .unwrap();

    let transformed = bundler.host().transformed();
    assert_eq!(transformed.iter().filter(|s| s.as_str() == THEME).count(), 1);
    assert_eq!(bundler.compile_cache().compiled_count(), 3);

    let theme = bundler.host().module(THEME).unwrap();
    let expected = theme.client_path(bundler.config().build_dir.as_path(), &[REACT.to_string()]);
    let artifact = bundler
        .compile_cache()
        .artifacts()
        .into_iter()
        .find(|artifact| artifact.specifier == THEME)
        .unwrap();
    assert_eq!(artifact.output_path, expected);
    assert!(expected.exists());
}

#[tokio::test]
async fn test_shared_module_compiled_once() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut bundler = bundler(dir.path(), FakeHost::new(app_graph("u1")), RecordingBackend::default());

    let mut entries = app_entries();
    entries.push(EntryModule::page(ABOUT));
    bundler.bundle(&entries).await.unwrap();

    let transformed = bundler.host().transformed();
    let util_count = transformed.iter().filter(|s| s.as_str() == UTIL).count();
    assert_eq!(util_count, 1);
    assert_eq!(bundler.compile_cache().compiled_count(), transformed.len());
    assert_eq!(
        bundler.backend().built_stems(),
        stems(&["deps", "shared", "./pages/home", "./pages/about"])
    );
}

#[tokio::test]
async fn test_failed_chunk_is_not_registered() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut bundler = bundler(
        dir.path(),
        FakeHost::new(app_graph("u1")),
        RecordingBackend::failing_on(&home_stem()),
    );

    let err = bundler.bundle(&app_entries()).await.unwrap_err();
    assert!(matches!(err, BundleError::Build { ref chunk, .. } if chunk == "./pages/home"));

    let bundled = bundler.bundled_map();
    assert_eq!(bundled.names(), vec!["deps", "shared"]);
    assert_eq!(bundler.backend().stops.get(), 1);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("build"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.starts_with(&format!("{}.", home_stem())))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}

#[tokio::test]
async fn test_unknown_entry_is_a_resolution_error() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut bundler = bundler(dir.path(), FakeHost::new(app_graph("u1")), RecordingBackend::default());

    let err = bundler
        .bundle(&[EntryModule::page("./pages/missing.ts")])
        .await
        .unwrap_err();
    assert!(
        matches!(err, BundleError::Resolution { ref specifier } if specifier == "./pages/missing.ts")
    );
    assert_eq!(bundler.backend().stops.get(), 1);
    assert!(bundler.bundled_file("main").is_none());
}

#[rstest]
#[case::es2015(BuildTarget::Es2015, Some("es2016"))]
#[case::es2020(BuildTarget::Es2020, Some("es2021"))]
#[case::esnext(BuildTarget::Esnext, None)]
#[tokio::test]
async fn test_polyfills_chunk(#[case] target: BuildTarget, #[case] polyfill_target: Option<&str>) {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    if let Some(polyfill_target) = polyfill_target {
        let entry_dir = dir.path().join("polyfills").join(polyfill_target);
        std::fs::create_dir_all(&entry_dir).unwrap();
        std::fs::write(entry_dir.join("mod.js"), "globalThis.__polyfilled = true;").unwrap();
    }

    let mut bundler = Bundler::new(
        config(dir.path(), target),
        FakeHost::new(app_graph("u1")),
        RecordingBackend::default(),
    )
    .unwrap();
    bundler.bundle(&app_entries()).await.unwrap();

    let stems = bundler.backend().built_stems();
    match polyfill_target {
        Some(polyfill_target) => {
            assert_eq!(stems[0], "polyfills");
            assert_eq!(bundler.bundled_map().names()[0], "polyfills");
            let builds = bundler.backend().builds.borrow();
            let entry = &builds[0].0.entry_point;
            assert!(entry.ends_with(Path::new(polyfill_target).join("mod.js")));
            assert_eq!(builds[0].0.targets[0], target.to_string());
        }
        None => {
            assert!(!stems.contains(&"polyfills".to_string()));
            assert!(bundler.bundled_file("polyfills").is_none());
        }
    }
}

#[tokio::test]
async fn test_star_exports_are_expanded() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new(app_graph("u1"))
        .with_source(
            BUTTON,
            "export const $$star_0 = __chunkpack.pack[\"https://esm.sh/react\"];\n",
            &[REACT],
        )
        .with_exports(REACT, &["useState", "createElement", "default"]);
    let mut bundler = bundler(dir.path(), host, RecordingBackend::default());

    bundler.bundle(&app_entries()).await.unwrap();

    let artifact = bundler
        .compile_cache()
        .artifacts()
        .into_iter()
        .find(|artifact| artifact.specifier == BUTTON)
        .unwrap();
    let code = std::fs::read_to_string(artifact.output_path).unwrap();
    assert_eq!(
        code,
        "export const {useState,createElement} = __chunkpack.pack[\"https://esm.sh/react\"];\n"
    );
}

#[tokio::test]
async fn test_import_cycle_terminates() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let graph = ModuleGraph::new()
        .with(Module::new(REACT, "-/esm.sh/react.js"))
        .with(Module::new("./a.ts", "a.js").with_dep("./b.ts").with_dep(REACT))
        .with(Module::new("./b.ts", "b.js").with_dep("./a.ts"));
    let mut bundler = bundler(dir.path(), FakeHost::new(graph), RecordingBackend::default());

    bundler
        .bundle(&[EntryModule::shared(REACT), EntryModule::page("./a.ts")])
        .await
        .unwrap();

    let mut transformed = bundler.host().transformed();
    transformed.sort();
    assert_eq!(transformed, vec!["./a.ts", "./b.ts"]);
    assert!(bundler.bundled_file("./a").is_some());
}

#[tokio::test]
async fn test_copy_dist() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut bundler = bundler(dir.path(), FakeHost::new(app_graph("u1")), RecordingBackend::default());
    bundler.bundle(&app_entries()).await.unwrap();

    let out = dir.path().join("dist");
    bundler.copy_dist(&out).await.unwrap();

    for (_, filename) in bundler.bundled_map().iter() {
        let copied = out.join("_internal").join(filename);
        assert_eq!(
            std::fs::read(&copied).unwrap(),
            std::fs::read(build_file(&dir, filename)).unwrap()
        );
    }
}

/// Script host that evaluates nothing and reports the registrations a chunk
/// would perform, keyed by chunk file.
struct StaticScripts(HashMap<String, Vec<(String, String)>>);

impl ScriptHost<String> for StaticScripts {
    async fn load_script(&self, src: &str) -> Result<Vec<(String, String)>, String> {
        let file = src.rsplit('/').next().unwrap_or(src);
        self.0.get(file).cloned().ok_or_else(|| format!("404 {src}"))
    }
}

#[tokio::test]
async fn test_runtime_loader_resolves_bundled_pages() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut bundler = bundler(dir.path(), FakeHost::new(app_graph("u1")), RecordingBackend::default());
    bundler.bundle(&app_entries()).await.unwrap();

    let page_file = bundler.bundled_file("./pages/home").unwrap().to_string();
    let scripts = StaticScripts(HashMap::from([(
        page_file,
        vec![(HOME.to_string(), "home exports".to_string())],
    )]));
    let loader = ModuleLoader::from_bundled_map("/", &bundler.bundled_map(), scripts);

    assert_eq!(
        loader.import(HOME, false).await,
        LoadOutcome::Loaded {
            exports: "home exports".to_string()
        }
    );
    assert!(!loader.import("./pages/nope.ts", false).await.is_loaded());
}
