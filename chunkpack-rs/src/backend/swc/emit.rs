//! Core bundling logic using the SWC bundler.
//!
//! Modules are read straight from disk: chunk entry scripts import compiled
//! files through `file://` URLs, and those files import each other relatively.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, bail};
use deno_ast::swc::ast::EsVersion;
use deno_ast::swc::bundler::{Bundler, Config as BundlerConfig, Load, ModuleData, Resolve};
use deno_ast::swc::codegen::text_writer::JsWriter;
use deno_ast::swc::codegen::{Config as CodegenConfig, Emitter};
use deno_ast::swc::common::comments::SingleThreadedComments;
use deno_ast::swc::common::sync::Lrc;
use deno_ast::swc::common::{FileName, Globals, SourceMap, GLOBALS};
use deno_ast::swc::loader::resolve::Resolution;
use deno_ast::swc::parser::lexer::Lexer;
use deno_ast::swc::parser::{Parser, StringInput, Syntax};
use deno_ast::{MediaType, ModuleSpecifier};

use super::bundle_hook::ChunkHook;
use crate::backend::Format;

#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub format: Format,
    pub minify: bool,
    pub tree_shaking: bool,
    pub target: EsVersion,
}

impl From<Format> for deno_ast::swc::bundler::ModuleType {
    fn from(format: Format) -> Self {
        match format {
            Format::Iife => deno_ast::swc::bundler::ModuleType::Iife,
            Format::Esm => deno_ast::swc::bundler::ModuleType::Es,
        }
    }
}

/// Maps the baseline target string (`es2015` .. `esnext`) to an SWC language
/// level. Browser targets are not understood by SWC's emitter.
pub fn es_version(target: &str) -> Option<EsVersion> {
    Some(match target {
        "es5" => EsVersion::Es5,
        "es2015" => EsVersion::Es2015,
        "es2016" => EsVersion::Es2016,
        "es2017" => EsVersion::Es2017,
        "es2018" => EsVersion::Es2018,
        "es2019" => EsVersion::Es2019,
        "es2020" => EsVersion::Es2020,
        "es2021" => EsVersion::Es2021,
        "es2022" => EsVersion::Es2022,
        "esnext" => EsVersion::EsNext,
        _ => return None,
    })
}

/// Bundles `entry` and everything it imports into a single script.
pub fn bundle_file(entry: &Path, options: &EmitOptions) -> Result<String, anyhow::Error> {
    let entry_specifier = ModuleSpecifier::from_file_path(entry)
        .map_err(|_| anyhow!("Entry point is not an absolute path: {}", entry.display()))?;

    let globals = Globals::new();

    GLOBALS.set(&globals, || {
        let source_map = Lrc::new(SourceMap::default());

        let loader = FsBundleLoader {
            source_map: source_map.clone(),
        };

        // Externals were already rewritten into runtime loader lookups by the
        // compile step, so nothing is left external here.
        let config = BundlerConfig {
            module: options.format.into(),
            external_modules: vec![],
            disable_dce: !options.tree_shaking,
            ..Default::default()
        };

        let mut bundler = Bundler::new(
            &globals,
            source_map.clone(),
            loader,
            FsBundleResolver,
            config,
            Box::new(ChunkHook),
        );

        let mut entries = HashMap::new();
        entries.insert("bundle".to_string(), FileName::Url(entry_specifier));

        let bundles = bundler.bundle(entries)?;
        if bundles.is_empty() {
            bail!("Bundler produced no output");
        }

        let mut buf = Vec::new();
        {
            let cfg = CodegenConfig::default()
                .with_minify(options.minify)
                .with_target(options.target)
                .with_omit_last_semi(false);

            let mut emitter = Emitter {
                cfg,
                cm: source_map.clone(),
                comments: None,
                wr: Box::new(JsWriter::new(source_map.clone(), "\n", &mut buf, None)),
            };

            emitter.emit_module(&bundles[0].module)?;
        }

        Ok(String::from_utf8(buf)?)
    })
}

/// Loads `file://` modules from disk.
struct FsBundleLoader {
    source_map: Lrc<SourceMap>,
}

impl Load for FsBundleLoader {
    fn load(&self, file: &FileName) -> Result<ModuleData, anyhow::Error> {
        let specifier = match file {
            FileName::Url(url) => url,
            _ => bail!("Unsupported file name: {:?}", file),
        };
        if specifier.scheme() != "file" {
            bail!(
                "Module {} must be fetched into the build directory before bundling",
                specifier
            );
        }
        let path = specifier
            .to_file_path()
            .map_err(|_| anyhow!("Invalid file URL: {}", specifier))?;
        let source = std::fs::read_to_string(&path)
            .map_err(|err| anyhow!("Failed to read {}: {}", path.display(), err))?;

        let (fm, module) = parse_module(specifier, &source, &self.source_map)?;
        Ok(ModuleData {
            fm,
            module,
            helpers: Default::default(),
        })
    }
}

/// Resolves imports as URLs relative to the importing module.
struct FsBundleResolver;

impl Resolve for FsBundleResolver {
    fn resolve(
        &self,
        base: &FileName,
        module_specifier: &str,
    ) -> Result<Resolution, anyhow::Error> {
        let base_specifier = match base {
            FileName::Url(url) => url,
            _ => bail!("Unsupported base file name: {:?}", base),
        };

        let resolved = base_specifier.join(module_specifier).map_err(|err| {
            anyhow!(
                "Failed to resolve '{}' from '{}': {}",
                module_specifier,
                base_specifier,
                err
            )
        })?;

        Ok(Resolution {
            filename: FileName::Url(resolved),
            slug: None,
        })
    }
}

fn parse_module(
    specifier: &ModuleSpecifier,
    source: &str,
    source_map: &Lrc<SourceMap>,
) -> Result<
    (
        Rc<deno_ast::swc::common::SourceFile>,
        deno_ast::swc::ast::Module,
    ),
    anyhow::Error,
> {
    let source = source.strip_prefix('\u{FEFF}').unwrap_or(source);
    let media_type = MediaType::from_specifier(specifier);

    // JSON modules become a default export
    let source = if media_type == MediaType::Json {
        format!("export default JSON.parse({})", serde_json::to_string(source)?)
    } else {
        source.to_string()
    };

    let source_file =
        source_map.new_source_file(FileName::Url(specifier.clone()).into(), source.clone());

    let syntax = match media_type {
        MediaType::Jsx => Syntax::Es(deno_ast::swc::parser::EsSyntax {
            jsx: true,
            ..Default::default()
        }),
        _ => Syntax::Es(deno_ast::swc::parser::EsSyntax::default()),
    };

    let comments = SingleThreadedComments::default();
    let input = StringInput::from(&*source_file);
    let lexer = Lexer::new(syntax, EsVersion::EsNext, input, Some(&comments));
    let mut parser = Parser::new_from(lexer);

    let module = parser
        .parse_module()
        .map_err(|e| anyhow!("Parse error in {}: {:?}", specifier, e))?;

    Ok((Rc::new((*source_file).clone()), module))
}
