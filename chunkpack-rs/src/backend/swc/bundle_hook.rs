//! Bundle hook for `import.meta` rewriting.
//!
//! Chunks run as classic scripts, where `import.meta` is a syntax error, so
//! every `import.meta` object is replaced by a literal.

use deno_ast::swc::ast::{Bool, Expr, KeyValueProp, Lit, PropName, Str};
use deno_ast::swc::bundler::{Hook, ModuleRecord};
use deno_ast::swc::common::Span;

pub struct ChunkHook;

impl Hook for ChunkHook {
    fn get_import_meta_props(
        &self,
        span: Span,
        module_record: &ModuleRecord,
    ) -> Result<Vec<KeyValueProp>, anyhow::Error> {
        Ok(vec![
            // import.meta.url = "<module file name>"
            KeyValueProp {
                key: PropName::Ident("url".into()),
                value: Box::new(Expr::Lit(Lit::Str(Str {
                    span,
                    value: module_record.file_name.to_string().into(),
                    raw: None,
                }))),
            },
            // no module inside a browser chunk is the program entry
            KeyValueProp {
                key: PropName::Ident("main".into()),
                value: Box::new(Expr::Lit(Lit::Bool(Bool { span, value: false }))),
            },
        ])
    }
}
