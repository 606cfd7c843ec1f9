//! The `main` chunk: runtime loader, the table of lazily loadable chunks and
//! the application's bootstrap code.

use crate::chunk::{BundledMap, Chunk, ChunkBuilder, MAIN_CHUNK, RESERVED_CHUNKS};
use crate::error::BundleResult;
use crate::fs::{clear_stale_bundles, ensure_text_file, exists_file};
use crate::hash::{bundle_filename, compute_hash};
use crate::host::BundleHost;
use crate::runtime::{runtime_script, RUNTIME_GLOBAL};
use log::{debug, info};

pub fn main_script(base_path: &str, bundled: &BundledMap, app_bootstrap: &str) -> String {
    format!(
        "{}{}.bundled={};{}",
        runtime_script(base_path),
        RUNTIME_GLOBAL,
        // the page loads these with script tags; `main` is skipped so a rerun
        // does not embed its own previous filename
        bundled.to_json_excluding(RESERVED_CHUNKS),
        app_bootstrap
    )
}

impl ChunkBuilder {
    /// Writes and registers `main.bundle.<hash8>.js`. Must run after every
    /// page chunk is registered.
    pub async fn create_main_js<H: BundleHost>(&mut self, host: &H) -> BundleResult<Chunk> {
        let code = main_script(
            &self.config.base_path,
            &self.bundled,
            &host.bootstrap_script(),
        );
        let hash = compute_hash([code.as_str()]);
        let filename = bundle_filename(MAIN_CHUNK, &hash);
        let path = self.config.build_dir.join(&filename);

        if exists_file(&path).await {
            debug!("Main chunk is up to date ({})", filename);
        } else {
            clear_stale_bundles(&self.config.build_dir, MAIN_CHUNK, &filename).await;
            ensure_text_file(&path, &code).await?;
            info!("Wrote main chunk {}", filename);
        }

        Ok(self.register(Chunk {
            name: MAIN_CHUNK.to_string(),
            entry_specifiers: Vec::new(),
            externals: Vec::new(),
            content_hash: hash,
            filename,
        }))
    }
}
