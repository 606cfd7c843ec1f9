//! The native bundling backend seam.
//!
//! A backend turns one synthetic entry script into one browser-loadable
//! file. It may own an expensive resource (a child process, a worker pool),
//! so the orchestrator holds it through a [`BackendHandle`] that releases it
//! exactly once.

pub mod swc;

use log::debug;
use std::future::Future;
use std::path::PathBuf;

pub use self::swc::SwcBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Browser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Classic script wrapped in an immediately invoked function.
    Iife,
    Esm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub entry_point: PathBuf,
    pub outfile: PathBuf,
    pub platform: Platform,
    pub format: Format,
    /// Baseline language level first, then legacy browser targets.
    pub targets: Vec<String>,
    pub bundle: bool,
    pub minify: bool,
    pub tree_shaking: bool,
    pub sourcemap: bool,
}

impl BuildRequest {
    /// Request used for every client chunk.
    pub fn browser_chunk(
        entry_point: impl Into<PathBuf>,
        outfile: impl Into<PathBuf>,
        targets: Vec<String>,
        minify: bool,
    ) -> Self {
        Self {
            entry_point: entry_point.into(),
            outfile: outfile.into(),
            platform: Platform::Browser,
            format: Format::Iife,
            targets,
            bundle: true,
            minify,
            tree_shaking: true,
            sourcemap: false,
        }
    }
}

pub trait NativeBundler {
    /// Identifies the backend build; folded into chunk hashes because the same
    /// entry script can bundle differently across backend versions.
    fn version(&self) -> String;

    /// Bundles `request.entry_point` into `request.outfile`.
    fn build(&self, request: &BuildRequest) -> impl Future<Output = anyhow::Result<()>>;

    /// Releases any resource held by the backend.
    fn stop(&self);
}

/// Scoped ownership of a backend for one bundle run. `stop` runs once, either
/// through [`BackendHandle::release`] or when the handle is dropped on an
/// early return.
pub struct BackendHandle<'a, B: NativeBundler> {
    backend: &'a B,
    released: bool,
}

impl<'a, B: NativeBundler> BackendHandle<'a, B> {
    pub fn acquire(backend: &'a B) -> Self {
        Self {
            backend,
            released: false,
        }
    }

    pub fn backend(&self) -> &'a B {
        self.backend
    }

    pub fn release(mut self) {
        self.stop_once();
    }

    fn stop_once(&mut self) {
        if !self.released {
            self.released = true;
            debug!("Releasing bundling backend {}", self.backend.version());
            self.backend.stop();
        }
    }
}

impl<B: NativeBundler> Drop for BackendHandle<'_, B> {
    fn drop(&mut self) {
        self.stop_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingBackend {
        stops: Cell<usize>,
    }

    impl NativeBundler for CountingBackend {
        fn version(&self) -> String {
            "counting".to_string()
        }

        async fn build(&self, _request: &BuildRequest) -> anyhow::Result<()> {
            Ok(())
        }

        fn stop(&self) {
            self.stops.set(self.stops.get() + 1);
        }
    }

    #[test]
    fn test_release_stops_once() {
        let backend = CountingBackend::default();
        let handle = BackendHandle::acquire(&backend);
        handle.release();
        assert_eq!(backend.stops.get(), 1);
    }

    #[test]
    fn test_drop_stops_once() {
        let backend = CountingBackend::default();
        {
            let _handle = BackendHandle::acquire(&backend);
        }
        assert_eq!(backend.stops.get(), 1);
    }

    #[test]
    fn test_browser_chunk_request() {
        let request = BuildRequest::browser_chunk("a.js", "b.js", vec!["es2015".into()], true);
        assert_eq!(request.format, Format::Iife);
        assert_eq!(request.platform, Platform::Browser);
        assert!(request.bundle && request.tree_shaking && !request.sourcemap);
    }
}
