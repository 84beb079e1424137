//! Module loading: path resolution and recursion detection.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use ahash::AHashSet;
use tracing::debug;

use crate::ast;
use crate::runtime::error::RuntimeError;
use crate::source::SourceLocation;

/// The parser the embedder installs for `import` to consume source
/// files with. The core only defines the contract; the surface syntax
/// lives outside this crate.
pub trait SourceParser {
    fn parse(&self, source: &str, path: &Path) -> Result<ast::Block, RuntimeError>;
}

/// Resolves imported paths and detects recursive imports.
///
/// A path being compiled is held in the in-progress set until its
/// instantiation finishes; importing it again from anywhere below
/// raises an error instead of recursing forever.
#[derive(Default)]
pub struct ModuleLoader {
    parser: Option<Rc<dyn SourceParser>>,
    loading: AHashSet<PathBuf>,
}

impl ModuleLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_parser(&mut self, parser: Rc<dyn SourceParser>) {
        self.parser = Some(parser);
    }

    #[must_use]
    pub fn parser(&self) -> Option<Rc<dyn SourceParser>> {
        self.parser.clone()
    }

    /// Resolves `path` against the directory of the importing file and
    /// returns its absolute form.
    pub fn resolve(
        &self,
        sloc: &SourceLocation,
        path: &str,
    ) -> Result<PathBuf, RuntimeError> {
        let mut resolved = PathBuf::from(path);
        if resolved.is_relative() {
            if let Some(parent) = Path::new(sloc.file()).parent() {
                resolved = parent.join(resolved);
            }
        }
        resolved.canonicalize().map_err(|error| {
            RuntimeError::native(
                sloc.clone(),
                format!("could not resolve module path `{path}`: {error}"),
            )
        })
    }

    /// Marks `path` as being loaded. Fails if it is already in flight,
    /// which means the import graph has a cycle.
    pub fn lock_unique(
        &mut self,
        sloc: &SourceLocation,
        path: &Path,
    ) -> Result<(), RuntimeError> {
        if !self.loading.insert(path.to_path_buf()) {
            return Err(RuntimeError::native(
                sloc.clone(),
                format!("recursive import denied (loading `{}`)", path.display()),
            ));
        }
        debug!(path = %path.display(), "module load started");
        Ok(())
    }

    /// Releases a path locked with [`lock_unique`](Self::lock_unique).
    pub fn unlock(&mut self, path: &Path) {
        self.loading.remove(path);
        debug!(path = %path.display(), "module load finished");
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("loading", &self.loading)
            .field("has_parser", &self.parser.is_some())
            .finish()
    }
}
