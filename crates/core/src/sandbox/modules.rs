use crate::error::{Error, Result};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Loads module source from below one or more root directories.
///
/// Roots are searched in order and the first one holding the module wins.
#[derive(Debug, Clone)]
pub struct ModuleLoader {
    roots: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_roots(vec![root.into()])
    }

    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Validates a module specifier and returns it as a relative path.
    ///
    /// Absolute specifiers and specifiers that climb out of the root are
    /// rejected.
    fn relative(specifier: &str) -> Result<PathBuf> {
        let mut relative = PathBuf::new();

        for component in Path::new(specifier).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::ModuleResolution(format!(
                        "'{specifier}' escapes the module path"
                    )));
                }
            }
        }

        if relative.as_os_str().is_empty() {
            return Err(Error::ModuleResolution(format!(
                "'{specifier}' does not name a module"
            )));
        }

        Ok(relative)
    }

    /// Maps a module specifier to a candidate path under every root.
    pub fn resolve(&self, specifier: &str) -> Result<Vec<PathBuf>> {
        let relative = Self::relative(specifier)?;
        Ok(self.roots.iter().map(|root| root.join(&relative)).collect())
    }

    /// Reads the source of a module from the first root that has it.
    pub async fn load(&self, specifier: &str) -> Result<String> {
        let mut last_err = None;
        for path in self.resolve(specifier)? {
            match tokio::fs::read_to_string(&path).await {
                Ok(source) => return Ok(source),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    last_err = Some(format!("'{specifier}' ({}): {e}", path.display()));
                }
                Err(e) => {
                    return Err(Error::ModuleResolution(format!(
                        "'{specifier}' ({}): {e}",
                        path.display()
                    )));
                }
            }
        }
        Err(Error::ModuleResolution(last_err.unwrap_or_else(|| {
            format!("'{specifier}' not found: no module path configured")
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_below_root() {
        let loader = ModuleLoader::new("/srv/modules");
        assert_eq!(
            loader.resolve("lib/util.js").unwrap(),
            vec![PathBuf::from("/srv/modules/lib/util.js")]
        );
        assert_eq!(
            loader.resolve("./util.js").unwrap(),
            vec![PathBuf::from("/srv/modules/util.js")]
        );
    }

    #[test]
    fn resolves_below_every_root() {
        let loader = ModuleLoader::with_roots(vec!["/srv/a".into(), "/srv/b".into()]);
        assert_eq!(
            loader.resolve("util.js").unwrap(),
            vec![PathBuf::from("/srv/a/util.js"), PathBuf::from("/srv/b/util.js")]
        );
    }

    #[test]
    fn rejects_escapes() {
        let loader = ModuleLoader::new("/srv/modules");
        assert!(loader.resolve("../etc/passwd").is_err());
        assert!(loader.resolve("lib/../../x").is_err());
        assert!(loader.resolve("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_empty_specifier() {
        let loader = ModuleLoader::new("/srv/modules");
        assert!(loader.resolve("").is_err());
        assert!(loader.resolve(".").is_err());
    }

    #[tokio::test]
    async fn loads_module_source() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("util.js"), "module.exports = 1").unwrap();

        let loader = ModuleLoader::new(dir.path());
        assert_eq!(loader.load("util.js").await.unwrap(), "module.exports = 1");
    }

    #[tokio::test]
    async fn first_root_with_the_module_wins() {
        let first = tempfile::TempDir::new().unwrap();
        let second = tempfile::TempDir::new().unwrap();
        std::fs::write(second.path().join("util.js"), "second").unwrap();
        std::fs::write(second.path().join("both.js"), "second").unwrap();
        std::fs::write(first.path().join("both.js"), "first").unwrap();

        let loader =
            ModuleLoader::with_roots(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(loader.load("util.js").await.unwrap(), "second");
        assert_eq!(loader.load("both.js").await.unwrap(), "first");
    }

    #[tokio::test]
    async fn missing_module_is_a_resolution_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let loader = ModuleLoader::new(dir.path());
        let err = loader.load("missing.js").await.unwrap_err();
        assert!(matches!(err, Error::ModuleResolution(_)));
    }

    #[tokio::test]
    async fn loader_without_roots_finds_nothing() {
        let loader = ModuleLoader::with_roots(Vec::new());
        let err = loader.load("util.js").await.unwrap_err();
        assert!(matches!(err, Error::ModuleResolution(_)));
    }
}
