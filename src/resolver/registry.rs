//! Filesystem-backed script registry keyed by language title.

use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// File extension of registry scripts.
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Directory of `<title>.rhai` scripts. Read-only and shared by all requests.
#[derive(Debug, Clone)]
pub struct ScriptRegistry {
    root: PathBuf,
}

impl ScriptRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path for `title`, or `None` if the title could escape the registry.
    pub fn path_for(&self, title: &str) -> Option<PathBuf> {
        let valid = !title.is_empty()
            && title != "."
            && title != ".."
            && !title.contains(['/', '\\', '\0'])
            && !title.starts_with('.');
        valid.then(|| self.root.join(format!("{title}.{SCRIPT_EXTENSION}")))
    }

    /// Load the script registered under `title`.
    ///
    /// A missing file (or an unusable title) is `Ok(None)`; other I/O
    /// failures are errors.
    pub async fn load(&self, title: &str) -> Result<Option<String>> {
        let Some(path) = self.path_for(title) else {
            warn!(title = %title, "Rejected invalid language title");
            return Ok(None);
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(body) => {
                debug!(title = %title, path = %path.display(), "Loaded registry script");
                Ok(Some(body))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(title = %title, path = %path.display(), "No registry script");
                Ok(None)
            }
            Err(source) => Err(Error::Registry {
                title: title.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_existing_script() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("python.rhai"), "result = 1;").unwrap();
        let registry = ScriptRegistry::new(dir.path());

        let body = tokio_test::block_on(registry.load("python")).unwrap();
        assert_eq!(body.as_deref(), Some("result = 1;"));
    }

    #[test]
    fn missing_script_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ScriptRegistry::new(dir.path());
        assert!(tokio_test::block_on(registry.load("missing_lang"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_registry_dir_is_none() {
        let registry = ScriptRegistry::new("/nonexistent/scripts");
        assert!(tokio_test::block_on(registry.load("default"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn traversal_titles_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("scripts");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(dir.path().join("secret.rhai"), "result = 1;").unwrap();
        let registry = ScriptRegistry::new(&inner);

        for title in ["../secret", "..", "", "a/b", ".hidden", "nul\0"] {
            assert!(registry.path_for(title).is_none(), "{title:?} should be rejected");
            assert!(tokio_test::block_on(registry.load(title)).unwrap().is_none());
        }
    }

    #[test]
    fn directory_named_like_script_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("weird.rhai")).unwrap();
        let registry = ScriptRegistry::new(dir.path());

        let err = tokio_test::block_on(registry.load("weird")).unwrap_err();
        assert!(matches!(err, Error::Registry { .. }));
    }
}
