use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StaticFileError {
    #[error("no such file: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    Forbidden(String, #[source] io::Error),
}

/// Serves files from one root directory. Nothing outside the root is ever
/// returned, whatever the request path looks like.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    base_dir: PathBuf,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base_dir: base.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let mut pb = self.base_dir.clone();
        for comp in Path::new(url_path.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    pub fn content_type(path: &Path) -> &'static str {
        match path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase().as_str() {
            "html" => "text/html",
            "css" => "text/css",
            "js" => "application/javascript",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "txt" => "text/plain",
            _ => "application/octet-stream",
        }
    }

    pub async fn load(&self, url_path: &str) -> Result<(Bytes, &'static str), StaticFileError> {
        let not_found = || StaticFileError::NotFound(url_path.to_string());

        let path = self.map_path(url_path).ok_or_else(not_found)?;
        let meta = tokio::fs::metadata(&path).await.map_err(|_| not_found())?;
        if !meta.is_file() {
            return Err(not_found());
        }

        // A symlink inside the root may still point outside of it.
        let (root, resolved) = match (tokio::fs::canonicalize(&self.base_dir).await, tokio::fs::canonicalize(&path).await) {
            (Ok(root), Ok(resolved)) => (root, resolved),
            _ => return Err(not_found()),
        };
        if !resolved.starts_with(&root) {
            debug!(path = %resolved.display(), "static path escapes web root");
            return Err(not_found());
        }

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| StaticFileError::Forbidden(url_path.to_string(), e))?;
        Ok((Bytes::from(bytes), Self::content_type(&path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "Hello\n").unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css").join("site.css"), "body {}").unwrap();
        dir
    }

    #[test]
    fn test_map_path_prevents_traversal() {
        let sf = StaticFiles::new("web_files");
        assert!(sf.map_path("../Cargo.toml").is_none());
        assert!(sf.map_path("/../../etc/passwd").is_none());
        assert!(sf.map_path("/css/../../etc/passwd").is_none());
        assert_eq!(sf.map_path("/./css/site.css"), Some(PathBuf::from("web_files/css/site.css")));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(StaticFiles::content_type(Path::new("a.html")), "text/html");
        assert_eq!(StaticFiles::content_type(Path::new("a.JPEG")), "image/jpeg");
        assert_eq!(StaticFiles::content_type(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(StaticFiles::content_type(Path::new("a.png")), "image/png");
        assert_eq!(StaticFiles::content_type(Path::new("a.js")), "application/javascript");
        assert_eq!(StaticFiles::content_type(Path::new("a")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_load_plain_file_twice() {
        let root = web_root();
        let sf = StaticFiles::new(root.path());

        let first = sf.load("/hello.txt").await.unwrap();
        let second = sf.load("/hello.txt").await.unwrap();
        assert_eq!(first, (Bytes::from_static(b"Hello\n"), "text/plain"));
        assert_eq!(first, second);

        let (css, ct) = sf.load("/css/site.css").await.unwrap();
        assert_eq!(&css[..], b"body {}");
        assert_eq!(ct, "text/css");
    }

    #[tokio::test]
    async fn test_missing_and_directories_are_not_found() {
        let root = web_root();
        let sf = StaticFiles::new(root.path());

        assert!(matches!(sf.load("/nope.html").await, Err(StaticFileError::NotFound(_))));
        assert!(matches!(sf.load("/css").await, Err(StaticFileError::NotFound(_))));
        assert!(matches!(sf.load("/../../etc/passwd").await, Err(StaticFileError::NotFound(_))));
    }
}
