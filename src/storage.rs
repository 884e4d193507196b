use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Object storage the worker fetches source images from and uploads annotated
/// images to.
///
/// `fetch` failures are fatal for the request being processed. `store` is
/// deliberately non-throwing: an annotated image is a nice-to-have and a
/// failed upload must never fail the analysis itself.
pub trait ObjectStore: Send {
    /// Downloads `key` into `dir` and returns the local path.
    fn fetch(&self, key: &str, dir: &Path) -> Result<PathBuf>;

    /// Uploads a local file under `key`. Returns false on any failure.
    fn store(&self, local: &Path, key: &str) -> bool;
}

/// Object store speaking plain HTTP: GET to fetch, PUT to store, one URL per
/// object key under a fixed endpoint.
pub struct HttpObjectStore {
    endpoint: Url,
    agent: ureq::Agent,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str) -> Result<Self> {
        let mut endpoint: Url = endpoint
            .parse()
            .with_context(|| format!("invalid storage endpoint {}", endpoint))?;
        // Object keys are joined onto the endpoint path, which must end in '/'
        // or Url::join would replace the last segment.
        if !endpoint.path().ends_with('/') {
            endpoint.set_path(&format!("{}/", endpoint.path()));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_read(HTTP_TIMEOUT)
            .timeout_write(HTTP_TIMEOUT)
            .build();
        Ok(Self { endpoint, agent })
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        if key.is_empty() || key.contains("..") {
            return Err(anyhow!("invalid object key {:?}", key));
        }
        self.endpoint
            .join(key)
            .with_context(|| format!("invalid object key {:?}", key))
    }
}

impl ObjectStore for HttpObjectStore {
    fn fetch(&self, key: &str, dir: &Path) -> Result<PathBuf> {
        let url = self.object_url(key)?;
        let response = self
            .agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("failed to download {}", url))?;

        let filename = Path::new(key)
            .file_name()
            .ok_or_else(|| anyhow!("object key {:?} has no file name", key))?;
        let local = dir.join(filename);
        let mut file = fs::File::create(&local)
            .with_context(|| format!("failed to create {}", local.display()))?;
        std::io::copy(&mut response.into_reader(), &mut file)
            .with_context(|| format!("failed to write {}", local.display()))?;
        Ok(local)
    }

    fn store(&self, local: &Path, key: &str) -> bool {
        let url = match self.object_url(key) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("skipping upload of {}: {}", local.display(), e);
                return false;
            }
        };
        let bytes = match fs::read(local) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("failed to read {} for upload: {}", local.display(), e);
                return false;
            }
        };
        match self
            .agent
            .put(url.as_str())
            .set("content-type", content_type_for(key))
            .send_bytes(&bytes)
        {
            Ok(_) => true,
            Err(e) => {
                log::warn!("failed to upload {}: {}", url, e);
                false
            }
        }
    }
}

fn content_type_for(key: &str) -> &'static str {
    match Path::new(key).extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Filesystem-backed store for development and tests: keys are paths relative
/// to a root directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains("..") || Path::new(key).is_absolute() {
            return Err(anyhow!("invalid object key {:?}", key));
        }
        Ok(self.root.join(key))
    }
}

impl ObjectStore for FsObjectStore {
    fn fetch(&self, key: &str, dir: &Path) -> Result<PathBuf> {
        let src = self.object_path(key)?;
        let filename = src
            .file_name()
            .ok_or_else(|| anyhow!("object key {:?} has no file name", key))?;
        let local = dir.join(filename);
        fs::copy(&src, &local)
            .with_context(|| format!("failed to fetch {}", src.display()))?;
        Ok(local)
    }

    fn store(&self, local: &Path, key: &str) -> bool {
        let dst = match self.object_path(key) {
            Ok(dst) => dst,
            Err(e) => {
                log::warn!("skipping upload of {}: {}", local.display(), e);
                return false;
            }
        };
        if let Some(parent) = dst.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!("failed to create {}: {}", parent.display(), e);
                return false;
            }
        }
        match fs::copy(local, &dst) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("failed to store {}: {}", dst.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fs_store_round_trips_an_object() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        std::fs::write(root.path().join("site.jpg"), b"jpeg bytes").unwrap();

        let store = FsObjectStore::new(root.path());
        let local = store.fetch("site.jpg", work.path()).unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"jpeg bytes");

        assert!(store.store(&local, "site_annotated.jpg"));
        assert_eq!(
            std::fs::read(root.path().join("site_annotated.jpg")).unwrap(),
            b"jpeg bytes"
        );
    }

    #[test]
    fn fs_fetch_of_missing_object_is_an_error() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = FsObjectStore::new(root.path());
        assert!(store.fetch("missing.jpg", work.path()).is_err());
    }

    #[test]
    fn fs_store_failure_returns_false_instead_of_erroring() {
        let root = TempDir::new().unwrap();
        let store = FsObjectStore::new(root.path());
        assert!(!store.store(Path::new("/nonexistent/input.jpg"), "out.jpg"));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = FsObjectStore::new(root.path());
        assert!(store.fetch("../etc/passwd", work.path()).is_err());
        assert!(!store.store(Path::new("/tmp/x"), "/abs/path"));
    }

    #[test]
    fn http_endpoint_paths_keep_their_prefix() {
        let store = HttpObjectStore::new("http://localhost:9000/images").unwrap();
        let url = store.object_url("site.jpg").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/images/site.jpg");
    }

    #[test]
    fn http_rejects_bad_endpoint_and_keys() {
        assert!(HttpObjectStore::new("not a url").is_err());
        let store = HttpObjectStore::new("http://localhost:9000/images/").unwrap();
        assert!(store.object_url("").is_err());
        assert!(store.object_url("../secrets").is_err());
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("a.bin"), "application/octet-stream");
    }
}
