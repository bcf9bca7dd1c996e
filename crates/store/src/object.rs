use super::{ObjectStore, Result, StoreError};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Object store rooted in a local directory, one subdirectory per bucket.
///
/// Signed URLs point at `{public_base_url}/object/sign/{bucket}/{path}` with
/// each path segment percent-encoded, and carry an expiry plus an
/// HMAC-SHA256 token checked by [`verify_signature`].
///
/// [`verify_signature`]: LocalObjectStore::verify_signature
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
    signing_secret: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str, signing_secret: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signing_secret: signing_secret.to_string(),
        }
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let safe = !bucket.is_empty()
            && !bucket.contains(['/', '\\'])
            && bucket != ".."
            && !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidPath(format!("{bucket}/{path}")));
        }
        Ok(self.root.join(bucket).join(relative))
    }

    fn mac(&self, bucket: &str, path: &str, expires: i64) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes()).ok()?;
        mac.update(format!("{bucket}/{path}\n{expires}").as_bytes());
        Some(mac)
    }

    /// Checks a token produced by `create_signed_url` against the current time.
    pub fn verify_signature(&self, bucket: &str, path: &str, expires: i64, token: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(tag) = URL_SAFE_NO_PAD.decode(token) else {
            return false;
        };
        self.mac(bucket, path, expires)
            .is_some_and(|mac| mac.verify_slice(&tag).is_ok())
    }

    fn signed_url(&self, bucket: &str, path: &str, token: &str, expires: i64) -> Result<String> {
        let invalid = || StoreError::InvalidBaseUrl(self.public_base_url.clone());
        let mut url = Url::parse(&self.public_base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|()| invalid())?
            .pop_if_empty()
            .extend(["object", "sign", bucket])
            .extend(path.split('/'));
        url.query_pairs_mut()
            .append_pair("token", token)
            .append_pair("expires", &expires.to_string());
        Ok(url.into())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let target = self.object_path(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;
        tracing::debug!(%bucket, %path, %content_type, size = bytes.len(), "Object stored");
        Ok(path.to_string())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let target = self.object_path(bucket, path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_signed_url(&self, bucket: &str, path: &str, ttl: Duration) -> Result<String> {
        let target = self.object_path(bucket, path)?;
        if !tokio::fs::try_exists(&target).await? {
            return Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            });
        }

        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);
        let mac = self
            .mac(bucket, path, expires)
            .ok_or_else(|| StoreError::InvalidPath(format!("{bucket}/{path}")))?;
        let token = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        self.signed_url(bucket, path, &token, expires)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        for path in paths {
            let target = self.object_path(bucket, path)?;
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(%bucket, %path, "Object already absent");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> LocalObjectStore {
        LocalObjectStore::new(dir.path(), "http://files.local/", "s3cret")
    }

    #[tokio::test]
    async fn upload_download_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let path = store
            .upload("invoices", "sub-1/a.pdf", b"pdf".to_vec(), "application/pdf")
            .await
            .unwrap();
        assert_eq!(path, "sub-1/a.pdf");
        assert_eq!(store.download("invoices", &path).await.unwrap(), b"pdf");

        store.remove("invoices", &[path.clone()]).await.unwrap();
        assert!(matches!(
            store.download("invoices", &path).await,
            Err(StoreError::NotFound { .. })
        ));
        // removing twice is not an error
        store.remove("invoices", &[path]).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        for (bucket, path) in [("invoices", "../etc/passwd"), ("..", "a"), ("invoices", "/abs")] {
            assert!(matches!(
                store.download(bucket, path).await,
                Err(StoreError::InvalidPath(_))
            ));
        }
    }

    #[tokio::test]
    async fn signed_url_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store
            .upload("invoices", "a.pdf", vec![1], "application/pdf")
            .await
            .unwrap();

        let url = store
            .create_signed_url("invoices", "a.pdf", Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(url.starts_with("http://files.local/object/sign/invoices/a.pdf?token="));

        let query = url.split_once('?').unwrap().1;
        let mut token = "";
        let mut expires = 0i64;
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("token", v) => token = v,
                ("expires", v) => expires = v.parse().unwrap(),
                _ => {}
            }
        }
        assert!(store.verify_signature("invoices", "a.pdf", expires, token));
        assert!(!store.verify_signature("invoices", "b.pdf", expires, token));
        assert!(!store.verify_signature("invoices", "a.pdf", expires - 7200, token));
    }

    #[tokio::test]
    async fn signed_url_encodes_reserved_characters() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store
            .upload("invoices", "sub-1/inv #2 a%20b?.pdf", vec![1], "application/pdf")
            .await
            .unwrap();

        let url = store
            .create_signed_url("invoices", "sub-1/inv #2 a%20b?.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        let (path, query) = url.split_once('?').unwrap();
        assert_eq!(
            path,
            "http://files.local/object/sign/invoices/sub-1/inv%20%232%20a%2520b%3F.pdf"
        );
        assert!(query.starts_with("token="));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let expires = Utc::now().timestamp() + 60;
        assert!(!store.verify_signature("invoices", "a.pdf", expires, "not base64!"));
        assert!(!store.verify_signature("invoices", "a.pdf", expires, ""));
    }

    #[tokio::test]
    async fn signing_missing_object_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(&dir)
            .create_signed_url("invoices", "nope.pdf", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
