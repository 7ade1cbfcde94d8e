use std::{io, path::PathBuf, sync::Arc};

use anyhow::Context;
use theoria_api::{validate_storage_path, Error as ApiError, ObjectStorage, Uuid};

/// Suffix of in-flight uploads, never a valid object path
pub const UPLOAD_TMP_SUFFIX: &str = ".upload-tmp";

/// Object storage keeping one file per object under a root directory, served
/// back under `{public_url}/storage/`
#[derive(Clone)]
pub struct FsStorage(Arc<FsStorageInner>);

struct FsStorageInner {
    root: PathBuf,
    public_url: String,
}

impl FsStorage {
    pub fn new(root: PathBuf, public_url: String) -> FsStorage {
        FsStorage(Arc::new(FsStorageInner {
            root,
            public_url: String::from(public_url.trim_end_matches('/')),
        }))
    }

    fn file(&self, path: &str) -> Result<PathBuf, ApiError> {
        validate_storage_path(path)?;
        if path.ends_with(UPLOAD_TMP_SUFFIX) {
            return Err(ApiError::InvalidPath(String::from(path)));
        }
        Ok(self.0.root.join(path))
    }

    pub async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        let file = self.file(path)?;
        match tokio::fs::metadata(&file).await {
            Ok(m) => Ok(m.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("checking for {file:?}")),
        }
    }

    pub async fn read(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let file = self.file(path)?;
        if !self.exists(path).await? {
            return Ok(None);
        }
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {file:?}")),
        }
    }
}

#[axum::async_trait]
impl ObjectStorage for FsStorage {
    async fn upload(&self, path: &str, data: Vec<u8>) -> anyhow::Result<()> {
        let file = self.file(path)?;
        if let Some(dir) = file.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating directory {dir:?}"))?;
        }
        // write then rename, so that readers never see a partial object
        let mut tmp = file.clone().into_os_string();
        tmp.push(format!(".{}{UPLOAD_TMP_SUFFIX}", Uuid::new_v4()));
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("writing {tmp:?}"))?;
        if let Err(e) = tokio::fs::rename(&tmp, &file).await {
            if let Err(err) = tokio::fs::remove_file(&tmp).await {
                tracing::warn!(?tmp, ?err, "failed cleaning up upload");
            }
            return Err(e).with_context(|| format!("renaming {tmp:?} to {file:?}"));
        }
        tracing::debug!(?path, "stored object");
        Ok(())
    }

    async fn download_url(&self, path: &str) -> anyhow::Result<String> {
        if !self.exists(path).await? {
            return Err(ApiError::NotFound.into());
        }
        Ok(format!("{}/storage/{}", self.0.public_url, path))
    }
}
