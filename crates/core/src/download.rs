//! Downloads into a local directory
//!
//! A key listed under a prefix lands at a path derived from the key: with an
//! empty or `/`-terminated prefix the key's path below the prefix is kept,
//! otherwise only its final segment is. Bodies are streamed to a partial file
//! next to the destination and renamed into place once complete.

use std::path::{Component, Path, PathBuf};

use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::traits::{ObjectPath, ObjectStore};

/// Suffix of a download still in progress
const PARTIAL_SUFFIX: &str = ".kaws-partial";

/// Where `key`, listed under `prefix`, is written inside `local_dir`
///
/// `None` for keys with nothing after the last `/` (directory markers). Keys
/// that would escape `local_dir` are rejected.
pub fn local_path(local_dir: &Path, prefix: &str, key: &str) -> Result<Option<PathBuf>> {
    let relative = if prefix.is_empty() || prefix.ends_with('/') {
        key.strip_prefix(prefix).unwrap_or(key)
    } else {
        key.rsplit('/').next().unwrap_or(key)
    };

    if relative.is_empty() || relative.ends_with('/') {
        return Ok(None);
    }

    let mut path = local_dir.to_path_buf();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => path.push(name),
            _ => {
                return Err(Error::Config(format!(
                    "Key {key} does not map to a path inside {}",
                    local_dir.display()
                )));
            }
        }
    }
    Ok(Some(path))
}

/// Stream `src` into `dest`, creating parent directories
///
/// Returns the number of bytes written. On failure `dest` is left untouched
/// and the partial file is removed.
pub async fn download_object(store: &dyn ObjectStore, src: &ObjectPath, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(dest);
    match write_body(store, src, &partial).await {
        Ok(written) => {
            tokio::fs::rename(&partial, dest).await?;
            tracing::debug!(src = %src, dest = %dest.display(), bytes = written, "Downloaded object");
            Ok(written)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %partial.display(), error = %cleanup, "Failed to remove partial download");
            }
            Err(e)
        }
    }
}

async fn write_body(store: &dyn ObjectStore, src: &ObjectPath, path: &Path) -> Result<u64> {
    let mut body = store.get_object(src).await?;
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = body.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    dest.with_file_name(name)
}
