//! Filesystem helpers shared by the file-backed stores.

use std::path::Path;

use uuid::Uuid;

use crate::error::{Result, StudioError};

/// Write `bytes` to `path` through a unique temp file in the same directory
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StudioError::Storage(format!("No parent directory for {}", path.display())))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StudioError::Storage(format!("Failed to write {}: {}", tmp.display(), e)));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StudioError::Storage(format!(
            "Failed to move {} into place: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}

/// Ids are restricted to `[A-Za-z0-9_-]`
pub fn validate_id(id: &str) -> Result<&str> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(StudioError::InvalidInput(format!("Invalid id: {id:?}")))
    }
}

/// Plain file names only: no separators, no leading dot
pub fn validate_filename(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(name)
    } else {
        Err(StudioError::InvalidInput(format!("Invalid file name: {name:?}")))
    }
}

/// Mime type from a file extension
pub fn mime_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(validate_id("3f2a-b_9").is_ok());
        assert!(validate_id("../etc").is_err());
        assert!(validate_filename("card-1.v2.png").is_ok());
        assert!(validate_filename(".hidden").is_err());
        assert!(validate_filename("a/b.png").is_err());
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("x.PNG"), "image/png");
        assert_eq!(mime_for("x.jpeg"), "image/jpeg");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"two");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
