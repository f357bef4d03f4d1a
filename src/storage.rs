use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::path::{Path, PathBuf};

const STORAGE_DIR: &str = "storage";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Path relative to the workspace, `/`-separated. Used as the object URL.
    pub url: String,
    pub path: PathBuf,
    pub size: usize,
}

/// Strips an optional `data:<mime>;base64,` prefix and decodes the payload.
pub fn decode_upload(data: &str) -> anyhow::Result<Vec<u8>> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .context("upload is not valid base64")
}

pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Writes `bytes` to `<workspace>/storage/<bucket>/<key>`. `key` segments are
/// sanitized individually so callers cannot escape the bucket.
pub fn put_object(
    workspace: &Path,
    bucket: &str,
    key: &str,
    bytes: &[u8],
    max_bytes: usize,
) -> anyhow::Result<StoredObject> {
    if bytes.is_empty() {
        bail!("upload is empty");
    }
    if bytes.len() > max_bytes {
        bail!("upload of {} bytes exceeds limit of {max_bytes}", bytes.len());
    }

    let mut rel = PathBuf::from(STORAGE_DIR);
    let mut url_parts = vec![STORAGE_DIR.to_string()];
    for seg in std::iter::once(bucket).chain(key.split('/')) {
        if seg.trim().is_empty() {
            continue;
        }
        let s = sanitize_file_name(seg);
        rel.push(&s);
        url_parts.push(s);
    }

    let path = workspace.join(&rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    if path.exists() {
        bail!("object already exists: {}", url_parts.join("/"));
    }
    std::fs::write(&path, bytes)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;

    tracing::debug!(bucket, size = bytes.len(), "stored upload");
    Ok(StoredObject {
        url: url_parts.join("/"),
        path,
        size: bytes.len(),
    })
}

/// Deletes an object previously returned by `put_object`. Urls outside the
/// storage root are rejected; a missing file is not an error.
pub fn remove_object(workspace: &Path, url: &str) -> anyhow::Result<()> {
    let mut segments = url.split('/');
    if segments.next() != Some(STORAGE_DIR) {
        bail!("not a storage url: {url}");
    }
    let mut rel = PathBuf::from(STORAGE_DIR);
    for seg in segments {
        if seg.is_empty() || sanitize_file_name(seg) != seg {
            bail!("not a storage url: {url}");
        }
        rel.push(seg);
    }
    let path = workspace.join(rel);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.to_string_lossy())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_data_url_and_plain_base64() {
        assert_eq!(decode_upload("data:image/jpeg;base64,aGk=").expect("data url"), b"hi");
        assert_eq!(decode_upload("aGVs\nbG8=").expect("plain"), b"hello");
        assert!(decode_upload("***").is_err());
    }

    #[test]
    fn file_names_cannot_traverse() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name("notes v2.pdf"), "notes_v2.pdf");
        assert_eq!(sanitize_file_name("..."), "file");
    }

    #[test]
    fn put_object_writes_under_bucket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let obj = put_object(dir.path(), "faces", "face_1.jpg", b"jpeg", 1024).expect("put");
        assert_eq!(obj.url, "storage/faces/face_1.jpg");
        assert_eq!(std::fs::read(&obj.path).expect("read"), b"jpeg");

        let again = put_object(dir.path(), "faces", "face_1.jpg", b"jpeg", 1024);
        assert!(again.is_err());
    }

    #[test]
    fn put_object_enforces_limits() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(put_object(dir.path(), "faces", "a.jpg", b"", 10).is_err());
        assert!(put_object(dir.path(), "faces", "b.jpg", &[0u8; 11], 10).is_err());
    }

    #[test]
    fn nested_keys_keep_segments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let obj = put_object(dir.path(), "chat_attachments", "conv-1/17-notes.txt", b"x", 10)
            .expect("put");
        assert_eq!(obj.url, "storage/chat_attachments/conv-1/17-notes.txt");
    }

    #[test]
    fn remove_object_stays_inside_storage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let obj = put_object(dir.path(), "scholarship_documents", "app-1/1-cv.pdf", b"pdf", 10)
            .expect("put");
        remove_object(dir.path(), &obj.url).expect("remove");
        assert!(!obj.path.exists());
        remove_object(dir.path(), &obj.url).expect("missing file is fine");

        assert!(remove_object(dir.path(), "storage/../eduvision.db").is_err());
        assert!(remove_object(dir.path(), "eduvision.db").is_err());
    }
}
