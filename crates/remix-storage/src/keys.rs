//! Object naming for published artifacts.
//!
//! Every artifact of a job lives under `<prefix>/<job_id>/`, so publishing
//! the same name twice overwrites one object and yields the same URL.

use crate::error::{StorageError, StorageResult};

/// Key prefix holding every artifact of one job, with trailing slash.
pub fn job_prefix(prefix: &str, job_id: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/", job_id)
    } else {
        format!("{}/{}/", prefix, job_id)
    }
}

/// Object key of a named artifact.
pub fn artifact_key(prefix: &str, job_id: &str, name: &str) -> StorageResult<String> {
    if job_id.is_empty() || job_id.contains('/') {
        return Err(StorageError::InvalidKey(format!("job id '{}'", job_id)));
    }
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(StorageError::InvalidKey(format!("artifact name '{}'", name)));
    }
    Ok(format!("{}{}", job_prefix(prefix, job_id), name))
}

/// Public URL of an object under `base_url`.
pub fn public_url(base_url: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", base_url.trim_end_matches('/'), encoded.join("/"))
}

/// Content type by file extension.
pub fn content_type_for(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".mp3") {
        "audio/mpeg"
    } else if lower.ends_with(".wav") {
        "audio/wav"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_key_layout() {
        assert_eq!(
            artifact_key("remixes", "job-1", "remix.mp3").unwrap(),
            "remixes/job-1/remix.mp3"
        );
        assert_eq!(
            artifact_key("/remixes/", "job-1", "remix.mp3").unwrap(),
            "remixes/job-1/remix.mp3"
        );
        assert_eq!(artifact_key("", "job-1", "a.mp3").unwrap(), "job-1/a.mp3");
    }

    #[test]
    fn test_artifact_key_rejects_traversal() {
        assert!(artifact_key("remixes", "job-1", "../x.mp3").is_err());
        assert!(artifact_key("remixes", "a/b", "x.mp3").is_err());
        assert!(artifact_key("remixes", "job-1", "").is_err());
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            public_url("https://cdn.example.com/", "remixes/job-1/remix.mp3"),
            "https://cdn.example.com/remixes/job-1/remix.mp3"
        );
        assert_eq!(
            public_url("https://cdn.example.com", "remixes/a b/x.mp3"),
            "https://cdn.example.com/remixes/a%20b/x.mp3"
        );
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("remix.MP3"), "audio/mpeg");
        assert_eq!(content_type_for("stem.wav"), "audio/wav");
        assert_eq!(content_type_for("notes.txt"), "application/octet-stream");
    }
}
