use serde::{Deserialize, Serialize};

/// Name of the manifest document in the update repository.
pub const MANIFEST_FILE: &str = "file_list.json";

/// Remote update manifest: the target version plus the expected hash of
/// every file in the release tree. Produced by `tools/manifest`, consumed
/// read-only by the OTA engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative, forward-slash separated path under the firmware root.
    pub path: String,
    /// Lowercase hex SHA-256 of the file contents (canonical form for the
    /// configuration file, see `config::canonical_hash`).
    pub sha256: String,
}

impl Manifest {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Rejects paths that could write outside the firmware root when joined.
pub fn is_safe_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return false;
    }
    path.split('/').all(|part| !part.is_empty() && part != "." && part != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_manifest_document() {
        let doc = br#"{
            "version": "1.0.3",
            "files": [
                {"path": "main.py", "sha256": "ab12"},
                {"path": "Images/BeeBox.rgb", "sha256": "cd34"}
            ]
        }"#;
        let manifest = Manifest::parse(doc).unwrap();
        assert_eq!(manifest.version, "1.0.3");
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.files[1].path, "Images/BeeBox.rgb");
    }

    #[test]
    fn rejects_malformed_manifest() {
        assert!(Manifest::parse(b"{\"version\": 3}").is_err());
        assert!(Manifest::parse(b"not json").is_err());
    }

    #[test]
    fn path_safety() {
        assert!(is_safe_path("main.py"));
        assert!(is_safe_path("Images/BeeBox.rgb"));
        assert!(!is_safe_path("/etc/passwd"));
        assert!(!is_safe_path("../outside.py"));
        assert!(!is_safe_path("a/../../b"));
        assert!(!is_safe_path("a//b"));
        assert!(!is_safe_path(""));
    }
}
