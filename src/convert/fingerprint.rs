use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::Result;

/// Compute SHA256 hash of file contents
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_compute_file_hash() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("page.rm");
        fs::write(&file_path, "test content").unwrap();

        let hash = compute_file_hash(&file_path).unwrap();
        assert_eq!(hash.len(), 64); // SHA256 produces 64 hex chars
        assert_eq!(hash, compute_file_hash(&file_path).unwrap());

        fs::write(&file_path, "other content").unwrap();
        assert_ne!(hash, compute_file_hash(&file_path).unwrap());
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(compute_file_hash(&temp_dir.path().join("ghost.rm")).is_err());
    }
}
