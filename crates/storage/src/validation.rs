use std::path::{Component, Path};

use crate::StorageError;

const MAX_EXTENSION_LEN: usize = 16;

/// Extension (with leading dot) to give the artifact of `filename`.
///
/// Only ASCII alphanumerics survive; anything else yields an empty string.
/// The result is lowercased so `a.JPG` and `a.jpg` share one artifact path.
pub fn artifact_extension(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let Some((stem, ext)) = base.rsplit_once('.') else {
        return String::new();
    };
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return String::new();
    }
    format!(".{}", ext.to_ascii_lowercase())
}

/// Validates a name requested from the artifact directory.
///
/// Must be a single plain path component: no separators, no `..`, not
/// absolute, not hidden.
pub fn validate_artifact_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() {
        return Err(StorageError::InvalidName("empty name".into()));
    }
    if name.starts_with('.') || name.contains('\\') {
        return Err(StorageError::InvalidName(name.to_string()));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StorageError::InvalidName(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_from_filename() {
        assert_eq!(artifact_extension("photo.jpg"), ".jpg");
        assert_eq!(artifact_extension("Archive.TAR.GZ"), ".gz");
        assert_eq!(artifact_extension("dir/report.pdf"), ".pdf");
    }

    #[test]
    fn extension_absent_or_unsafe() {
        assert_eq!(artifact_extension("README"), "");
        assert_eq!(artifact_extension(".bashrc"), "");
        assert_eq!(artifact_extension("name."), "");
        assert_eq!(artifact_extension("evil.j/pg"), "");
        assert_eq!(artifact_extension("evil.a b"), "");
        assert_eq!(artifact_extension("x.abcdefghijklmnopq"), "");
    }

    #[test]
    fn accepts_plain_name() {
        assert!(validate_artifact_name("0123456789abcdef0123456789abcdef.jpg").is_ok());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_artifact_name("..").is_err());
        assert!(validate_artifact_name("../secret").is_err());
        assert!(validate_artifact_name("a/b").is_err());
        assert!(validate_artifact_name("/etc/passwd").is_err());
        assert!(validate_artifact_name("a\\b").is_err());
    }

    #[test]
    fn rejects_hidden_and_empty() {
        assert!(validate_artifact_name("").is_err());
        assert!(validate_artifact_name(".registry.db").is_err());
    }
}
