use std::fmt;
use std::path::Path;

use chrono::{DateTime, Local};
use uuid::Uuid;

const STEM_MAX_CHARS: usize = 20;
const SHORT_ID_LEN: usize = 6;
const FALLBACK_STEM: &str = "image";

/// Name of an artifact folder: `<YYYYmmddHHMMSS>_<6 hex>_<stem>`.
///
/// Only produced by [`FolderName::generate`] or by validating a name a client
/// sent back, so it is always a single safe path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderName(String);

impl FolderName {
    pub fn generate(original_filename: &str, now: DateTime<Local>) -> Self {
        let short_id: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(SHORT_ID_LEN)
            .collect();
        Self(format!(
            "{}_{}_{}",
            now.format("%Y%m%d%H%M%S"),
            short_id,
            sanitize_stem(original_filename)
        ))
    }

    /// Accepts a client-supplied name if it is a plain, non-hidden path component.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filename stem with spaces turned into underscores, unsafe characters
/// dropped and the result capped at 20 characters.
pub fn sanitize_stem(original_filename: &str) -> String {
    let stem = Path::new(original_filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let clean: String = stem
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        .take(STEM_MAX_CHARS)
        .collect();
    if clean.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_generate_pattern() {
        let name = FolderName::generate("leaf photo.jpg", fixed_time());
        let parts: Vec<&str> = name.as_str().splitn(3, '_').collect();
        assert_eq!(parts[0], "20240309140507");
        assert_eq!(parts[1].len(), 6);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(parts[2], "leaf_photo");
    }

    #[test]
    fn test_generate_is_unique() {
        let a = FolderName::generate("x.png", fixed_time());
        let b = FolderName::generate("x.png", fixed_time());
        assert_ne!(a, b);
    }

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("leaf photo.jpg"), "leaf_photo");
        assert_eq!(sanitize_stem("a_very_long_filename_indeed.png"), "a_very_long_filename");
        assert_eq!(sanitize_stem("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_stem("ünïcode leaf.jpg"), "ncode_leaf");
        assert_eq!(sanitize_stem(""), "image");
        assert_eq!(sanitize_stem("..."), "image");
    }

    #[test]
    fn test_parse_rejects_traversal() {
        assert!(FolderName::parse("20240309140507_abc123_leaf").is_some());
        assert!(FolderName::parse("..").is_none());
        assert!(FolderName::parse("../secrets").is_none());
        assert!(FolderName::parse("a/b").is_none());
        assert!(FolderName::parse("").is_none());
    }
}
