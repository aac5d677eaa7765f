use crate::error::{EngineError, EngineResult};

const MAX_PATH_LEN: usize = 4096;

/// §4.1 path normalization: validate, replace `\` with `/`, prefix `/` if
/// missing, collapse repeated `/`, strip a trailing `/` unless root.
pub fn normalize_path(raw: &str) -> EngineResult<String> {
    normalize_inner(raw, false)
}

/// §4.1 prefix normalization (subtree listing): same rules, but an explicit
/// trailing `/` is preserved so `"/src/"` never matches `"/src-old/…"`.
pub fn normalize_prefix(raw: &str) -> EngineResult<String> {
    normalize_inner(raw, true)
}

fn normalize_inner(raw: &str, preserve_trailing_slash: bool) -> EngineResult<String> {
    if raw.is_empty() {
        return Err(EngineError::InvalidPath("path must not be empty".into()));
    }
    if raw.len() > MAX_PATH_LEN {
        return Err(EngineError::InvalidPath(format!(
            "path exceeds {MAX_PATH_LEN} bytes"
        )));
    }
    for c in raw.chars() {
        if c.is_control() && c != '\t' && c != '\n' && c != '\r' {
            return Err(EngineError::InvalidPath(
                "path contains a control character".into(),
            ));
        }
        if "<>:\"|?*".contains(c) {
            return Err(EngineError::InvalidPath(format!(
                "path contains forbidden character '{c}'"
            )));
        }
    }

    let had_trailing_slash = raw.ends_with('/') || raw.ends_with('\\');
    let slashed: String = raw.chars().map(|c| if c == '\\' { '/' } else { c }).collect();
    let prefixed = if slashed.starts_with('/') {
        slashed
    } else {
        format!("/{slashed}")
    };

    let mut collapsed = String::with_capacity(prefixed.len());
    let mut prev_slash = false;
    for c in prefixed.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }

    let trimmed = if collapsed == "/" {
        collapsed
    } else if let Some(stripped) = collapsed.strip_suffix('/') {
        stripped.to_string()
    } else {
        collapsed
    };

    if preserve_trailing_slash && had_trailing_slash && trimmed != "/" {
        Ok(format!("{trimmed}/"))
    } else {
        Ok(trimmed)
    }
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;

    #[pgrx::pg_test]
    fn normalizes_relative_path() {
        assert_eq!(normalize_path("src/x").unwrap(), "/src/x");
    }

    #[pgrx::pg_test]
    fn collapses_repeated_slashes_and_trailing_slash() {
        assert_eq!(normalize_path("//a//b/").unwrap(), "/a/b");
    }

    #[pgrx::pg_test]
    fn root_stays_root() {
        assert_eq!(normalize_path("/").unwrap(), "/");
    }

    #[pgrx::pg_test]
    fn windows_style_backslashes_become_slashes() {
        assert_eq!(normalize_path("a\\b").unwrap(), "/a/b");
    }

    #[pgrx::pg_test]
    fn rejects_forbidden_characters() {
        assert!(normalize_path("/a<b").is_err());
        assert!(normalize_path("/a|b").is_err());
    }

    #[pgrx::pg_test]
    fn rejects_control_characters() {
        assert!(normalize_path("/a\u{0007}b").is_err());
    }

    #[pgrx::pg_test]
    fn rejects_oversized_paths() {
        let huge = format!("/{}", "a".repeat(5000));
        assert!(normalize_path(&huge).is_err());
    }

    #[pgrx::pg_test]
    fn prefix_normalization_preserves_trailing_slash() {
        assert_eq!(normalize_prefix("/src/").unwrap(), "/src/");
        assert_eq!(normalize_prefix("/src").unwrap(), "/src");
    }
}
