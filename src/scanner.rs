//! Source file enumeration.
//!
//! Expands the ordered glob patterns of a [`PathSpec`](crate::paths::PathSpec)
//! into concrete files: inclusions are applied in order, then patterns with a
//! leading `!` remove their matches from the collected set. A pattern whose
//! directories do not exist simply contributes no matches.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::error::PipelineError;

/// One enumerated source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Full path on disk
    pub path: PathBuf,
    /// Path relative to the matching pattern's static prefix; determines
    /// the file's location under the stage's output directory
    pub rel: PathBuf,
}

/// Match options used everywhere: `*` never crosses a separator, `**` does.
/// Keeps watch matching consistent with directory-walking enumeration.
fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// The leading pattern components that contain no glob metacharacters.
/// `src/assets/images/**/*` → `src/assets/images`.
pub fn static_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[']) {
            break;
        }
        prefix.push(component.as_os_str());
    }
    prefix
}

/// Expand `patterns` in order into the matching files.
pub fn expand(patterns: &[String]) -> Result<Vec<SourceFile>, PipelineError> {
    let mut files: Vec<SourceFile> = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            let matcher =
                Pattern::new(negated).map_err(|source| PipelineError::BadPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            files.retain(|f| {
                let keep = !matcher.matches_path_with(&f.path, match_options());
                if !keep {
                    seen.remove(&f.path);
                }
                keep
            });
            continue;
        }

        let prefix = static_prefix(pattern);
        let matches = glob::glob_with(pattern, match_options()).map_err(|source| {
            PipelineError::BadPattern {
                pattern: pattern.clone(),
                source,
            }
        })?;

        for path in matches.filter_map(Result::ok) {
            if !path.is_file() || seen.contains(&path) {
                continue;
            }
            let rel = path
                .strip_prefix(&prefix)
                .unwrap_or(&path)
                .to_path_buf();
            seen.insert(path.clone());
            files.push(SourceFile { path, rel });
        }
    }

    Ok(files)
}

/// Whether `path` matches the (already validated) watch pattern.
pub fn matches(pattern: &str, path: &Path) -> bool {
    Pattern::new(pattern)
        .map(|p| p.matches_path_with(path, match_options()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    // ==================== static_prefix tests ====================

    #[test]
    fn test_static_prefix_stops_at_wildcard() {
        assert_eq!(
            static_prefix("src/assets/images/**/*"),
            PathBuf::from("src/assets/images")
        );
        assert_eq!(static_prefix("src/*.html"), PathBuf::from("src"));
        assert_eq!(
            static_prefix("src/assets/js/app.js"),
            PathBuf::from("src/assets/js/app.js")
        );
    }

    // ==================== expand tests ====================

    #[test]
    fn test_expand_includes_then_negates() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("src/index.html"));
        touch(&root.join("src/about.html"));
        touch(&root.join("src/_draft.html"));

        let patterns = vec![
            format!("{}/src/*.html", root.display()),
            format!("!{}/src/_*.html", root.display()),
        ];
        let files = expand(&patterns).unwrap();
        let mut names: Vec<_> = files
            .iter()
            .map(|f| f.rel.to_string_lossy().into_owned())
            .collect();
        names.sort();

        assert_eq!(names, vec!["about.html", "index.html"]);
    }

    #[test]
    fn test_expand_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let patterns = vec![format!("{}/nowhere/**/*.css", temp.path().display())];
        let files = expand(&patterns).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_expand_rel_is_prefix_relative() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("src/assets/images/icons/star.png"));
        touch(&root.join("src/assets/images/logo.png"));

        let patterns = vec![format!("{}/src/assets/images/**/*", root.display())];
        let mut files = expand(&patterns).unwrap();
        files.sort_by(|a, b| a.rel.cmp(&b.rel));

        assert_eq!(files[0].rel, PathBuf::from("icons/star.png"));
        assert_eq!(files[1].rel, PathBuf::from("logo.png"));
    }

    #[test]
    fn test_expand_skips_directories_and_duplicates() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("src/assets/data.json"));

        let patterns = vec![
            format!("{}/src/assets/*", root.display()),
            format!("{}/src/assets/*.json", root.display()),
        ];
        let files = expand(&patterns).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_expand_single_star_stays_in_directory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("src/assets/top.txt"));
        touch(&root.join("src/assets/nested/deep.txt"));

        let patterns = vec![format!("{}/src/assets/*", root.display())];
        let files = expand(&patterns).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel, PathBuf::from("top.txt"));
    }

    // ==================== matches tests ====================

    #[test]
    fn test_matches_watch_pattern() {
        assert!(matches(
            "/proj/src/assets/js/**/*.js",
            Path::new("/proj/src/assets/js/lib/util.js")
        ));
        assert!(!matches(
            "/proj/src/assets/js/**/*.js",
            Path::new("/proj/src/assets/styles/main.css")
        ));
    }

    #[test]
    fn test_matches_invalid_pattern_is_false() {
        assert!(!matches("src/[", Path::new("src/a")));
    }
}
