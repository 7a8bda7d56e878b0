//! Asset classes and the path table mapping each class to its source
//! patterns, watch pattern, and output directory.
//!
//! The table is pure configuration: built once at startup, validated before
//! any stage runs, and immutable afterwards.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// The six asset classes the pipeline builds. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetClass {
    Markup,
    Styles,
    Scripts,
    Images,
    Fonts,
    RawAssets,
}

impl AssetClass {
    /// All classes, in build-group order
    pub const ALL: [AssetClass; 6] = [
        AssetClass::Markup,
        AssetClass::Styles,
        AssetClass::Scripts,
        AssetClass::Images,
        AssetClass::Fonts,
        AssetClass::RawAssets,
    ];

    /// Stable lowercase name used in logs and summaries
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Markup => "markup",
            AssetClass::Styles => "styles",
            AssetClass::Scripts => "scripts",
            AssetClass::Images => "images",
            AssetClass::Fonts => "fonts",
            AssetClass::RawAssets => "raw-assets",
        }
    }

    /// Whether this class participates in incremental rebuild.
    /// Fonts are rebuilt only by a full build.
    #[inline]
    pub fn is_watchable(&self) -> bool {
        !matches!(self, AssetClass::Fonts)
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source, watch, and output locations for one asset class.
///
/// `source_patterns` are glob strings applied in order; a leading `!` marks
/// an exclusion removed from the matches of the preceding inclusions.
#[derive(Debug, Clone)]
pub struct PathSpec {
    pub source_patterns: Vec<String>,
    pub watch_pattern: Option<String>,
    pub output_dir: PathBuf,
}

impl PathSpec {
    pub fn new(
        source_patterns: Vec<String>,
        watch_pattern: Option<String>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            source_patterns,
            watch_pattern,
            output_dir,
        }
    }
}

/// Static mapping from asset class to its [`PathSpec`].
#[derive(Debug, Clone)]
pub struct PathTable {
    markup: PathSpec,
    styles: PathSpec,
    scripts: PathSpec,
    images: PathSpec,
    fonts: PathSpec,
    raw_assets: PathSpec,
    /// Output root removed wholesale by the clean stage
    output_root: PathBuf,
    /// Stylesheet include file (re)written by the font style generator
    font_style_include: PathBuf,
}

impl PathTable {
    /// Build the default table for a project rooted at `root`, reading from
    /// `source` and writing to `out` (both relative to `root`).
    pub fn for_project(root: &Path, source: &str, out: &str) -> Self {
        let src = root.join(source);
        let dist = root.join(out);
        let s = |p: &Path| p.to_string_lossy().into_owned();

        Self {
            markup: PathSpec::new(
                vec![
                    format!("{}/*.html", s(&src)),
                    format!("!{}/html/_*.html", s(&src)),
                ],
                Some(format!("{}/**/*.html", s(&src))),
                dist.clone(),
            ),
            styles: PathSpec::new(
                vec![format!("{}/assets/styles/main.css", s(&src))],
                Some(format!("{}/assets/styles/**/*.css", s(&src))),
                dist.join("assets").join("css"),
            ),
            scripts: PathSpec::new(
                vec![format!("{}/assets/js/app.js", s(&src))],
                Some(format!("{}/assets/js/**/*.js", s(&src))),
                dist.join("assets").join("js"),
            ),
            images: PathSpec::new(
                vec![format!("{}/assets/images/**/*", s(&src))],
                Some(format!("{}/assets/images/**/*", s(&src))),
                dist.join("assets").join("images"),
            ),
            fonts: PathSpec::new(
                vec![format!("{}/assets/fonts/*.ttf", s(&src))],
                None,
                dist.join("assets").join("fonts"),
            ),
            raw_assets: PathSpec::new(
                vec![format!("{}/assets/*", s(&src))],
                Some(format!("{}/assets/*", s(&src))),
                dist.join("assets"),
            ),
            output_root: dist,
            font_style_include: src.join("assets").join("styles").join("_fonts.css"),
        }
    }

    /// Look up the spec for a class. Total over the closed set.
    pub fn resolve(&self, class: AssetClass) -> &PathSpec {
        match class {
            AssetClass::Markup => &self.markup,
            AssetClass::Styles => &self.styles,
            AssetClass::Scripts => &self.scripts,
            AssetClass::Images => &self.images,
            AssetClass::Fonts => &self.fonts,
            AssetClass::RawAssets => &self.raw_assets,
        }
    }

    /// Replace the spec for a class
    pub fn set(&mut self, class: AssetClass, spec: PathSpec) {
        match class {
            AssetClass::Markup => self.markup = spec,
            AssetClass::Styles => self.styles = spec,
            AssetClass::Scripts => self.scripts = spec,
            AssetClass::Images => self.images = spec,
            AssetClass::Fonts => self.fonts = spec,
            AssetClass::RawAssets => self.raw_assets = spec,
        }
    }

    /// Output root removed by the clean stage
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Stylesheet include file maintained by the font style generator
    pub fn font_style_include(&self) -> &Path {
        &self.font_style_include
    }

    /// Verify every entry up front: non-empty output directories and
    /// compilable glob patterns. Configuration errors fail the run before
    /// any stage starts.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for class in AssetClass::ALL {
            let spec = self.resolve(class);
            if spec.output_dir.as_os_str().is_empty() {
                return Err(PipelineError::MissingPathSpec { class });
            }
            for pattern in &spec.source_patterns {
                let raw = pattern.strip_prefix('!').unwrap_or(pattern);
                glob::Pattern::new(raw).map_err(|source| PipelineError::BadPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            }
            if let Some(watch) = &spec.watch_pattern {
                glob::Pattern::new(watch).map_err(|source| PipelineError::BadPattern {
                    pattern: watch.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn table() -> PathTable {
        PathTable::for_project(Path::new("/proj"), "src", "dist")
    }

    // ==================== AssetClass tests ====================

    #[test]
    fn test_asset_class_names() {
        assert_eq!(AssetClass::Markup.as_str(), "markup");
        assert_eq!(AssetClass::RawAssets.as_str(), "raw-assets");
        assert_eq!(AssetClass::Fonts.to_string(), "fonts");
    }

    #[test]
    fn test_asset_class_all_covers_six() {
        assert_eq!(AssetClass::ALL.len(), 6);
    }

    #[test]
    fn test_fonts_not_watchable() {
        assert!(!AssetClass::Fonts.is_watchable());
        for class in AssetClass::ALL {
            if class != AssetClass::Fonts {
                assert!(class.is_watchable(), "{class} should be watchable");
            }
        }
    }

    // ==================== PathTable tests ====================

    #[test]
    fn test_resolve_total_with_output_dirs() {
        let table = table();
        for class in AssetClass::ALL {
            let spec = table.resolve(class);
            assert!(
                !spec.output_dir.as_os_str().is_empty(),
                "{class} must have an output dir"
            );
            assert!(!spec.source_patterns.is_empty());
        }
    }

    #[test]
    fn test_watch_eligible_classes_have_patterns() {
        let table = table();
        for class in AssetClass::ALL {
            let spec = table.resolve(class);
            if class.is_watchable() {
                assert!(spec.watch_pattern.is_some(), "{class} needs a watch pattern");
            } else {
                assert!(spec.watch_pattern.is_none());
            }
        }
    }

    #[test]
    fn test_markup_has_negated_partial_pattern() {
        let table = table();
        let spec = table.resolve(AssetClass::Markup);
        assert!(spec.source_patterns.iter().any(|p| p.starts_with('!')));
    }

    #[test]
    fn test_output_root_is_dist() {
        let table = table();
        assert!(table.output_root().ends_with("dist"));
        assert!(table
            .resolve(AssetClass::Styles)
            .output_dir
            .starts_with(table.output_root()));
    }

    #[test]
    fn test_font_style_include_lives_in_styles_source() {
        let table = table();
        assert!(table.font_style_include().ends_with("_fonts.css"));
        assert!(table
            .font_style_include()
            .starts_with(Path::new("/proj/src")));
    }

    #[test]
    fn test_validate_default_table() {
        assert!(table().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut table = table();
        table.set(
            AssetClass::Images,
            PathSpec::new(
                vec!["src/[".to_string()],
                None,
                PathBuf::from("dist/assets/images"),
            ),
        );
        let err = table.validate().unwrap_err();
        assert!(matches!(err, PipelineError::BadPattern { .. }));
    }

    #[test]
    fn test_validate_rejects_empty_output_dir() {
        let mut table = table();
        table.set(
            AssetClass::Markup,
            PathSpec::new(vec!["src/*.html".to_string()], None, PathBuf::new()),
        );
        let err = table.validate().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingPathSpec {
                class: AssetClass::Markup
            }
        ));
    }

    #[test]
    fn test_set_replaces_spec() {
        let mut table = table();
        table.set(
            AssetClass::Scripts,
            PathSpec::new(
                vec!["custom/main.js".to_string()],
                Some("custom/**/*.js".to_string()),
                PathBuf::from("out/js"),
            ),
        );
        assert_eq!(
            table.resolve(AssetClass::Scripts).source_patterns[0],
            "custom/main.js"
        );
    }
}
