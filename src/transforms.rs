//! Content transforms applied by the stages.
//!
//! Each stage owns an ordered list of [`ByteTransform`]s applied to a source
//! file's bytes before the write boundary; the stage shell handles reading,
//! writing, and reload notification. Every transform here is a swappable
//! reference implementation of the collaborator contracts: markup inclusion,
//! stylesheet compilation and minification, script bundling and
//! minification, image recompression, and raw copy.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use crate::paths::AssetClass;

/// A pure content transform: bytes in, bytes out.
///
/// `source` is the on-disk origin of the bytes, used to resolve relative
/// include/import directives. Errors are plain messages; the stage shell
/// attaches the stage and path context.
pub trait ByteTransform: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, input: Vec<u8>, source: &Path) -> Result<Vec<u8>, String>;
}

/// Ordered transform list applied by one stage
pub type TransformChain = Vec<Box<dyn ByteTransform>>;

/// Primary transform chain for a class. Fonts are handled by the font
/// stage's converter sub-runs, not a byte chain.
pub fn primary_chain(class: AssetClass) -> TransformChain {
    match class {
        AssetClass::Markup => vec![Box::new(MarkupInclude)],
        AssetClass::Styles => vec![Box::new(StyleCompiler)],
        AssetClass::Scripts => vec![Box::new(ScriptBundler)],
        AssetClass::Images => vec![Box::new(ImageOptimizer)],
        AssetClass::Fonts | AssetClass::RawAssets => vec![Box::new(Passthrough)],
    }
}

/// Minify sub-chain producing the `.min` sibling artifact, present only for
/// Styles and Scripts.
pub fn minify_chain(class: AssetClass) -> Option<TransformChain> {
    match class {
        AssetClass::Styles => Some(vec![Box::new(StyleMinifier)]),
        AssetClass::Scripts => Some(vec![Box::new(ScriptMinifier)]),
        _ => None,
    }
}

fn utf8(input: Vec<u8>, what: &str) -> Result<String, String> {
    String::from_utf8(input).map_err(|_| format!("{what} source is not valid UTF-8"))
}

// ---------------------------------------------------------------------------
// Markup inclusion
// ---------------------------------------------------------------------------

/// Expands `@@include("partial.html")` directives recursively, relative to
/// the including file.
pub struct MarkupInclude;

impl ByteTransform for MarkupInclude {
    fn name(&self) -> &'static str {
        "markup-include"
    }

    fn apply(&self, input: Vec<u8>, source: &Path) -> Result<Vec<u8>, String> {
        let text = utf8(input, "markup")?;
        let dir = source.parent().unwrap_or(Path::new("."));
        let mut stack = vec![source.to_path_buf()];
        let expanded = expand_markup_includes(&text, dir, &mut stack)?;
        Ok(expanded.into_bytes())
    }
}

fn expand_markup_includes(
    text: &str,
    dir: &Path,
    stack: &mut Vec<PathBuf>,
) -> Result<String, String> {
    const DIRECTIVE: &str = "@@include(";

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(at) = rest.find(DIRECTIVE) {
        out.push_str(&rest[..at]);
        let args = &rest[at + DIRECTIVE.len()..];

        let (target, consumed) = parse_include_target(args)
            .ok_or_else(|| format!("malformed @@include directive near offset {at}"))?;

        let path = dir.join(&target);
        if stack.contains(&path) {
            return Err(format!("include cycle through {}", path.display()));
        }
        let included = fs::read_to_string(&path)
            .map_err(|e| format!("cannot include {}: {e}", path.display()))?;

        stack.push(path.clone());
        let nested_dir = path.parent().unwrap_or(dir);
        out.push_str(&expand_markup_includes(&included, nested_dir, stack)?);
        stack.pop();

        rest = &args[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Parse `"file") ...` or `'file') ...`, returning the target and the byte
/// count consumed after the opening parenthesis.
fn parse_include_target(args: &str) -> Option<(String, usize)> {
    let mut chars = args.char_indices();
    let (_, quote) = chars.find(|&(_, c)| !c.is_whitespace())?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let start = args.find(quote)? + 1;
    let end = start + args[start..].find(quote)?;
    let close = end + 1 + args[end + 1..].find(')')?;
    Some((args[start..end].to_string(), close + 1))
}

// ---------------------------------------------------------------------------
// Stylesheets
// ---------------------------------------------------------------------------

/// Compiles the stylesheet entry: inlines relative `@import` files, then
/// parses and lowers the result for the configured browser targets
/// (vendor prefixes, media-query merging, nesting).
pub struct StyleCompiler;

impl ByteTransform for StyleCompiler {
    fn name(&self) -> &'static str {
        "style-compile"
    }

    fn apply(&self, input: Vec<u8>, source: &Path) -> Result<Vec<u8>, String> {
        let text = utf8(input, "stylesheet")?;
        let dir = source.parent().unwrap_or(Path::new("."));
        let mut stack = vec![source.to_path_buf()];
        let inlined = inline_css_imports(&text, dir, &mut stack)?;
        let css = process_css(&inlined, false)?;
        Ok(css.into_bytes())
    }
}

/// Minified print of already-compiled CSS; comments are dropped by the
/// serializer.
pub struct StyleMinifier;

impl ByteTransform for StyleMinifier {
    fn name(&self) -> &'static str {
        "style-minify"
    }

    fn apply(&self, input: Vec<u8>, _source: &Path) -> Result<Vec<u8>, String> {
        let text = utf8(input, "stylesheet")?;
        let css = process_css(&text, true)?;
        Ok(css.into_bytes())
    }
}

fn browser_targets() -> Targets {
    // Versions are (major << 16) | (minor << 8) | patch
    Targets {
        browsers: Some(Browsers {
            chrome: Some(90 << 16),
            edge: Some(90 << 16),
            firefox: Some(88 << 16),
            safari: Some(14 << 16),
            ios_saf: Some(14 << 16),
            ..Browsers::default()
        }),
        ..Targets::default()
    }
}

fn process_css(source: &str, minify: bool) -> Result<String, String> {
    let mut sheet =
        StyleSheet::parse(source, ParserOptions::default()).map_err(|e| e.to_string())?;
    sheet
        .minify(MinifyOptions {
            targets: browser_targets(),
            ..MinifyOptions::default()
        })
        .map_err(|e| e.to_string())?;
    let result = sheet
        .to_css(PrinterOptions {
            minify,
            targets: browser_targets(),
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;
    Ok(result.code)
}

/// Inline `@import "relative.css";` lines. Protocol and `url()` imports are
/// left for the browser.
fn inline_css_imports(
    text: &str,
    dir: &Path,
    stack: &mut Vec<PathBuf>,
) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());

    for line in text.lines() {
        let trimmed = line.trim_start();
        let Some(target) = parse_css_import(trimmed) else {
            out.push_str(line);
            out.push('\n');
            continue;
        };

        let path = dir.join(&target);
        if stack.contains(&path) {
            return Err(format!("@import cycle through {}", path.display()));
        }
        let imported = fs::read_to_string(&path)
            .map_err(|e| format!("cannot resolve @import \"{target}\": {e}"))?;

        stack.push(path.clone());
        let nested_dir = path.parent().unwrap_or(dir);
        out.push_str(&inline_css_imports(&imported, nested_dir, stack)?);
        stack.pop();
    }

    Ok(out)
}

fn parse_css_import(line: &str) -> Option<String> {
    let rest = line.strip_prefix("@import")?.trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let body = &rest[1..];
    let end = body.find(quote)?;
    let target = &body[..end];
    if target.contains("://") {
        return None;
    }
    Some(target.to_string())
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// Concatenating bundler: lines importing a relative module are replaced by
/// the module body (recursively bundled, `export ` markers stripped, each
/// module included once). Bare-specifier imports are left untouched.
pub struct ScriptBundler;

impl ByteTransform for ScriptBundler {
    fn name(&self) -> &'static str {
        "script-bundle"
    }

    fn apply(&self, input: Vec<u8>, source: &Path) -> Result<Vec<u8>, String> {
        let text = utf8(input, "script")?;
        let dir = source.parent().unwrap_or(Path::new("."));
        let mut seen = HashSet::new();
        seen.insert(source.to_path_buf());
        let bundled = bundle_scripts(&text, dir, &mut seen)?;
        Ok(bundled.into_bytes())
    }
}

fn bundle_scripts(
    text: &str,
    dir: &Path,
    seen: &mut HashSet<PathBuf>,
) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());

    for line in text.lines() {
        let trimmed = line.trim_start();
        let Some(target) = parse_relative_import(trimmed) else {
            let body = trimmed.strip_prefix("export ").unwrap_or(line);
            out.push_str(body);
            out.push('\n');
            continue;
        };

        let path = dir.join(&target);
        if !seen.insert(path.clone()) {
            continue;
        }
        let module = fs::read_to_string(&path)
            .map_err(|e| format!("cannot resolve import \"{target}\": {e}"))?;
        let nested_dir = path.parent().unwrap_or(dir);
        out.push_str(&bundle_scripts(&module, nested_dir, seen)?);
    }

    Ok(out)
}

/// Extract the specifier from an `import` line when it names a relative
/// module (`./` or `../`).
fn parse_relative_import(line: &str) -> Option<String> {
    let rest = line.strip_prefix("import")?;
    let quote_at = rest.find(['"', '\''])?;
    let quote = rest.as_bytes()[quote_at] as char;
    let body = &rest[quote_at + 1..];
    let end = body.find(quote)?;
    let target = &body[..end];
    if target.starts_with("./") || target.starts_with("../") {
        Some(target.to_string())
    } else {
        None
    }
}

/// Conservative script minifier: removes comments (string-aware) and
/// indentation, drops blank lines. Statement structure is preserved.
pub struct ScriptMinifier;

impl ByteTransform for ScriptMinifier {
    fn name(&self) -> &'static str {
        "script-minify"
    }

    fn apply(&self, input: Vec<u8>, _source: &Path) -> Result<Vec<u8>, String> {
        let text = utf8(input, "script")?;
        let stripped = strip_script_comments(&text);
        let mut out = String::with_capacity(stripped.len());
        for line in stripped.lines() {
            let line = line.trim();
            if !line.is_empty() {
                out.push_str(line);
                out.push('\n');
            }
        }
        Ok(out.into_bytes())
    }
}

fn strip_script_comments(text: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Str(char),
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '"' | '\'' | '`' => {
                    state = State::Str(c);
                    out.push(c);
                }
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                _ => out.push(c),
            },
            State::Str(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote {
                    state = State::Code;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                }
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Format-aware recompression: PNG is re-encoded at the strongest
/// compression level, JPEG at quality 85. The original bytes win whenever
/// re-encoding does not shrink the file; unrecognized formats copy through.
pub struct ImageOptimizer;

impl ByteTransform for ImageOptimizer {
    fn name(&self) -> &'static str {
        "image-optimize"
    }

    fn apply(&self, input: Vec<u8>, source: &Path) -> Result<Vec<u8>, String> {
        let Ok(format) = image::guess_format(&input) else {
            return Ok(input);
        };
        match format {
            ImageFormat::Png | ImageFormat::Jpeg => {
                let recompressed = recompress(&input, format)
                    .map_err(|e| format!("cannot optimize {}: {e}", source.display()))?;
                if recompressed.len() < input.len() {
                    Ok(recompressed)
                } else {
                    Ok(input)
                }
            }
            _ => Ok(input),
        }
    }
}

fn recompress(data: &[u8], format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
    use image::codecs::jpeg::JpegEncoder;
    use image::codecs::png::{CompressionType, FilterType, PngEncoder};

    let img = image::load_from_memory(data)?;
    let mut out = Vec::new();
    match format {
        ImageFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        _ => {
            // JPEG has no alpha channel
            let rgb = img.to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut out, 85);
            encoder.encode_image(&rgb)?;
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Raw copy
// ---------------------------------------------------------------------------

/// Identity transform for classes that deploy bytes unchanged.
pub struct Passthrough;

impl ByteTransform for Passthrough {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn apply(&self, input: Vec<u8>, _source: &Path) -> Result<Vec<u8>, String> {
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // ==================== markup include tests ====================

    #[test]
    fn test_markup_include_expands_partial() {
        let temp = TempDir::new().unwrap();
        let page = temp.path().join("index.html");
        fs::write(temp.path().join("header.html"), "<header>hi</header>").unwrap();
        fs::write(&page, "<body>@@include(\"header.html\")</body>").unwrap();

        let out = MarkupInclude
            .apply(fs::read(&page).unwrap(), &page)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<body><header>hi</header></body>"
        );
    }

    #[test]
    fn test_markup_include_nested_and_relative() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("html")).unwrap();
        fs::write(temp.path().join("html/nav.html"), "<nav/>").unwrap();
        fs::write(
            temp.path().join("html/_header.html"),
            "<header>@@include('nav.html')</header>",
        )
        .unwrap();
        let page = temp.path().join("index.html");
        fs::write(&page, "@@include(\"html/_header.html\")").unwrap();

        let out = MarkupInclude
            .apply(fs::read(&page).unwrap(), &page)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "<header><nav/></header>");
    }

    #[test]
    fn test_markup_include_missing_file_errors() {
        let temp = TempDir::new().unwrap();
        let page = temp.path().join("index.html");
        fs::write(&page, "@@include(\"gone.html\")").unwrap();

        let err = MarkupInclude
            .apply(fs::read(&page).unwrap(), &page)
            .unwrap_err();
        assert!(err.contains("gone.html"));
    }

    #[test]
    fn test_markup_include_cycle_errors() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.html");
        let b = temp.path().join("b.html");
        fs::write(&a, "@@include(\"b.html\")").unwrap();
        fs::write(&b, "@@include(\"a.html\")").unwrap();

        let err = MarkupInclude.apply(fs::read(&a).unwrap(), &a).unwrap_err();
        assert!(err.contains("cycle"));
    }

    // ==================== stylesheet tests ====================

    #[test]
    fn test_style_compiler_inlines_imports() {
        let temp = TempDir::new().unwrap();
        let main = temp.path().join("main.css");
        fs::write(temp.path().join("_reset.css"), "body { margin: 0 }").unwrap();
        fs::write(&main, "@import \"_reset.css\";\nh1 { color: red }").unwrap();

        let out = StyleCompiler.apply(fs::read(&main).unwrap(), &main).unwrap();
        let css = String::from_utf8(out).unwrap();
        assert!(css.contains("margin"));
        assert!(css.contains("color"));
        assert!(!css.contains("@import"));
    }

    #[test]
    fn test_style_compiler_missing_import_errors() {
        let temp = TempDir::new().unwrap();
        let main = temp.path().join("main.css");
        fs::write(&main, "@import \"missing.css\";").unwrap();

        let err = StyleCompiler
            .apply(fs::read(&main).unwrap(), &main)
            .unwrap_err();
        assert!(err.contains("missing.css"));
    }

    #[test]
    fn test_style_minifier_is_smaller() {
        let css = b"body {\n  margin: 0;\n  padding: 0;\n}\n".to_vec();
        let out = StyleMinifier.apply(css.clone(), Path::new("main.css")).unwrap();
        assert!(out.len() < css.len());
        assert!(!String::from_utf8(out).unwrap().contains('\n'));
    }

    #[test]
    fn test_css_import_parser_ignores_urls() {
        assert_eq!(
            parse_css_import("@import \"a.css\";"),
            Some("a.css".to_string())
        );
        assert_eq!(parse_css_import("@import \"https://cdn/x.css\";"), None);
        assert_eq!(parse_css_import("@import url(x.css);"), None);
        assert_eq!(parse_css_import("color: red;"), None);
    }

    // ==================== script tests ====================

    #[test]
    fn test_script_bundler_inlines_relative_imports() {
        let temp = TempDir::new().unwrap();
        let entry = temp.path().join("app.js");
        fs::write(temp.path().join("util.js"), "export function add(a, b) { return a + b; }\n")
            .unwrap();
        fs::write(&entry, "import \"./util.js\";\nconsole.log(add(1, 2));\n").unwrap();

        let out = ScriptBundler.apply(fs::read(&entry).unwrap(), &entry).unwrap();
        let js = String::from_utf8(out).unwrap();
        assert!(js.contains("function add"));
        assert!(!js.contains("import"));
        assert!(!js.contains("export"));
    }

    #[test]
    fn test_script_bundler_includes_module_once() {
        let temp = TempDir::new().unwrap();
        let entry = temp.path().join("app.js");
        fs::write(temp.path().join("shared.js"), "const SHARED = 1;\n").unwrap();
        fs::write(temp.path().join("a.js"), "import './shared.js';\nconst A = SHARED;\n").unwrap();
        fs::write(
            &entry,
            "import './shared.js';\nimport './a.js';\nconsole.log(A);\n",
        )
        .unwrap();

        let out = ScriptBundler.apply(fs::read(&entry).unwrap(), &entry).unwrap();
        let js = String::from_utf8(out).unwrap();
        assert_eq!(js.matches("const SHARED").count(), 1);
    }

    #[test]
    fn test_script_bundler_leaves_bare_imports() {
        let temp = TempDir::new().unwrap();
        let entry = temp.path().join("app.js");
        fs::write(&entry, "import lodash from \"lodash\";\n").unwrap();

        let out = ScriptBundler.apply(fs::read(&entry).unwrap(), &entry).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("lodash"));
    }

    #[test]
    fn test_script_minifier_strips_comments_not_strings() {
        let js = b"// banner\nconst url = \"http://x/y\"; /* gone */\n  let a = 1;\n\n".to_vec();
        let out = ScriptMinifier.apply(js, Path::new("app.js")).unwrap();
        let min = String::from_utf8(out).unwrap();
        assert!(min.contains("http://x/y"));
        assert!(!min.contains("banner"));
        assert!(!min.contains("gone"));
        assert!(min.starts_with("const url"));
    }

    #[test]
    fn test_strip_comments_handles_escapes() {
        let out = strip_script_comments("const s = \"a\\\"b // not a comment\";");
        assert!(out.contains("not a comment"));
    }

    // ==================== image tests ====================

    fn sample_png() -> Vec<u8> {
        use image::{ImageBuffer, Rgba};
        let img = ImageBuffer::from_pixel(16, 16, Rgba([120u8, 30, 30, 255]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_image_optimizer_never_grows_output() {
        let png = sample_png();
        let out = ImageOptimizer
            .apply(png.clone(), Path::new("a.png"))
            .unwrap();
        assert!(out.len() <= png.len());
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_image_optimizer_passes_unknown_bytes() {
        let svg = b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>".to_vec();
        let out = ImageOptimizer.apply(svg.clone(), Path::new("a.svg")).unwrap();
        assert_eq!(out, svg);
    }

    // ==================== chain wiring tests ====================

    #[test]
    fn test_minify_chain_only_for_styles_and_scripts() {
        for class in AssetClass::ALL {
            let has_min = minify_chain(class).is_some();
            let expected =
                matches!(class, AssetClass::Styles | AssetClass::Scripts);
            assert_eq!(has_min, expected, "{class}");
        }
    }
}
