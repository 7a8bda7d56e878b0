//! Font conversion and the generated `@font-face` include.
//!
//! The font stage runs one sub-run per target format over the same `*.ttf`
//! source set, writing every artifact into the fonts output directory.
//! Built-in converters produce a real WOFF container (zlib-compressed sfnt
//! tables) and a TTF passthrough for older fallback.
//!
//! After a full build, the style generator rewrites the `_fonts.css` include
//! consumed by the styles stage, unless the file already has content, which
//! is treated as authoritative. Regeneration is opt-in by clearing the file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::PipelineError;
use crate::paths::{AssetClass, PathSpec};
use crate::scanner;

/// Converts one source font into one target format.
pub trait FontConverter: Send + Sync {
    /// Extension of the produced file, without the dot
    fn extension(&self) -> &'static str;
    fn convert(&self, input: &[u8]) -> Result<Vec<u8>, String>;
}

/// The built-in format sub-runs, in execution order.
pub fn default_converters() -> Vec<Box<dyn FontConverter>> {
    vec![Box::new(WoffConverter), Box::new(TtfPassthrough)]
}

/// Run every converter sub-run over the font sources. Returns the written
/// paths with their byte counts; the caller owns stats and notification.
pub fn convert_fonts(
    spec: &PathSpec,
    converters: &[Box<dyn FontConverter>],
) -> Result<Vec<(PathBuf, u64)>, PipelineError> {
    let sources = scanner::expand(&spec.source_patterns)?;
    let mut written = Vec::new();

    for converter in converters {
        for source in &sources {
            let input = fs::read(&source.path).map_err(|e| PipelineError::ReadFailed {
                path: source.path.clone(),
                source: e,
            })?;
            let output = converter.convert(&input).map_err(|message| {
                PipelineError::Transform {
                    stage: AssetClass::Fonts,
                    path: source.path.clone(),
                    message,
                }
            })?;

            let stem = source
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dest = spec
                .output_dir
                .join(format!("{stem}.{}", converter.extension()));

            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| PipelineError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            let bytes = output.len() as u64;
            fs::write(&dest, output).map_err(|e| PipelineError::WriteFailed {
                path: dest.clone(),
                source: e,
            })?;
            written.push((dest, bytes));
        }
    }

    Ok(written)
}

// ---------------------------------------------------------------------------
// WOFF encoding
// ---------------------------------------------------------------------------

/// TTF → WOFF: the sfnt tables wrapped in the WOFF container, each table
/// zlib-compressed when that shrinks it.
pub struct WoffConverter;

impl FontConverter for WoffConverter {
    fn extension(&self) -> &'static str {
        "woff"
    }

    fn convert(&self, input: &[u8]) -> Result<Vec<u8>, String> {
        encode_woff(input)
    }
}

/// Second format sub-run: the source TTF deployed as-is.
pub struct TtfPassthrough;

impl FontConverter for TtfPassthrough {
    fn extension(&self) -> &'static str {
        "ttf"
    }

    fn convert(&self, input: &[u8]) -> Result<Vec<u8>, String> {
        Ok(input.to_vec())
    }
}

struct SfntTable {
    tag: u32,
    checksum: u32,
    data: Vec<u8>,
}

fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

fn parse_sfnt(data: &[u8]) -> Result<(u32, Vec<SfntTable>), String> {
    if data.len() < 12 {
        return Err("font file too short for an sfnt header".to_string());
    }
    let flavor = be32(data, 0);
    if flavor != 0x0001_0000 && flavor != 0x4F54_544F {
        return Err(format!("unsupported sfnt version 0x{flavor:08X}"));
    }
    let num_tables = be16(data, 4) as usize;
    let directory_end = 12 + num_tables * 16;
    if num_tables == 0 || data.len() < directory_end {
        return Err("truncated sfnt table directory".to_string());
    }

    let mut tables = Vec::with_capacity(num_tables);
    for i in 0..num_tables {
        let at = 12 + i * 16;
        let tag = be32(data, at);
        let checksum = be32(data, at + 4);
        let offset = be32(data, at + 8) as usize;
        let length = be32(data, at + 12) as usize;
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| "sfnt table outside file bounds".to_string())?;
        tables.push(SfntTable {
            tag,
            checksum,
            data: data[offset..end].to_vec(),
        });
    }

    Ok((flavor, tables))
}

fn zlib_compress(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| format!("zlib compression failed: {e}"))
}

/// Build the WOFF 1.0 container around the parsed sfnt tables. Directory
/// order is preserved from the source font.
fn encode_woff(ttf: &[u8]) -> Result<Vec<u8>, String> {
    const HEADER_LEN: usize = 44;
    const DIR_ENTRY_LEN: usize = 20;

    let (flavor, tables) = parse_sfnt(ttf)?;
    let num_tables = tables.len();

    // Stored payload per table: compressed when smaller, raw otherwise
    let mut payloads = Vec::with_capacity(num_tables);
    for table in &tables {
        let compressed = zlib_compress(&table.data)?;
        if compressed.len() < table.data.len() {
            payloads.push(compressed);
        } else {
            payloads.push(table.data.clone());
        }
    }

    let directory_end = HEADER_LEN + num_tables * DIR_ENTRY_LEN;
    let total_len: usize = directory_end
        + payloads.iter().map(|p| pad4(p.len())).sum::<usize>();
    let total_sfnt_size: usize =
        12 + num_tables * 16 + tables.iter().map(|t| pad4(t.data.len())).sum::<usize>();

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(b"wOFF");
    out.extend_from_slice(&flavor.to_be_bytes());
    out.extend_from_slice(&(total_len as u32).to_be_bytes());
    out.extend_from_slice(&(num_tables as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // reserved
    out.extend_from_slice(&(total_sfnt_size as u32).to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // majorVersion
    out.extend_from_slice(&0u16.to_be_bytes()); // minorVersion
    out.extend_from_slice(&[0u8; 20]); // no metadata or private blocks

    let mut offset = directory_end;
    for (table, payload) in tables.iter().zip(&payloads) {
        out.extend_from_slice(&table.tag.to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&(table.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&table.checksum.to_be_bytes());
        offset += pad4(payload.len());
    }

    for payload in &payloads {
        out.extend_from_slice(payload);
        out.resize(pad4(out.len()), 0);
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Font style include generation
// ---------------------------------------------------------------------------

/// Family name derived from an output file name: everything before the
/// first dot.
pub fn font_family_name(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// Collapse consecutive duplicate names, comparing each entry only against
/// the immediately preceding one. Reordering the input can therefore change
/// the result; downstream consumers depend on this exact behavior.
pub fn dedup_adjacent(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if out.last().map(String::as_str) != Some(name.as_str()) {
            out.push(name.clone());
        }
    }
    out
}

fn font_face_decl(family: &str) -> String {
    format!(
        "@font-face {{\n  font-family: \"{family}\";\n  src: url(\"../fonts/{family}.woff\") format(\"woff\"),\n    url(\"../fonts/{family}.ttf\") format(\"truetype\");\n  font-weight: 400;\n  font-style: normal;\n}}\n"
    )
}

/// Rewrite the font style include from the fonts output directory listing.
///
/// Existing content is authoritative: a non-empty include file is left
/// untouched and `Ok(false)` is returned. Otherwise the file is truncated
/// (created if missing) and one declaration is appended per distinct
/// consecutive family name in directory-read order.
pub fn generate_font_styles(
    include_file: &Path,
    fonts_dir: &Path,
) -> Result<bool, PipelineError> {
    match fs::read_to_string(include_file) {
        Ok(content) if !content.is_empty() => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(PipelineError::ReadFailed {
                path: include_file.to_path_buf(),
                source: e,
            })
        }
    }

    if let Some(parent) = include_file.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::CreateDirFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let names: Vec<String> = match fs::read_dir(fonts_dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| font_family_name(&e.file_name().to_string_lossy()).to_string())
            .collect(),
        // No font output yet: leave an empty include behind
        Err(_) => Vec::new(),
    };

    let mut content = String::new();
    for family in dedup_adjacent(&names) {
        content.push_str(&font_face_decl(&family));
    }

    fs::write(include_file, content).map_err(|e| PipelineError::WriteFailed {
        path: include_file.to_path_buf(),
        source: e,
    })?;

    Ok(true)
}

/// Minimal valid sfnt (header plus one dummy table) for test fixtures
#[cfg(test)]
pub(crate) fn sample_ttf() -> Vec<u8> {
    let table: Vec<u8> = (0u8..64).collect();
    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // numTables
    out.extend_from_slice(&16u16.to_be_bytes()); // searchRange
    out.extend_from_slice(&0u16.to_be_bytes()); // entrySelector
    out.extend_from_slice(&0u16.to_be_bytes()); // rangeShift
    out.extend_from_slice(b"name");
    out.extend_from_slice(&0u32.to_be_bytes()); // checksum
    out.extend_from_slice(&28u32.to_be_bytes()); // offset
    out.extend_from_slice(&(table.len() as u32).to_be_bytes());
    out.extend_from_slice(&table);
    out
}
