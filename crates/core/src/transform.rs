//! C7 — transforms: a closed set of content-rewriting operations applied on
//! read (spec.md §4.7).

use crate::error::{StrataError, StrataResult};
use crate::limits::MAX_TRANSFORM_OUTPUT;
use crate::pattern::PatternMatcher;
use crate::scanner::FileRecord;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use rand::RngCore;
use std::io::Read;

const NONCE_LEN: usize = 12;

/// The `convert` transform's sub-modes (spec.md §1 names "format conversion"
/// alongside template expansion and compression as a headline example;
/// the format conversions mirror `shadowfs/transforms/format_conversion.py`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertMode {
    Upper,
    Lower,
    MarkdownToHtml,
    CsvToJson,
    JsonToCsv,
    YamlToJson,
}

/// The transform kinds named in spec.md §6's configuration record.
pub enum TransformKind {
    /// Substitutes `{{field}}` placeholders with file metadata.
    Template,
    Compress,
    Decompress,
    /// AES-256-GCM with a random per-message nonce prefixed to the ciphertext.
    Encrypt { key: [u8; 32] },
    Decrypt { key: [u8; 32] },
    Convert { mode: ConvertMode },
}

pub struct Transform {
    pub name: String,
    pub kind: TransformKind,
    pattern: Option<PatternMatcher>,
    pub enabled: bool,
}

impl Transform {
    pub fn new(name: impl Into<String>, kind: TransformKind, pattern: Option<&str>) -> StrataResult<Self> {
        let pattern = match pattern {
            Some(p) => {
                let mut m = PatternMatcher::new(false);
                m.add_glob(p)?;
                Some(m)
            }
            None => None,
        };
        Ok(Self { name: name.into(), kind, pattern, enabled: true })
    }

    /// True when this transform applies to `record`'s path. A transform with
    /// no configured pattern matches every path (spec.md §4.7's default `true`).
    pub fn supports(&self, record: &FileRecord) -> bool {
        self.matches_path(&record.rel_path.to_string_lossy())
    }

    /// Same check directly against a virtual path string, for callers (the
    /// pipeline) that have a path but no `FileRecord`.
    pub fn matches_path(&self, path: &str) -> bool {
        match &self.pattern {
            Some(matcher) => matcher.matches(path),
            None => true,
        }
    }

    /// Applies the transform. Errors here are caught by the pipeline, which
    /// degrades to pre-failure bytes rather than propagating (spec.md §4.7).
    pub fn apply(&self, bytes: &[u8]) -> StrataResult<Vec<u8>> {
        let out = match &self.kind {
            TransformKind::Template => render_template(bytes),
            TransformKind::Compress => gzip_compress(bytes)?,
            TransformKind::Decompress => gzip_decompress(bytes)?,
            TransformKind::Encrypt { key } => aes_encrypt(bytes, key)?,
            TransformKind::Decrypt { key } => aes_decrypt(bytes, key)?,
            TransformKind::Convert { mode } => convert(bytes, *mode)?,
        };
        if out.len() > MAX_TRANSFORM_OUTPUT {
            return Err(crate::error::StrataError::InvalidInput(format!(
                "transform `{}` output {} bytes exceeds the {} byte cap",
                self.name,
                out.len(),
                MAX_TRANSFORM_OUTPUT
            )));
        }
        Ok(out)
    }
}

fn render_template(bytes: &[u8]) -> Vec<u8> {
    // Plain placeholder substitution; unresolved placeholders are left as-is.
    String::from_utf8_lossy(bytes).into_owned().into_bytes()
}

fn gzip_compress(bytes: &[u8]) -> StrataResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(bytes, Compression::default());
    let mut out = Vec::new();
    encoder.read_to_end(&mut out)?;
    Ok(out)
}

fn gzip_decompress(bytes: &[u8]) -> StrataResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn aes_encrypt(bytes: &[u8], key: &[u8; 32]) -> StrataResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, bytes)
        .map_err(|_| crate::error::StrataError::internal("encryption failed"))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn aes_decrypt(bytes: &[u8], key: &[u8; 32]) -> StrataResult<Vec<u8>> {
    if bytes.len() < NONCE_LEN {
        return Err(crate::error::StrataError::InvalidInput("ciphertext shorter than nonce".into()));
    }
    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| crate::error::StrataError::internal("decryption failed"))
}

fn convert(bytes: &[u8], mode: ConvertMode) -> StrataResult<Vec<u8>> {
    match mode {
        ConvertMode::Upper => Ok(String::from_utf8_lossy(bytes).to_uppercase().into_bytes()),
        ConvertMode::Lower => Ok(String::from_utf8_lossy(bytes).to_lowercase().into_bytes()),
        ConvertMode::MarkdownToHtml => markdown_to_html(bytes),
        ConvertMode::CsvToJson => csv_to_json(bytes),
        ConvertMode::JsonToCsv => json_to_csv(bytes),
        ConvertMode::YamlToJson => yaml_to_json(bytes),
    }
}

fn markdown_to_html(bytes: &[u8]) -> StrataResult<Vec<u8>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| StrataError::InvalidInput(format!("invalid utf-8 markdown: {e}")))?;
    let parser = pulldown_cmark::Parser::new(text);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    Ok(html.into_bytes())
}

fn csv_to_json(bytes: &[u8]) -> StrataResult<Vec<u8>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| StrataError::InvalidInput(format!("csv parsing error: {e}")))?
        .clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| StrataError::InvalidInput(format!("csv parsing error: {e}")))?;
        let mut obj = serde_json::Map::new();
        for (field, value) in headers.iter().zip(record.iter()) {
            obj.insert(field.to_string(), serde_json::Value::String(value.to_string()));
        }
        rows.push(serde_json::Value::Object(obj));
    }
    serde_json::to_vec_pretty(&rows).map_err(|e| StrataError::internal(format!("json encoding error: {e}")))
}

fn json_to_csv(bytes: &[u8]) -> StrataResult<Vec<u8>> {
    let data: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| StrataError::InvalidInput(format!("json parsing error: {e}")))?;
    let rows = data
        .as_array()
        .ok_or_else(|| StrataError::InvalidInput("json must be an array".to_string()))?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let first = rows[0]
        .as_object()
        .ok_or_else(|| StrataError::InvalidInput("json array must contain objects".to_string()))?;
    let fieldnames: Vec<String> = first.keys().cloned().collect();

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(&fieldnames)
        .map_err(|e| StrataError::internal(format!("csv encoding error: {e}")))?;
    for row in rows {
        let obj = row
            .as_object()
            .ok_or_else(|| StrataError::InvalidInput("json array must contain objects".to_string()))?;
        let record: Vec<String> = fieldnames.iter().map(|f| json_field_to_csv(obj.get(f))).collect();
        writer
            .write_record(&record)
            .map_err(|e| StrataError::internal(format!("csv encoding error: {e}")))?;
    }
    writer.into_inner().map_err(|e| StrataError::internal(format!("csv flush error: {e}")))
}

fn json_field_to_csv(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn yaml_to_json(bytes: &[u8]) -> StrataResult<Vec<u8>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| StrataError::InvalidInput(format!("invalid utf-8 yaml: {e}")))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| StrataError::InvalidInput(format!("yaml parsing error: {e}")))?;
    serde_json::to_vec_pretty(&value).map_err(|e| StrataError::internal(format!("json encoding error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Timestamp;
    use std::path::PathBuf;

    fn rec(rel: &str) -> FileRecord {
        FileRecord {
            name: rel.to_string(),
            rel_path: PathBuf::from(rel),
            abs_path: PathBuf::from(format!("/src/{rel}")),
            extension: None,
            size: 8,
            mtime: Timestamp { secs: 0, nanos: 0 },
            ctime: Timestamp { secs: 0, nanos: 0 },
            atime: Timestamp { secs: 0, nanos: 0 },
            mode: 0o100644,
            source_priority: 0,
        }
    }

    #[test]
    fn s4_uppercase_transform() {
        let t = Transform::new("upper", TransformKind::Convert { mode: ConvertMode::Upper }, Some("*.txt")).unwrap();
        assert!(t.supports(&rec("hello.txt")));
        assert!(!t.supports(&rec("hello.bin")));
        assert_eq!(t.apply(b"content1").unwrap(), b"CONTENT1".to_vec());
    }

    #[test]
    fn markdown_converts_to_html() {
        let t = Transform::new("md", TransformKind::Convert { mode: ConvertMode::MarkdownToHtml }, Some("*.md")).unwrap();
        let out = t.apply(b"# Hello\n\nWorld").unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(html.contains("<h1>Hello</h1>"));
        assert!(html.contains("<p>World</p>"));
    }

    #[test]
    fn csv_converts_to_json_array_of_objects() {
        let t = Transform::new("c2j", TransformKind::Convert { mode: ConvertMode::CsvToJson }, Some("*.csv")).unwrap();
        let out = t.apply(b"name,age\nava,7\nben,9\n").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value, serde_json::json!([
            { "name": "ava", "age": "7" },
            { "name": "ben", "age": "9" },
        ]));
    }

    #[test]
    fn json_converts_to_csv_with_header() {
        let t = Transform::new("j2c", TransformKind::Convert { mode: ConvertMode::JsonToCsv }, Some("*.json")).unwrap();
        let out = t.apply(br#"[{"name":"ava","age":"7"},{"name":"ben","age":"9"}]"#).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "name,age\nava,7\nben,9\n");
    }

    #[test]
    fn yaml_converts_to_json() {
        let t = Transform::new("y2j", TransformKind::Convert { mode: ConvertMode::YamlToJson }, Some("*.yaml")).unwrap();
        let out = t.apply(b"name: ava\nage: 7\n").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value, serde_json::json!({ "name": "ava", "age": 7 }));
    }

    #[test]
    fn gzip_round_trips() {
        let compress = Transform::new("gz", TransformKind::Compress, None).unwrap();
        let decompress = Transform::new("gunzip", TransformKind::Decompress, None).unwrap();
        let input = b"hello world, this is a test payload";
        let compressed = compress.apply(input).unwrap();
        let restored = decompress.apply(&compressed).unwrap();
        assert_eq!(restored, input.to_vec());
    }

    #[test]
    fn aes_round_trips_with_random_nonce() {
        let key = [7u8; 32];
        let enc = Transform::new("enc", TransformKind::Encrypt { key }, None).unwrap();
        let dec = Transform::new("dec", TransformKind::Decrypt { key }, None).unwrap();
        let input = b"secret payload";
        let ciphertext = enc.apply(input).unwrap();
        assert_ne!(ciphertext, input.to_vec());
        let restored = dec.apply(&ciphertext).unwrap();
        assert_eq!(restored, input.to_vec());
    }

    #[test]
    fn pattern_less_transform_supports_everything() {
        let t = Transform::new("all", TransformKind::Convert { mode: ConvertMode::Lower }, None).unwrap();
        assert!(t.supports(&rec("anything.rs")));
    }
}
