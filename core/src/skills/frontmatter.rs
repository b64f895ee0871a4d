//! Minimal parser for `---` fenced front-matter. Supports scalar string
//! keys, single- and double-quoted values, and one nested single-level map
//! (used for `metadata`). Deliberately not a YAML engine.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrontMatterError {
    #[error("document does not start with a `---` front-matter fence")]
    MissingOpeningFence,
    #[error("front-matter is not terminated by a closing `---` fence")]
    UnterminatedFence,
    #[error("malformed front-matter line {line}: {text:?}")]
    MalformedLine { line: usize, text: String },
    #[error("duplicate key {0:?}")]
    DuplicateKey(String),
}

/// Parsed front-matter: top-level scalars, nested maps, and the body that
/// follows the closing fence.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FrontMatter {
    pub scalars: BTreeMap<String, String>,
    pub maps: BTreeMap<String, BTreeMap<String, String>>,
    pub body: String,
}

pub fn parse(input: &str) -> Result<FrontMatter, FrontMatterError> {
    let mut lines = input.split_inclusive('\n');
    match lines.next().map(trim_line_end) {
        Some("---") => {}
        _ => return Err(FrontMatterError::MissingOpeningFence),
    }

    let mut out = FrontMatter::default();
    let mut open_map: Option<String> = None;
    let mut line_no = 1;
    let mut closed = false;

    for raw in lines.by_ref() {
        line_no += 1;
        let line = trim_line_end(raw);
        if line == "---" {
            closed = true;
            break;
        }
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        let (key, value) = split_key_value(line, line_no)?;

        if indented {
            let Some(map_key) = &open_map else {
                return Err(FrontMatterError::MalformedLine {
                    line: line_no,
                    text: line.to_string(),
                });
            };
            let map = out.maps.entry(map_key.clone()).or_default();
            if map.insert(key.clone(), value).is_some() {
                return Err(FrontMatterError::DuplicateKey(key));
            }
            continue;
        }

        if value.is_empty() {
            // `metadata:` opens a nested single-level map.
            if out.maps.contains_key(&key) || out.scalars.contains_key(&key) {
                return Err(FrontMatterError::DuplicateKey(key));
            }
            out.maps.insert(key.clone(), BTreeMap::new());
            open_map = Some(key);
            continue;
        }

        open_map = None;
        if out.scalars.insert(key.clone(), value).is_some() {
            return Err(FrontMatterError::DuplicateKey(key));
        }
    }

    if !closed {
        return Err(FrontMatterError::UnterminatedFence);
    }

    out.body = lines.collect();
    Ok(out)
}

fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn split_key_value(line: &str, line_no: usize) -> Result<(String, String), FrontMatterError> {
    let trimmed = line.trim();
    let Some((key, value)) = trimmed.split_once(':') else {
        return Err(FrontMatterError::MalformedLine {
            line: line_no,
            text: line.to_string(),
        });
    };
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(FrontMatterError::MalformedLine {
            line: line_no,
            text: line.to_string(),
        });
    }
    Ok((key.to_string(), unquote(value.trim())))
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[bytes.len() - 1] == first {
            let inner = &value[1..value.len() - 1];
            return if first == b'"' {
                inner.replace("\\\"", "\"").replace("\\\\", "\\")
            } else {
                inner.replace("''", "'")
            };
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_scalars_and_body() {
        let doc = "---\nname: fix-tests\ndescription: Repairs failing tests\n---\nBody text.\n";
        let fm = parse(doc).unwrap();
        assert_eq!(fm.scalars["name"], "fix-tests");
        assert_eq!(fm.scalars["description"], "Repairs failing tests");
        assert_eq!(fm.body, "Body text.\n");
    }

    #[test]
    fn parses_quoted_values() {
        let doc = "---\nname: demo\ndescription: \"colon: inside\"\nlicense: 'MIT'\n---\n";
        let fm = parse(doc).unwrap();
        assert_eq!(fm.scalars["description"], "colon: inside");
        assert_eq!(fm.scalars["license"], "MIT");
    }

    #[test]
    fn parses_single_level_metadata_map() {
        let doc = "---\nname: demo\nmetadata:\n  author: dev\n  team: tools\n---\n";
        let fm = parse(doc).unwrap();
        assert_eq!(fm.maps["metadata"]["author"], "dev");
        assert_eq!(fm.maps["metadata"]["team"], "tools");
    }

    #[test]
    fn missing_fence_is_an_error() {
        assert_eq!(parse("name: demo\n"), Err(FrontMatterError::MissingOpeningFence));
        assert_eq!(
            parse("---\nname: demo\n"),
            Err(FrontMatterError::UnterminatedFence)
        );
    }

    #[test]
    fn malformed_lines_are_rejected_with_position() {
        let doc = "---\nname demo\n---\n";
        assert_eq!(
            parse(doc),
            Err(FrontMatterError::MalformedLine {
                line: 2,
                text: "name demo".to_string()
            })
        );
    }

    #[test]
    fn indented_line_without_open_map_is_malformed() {
        let doc = "---\n  stray: value\n---\n";
        assert!(matches!(
            parse(doc),
            Err(FrontMatterError::MalformedLine { line: 2, .. })
        ));
    }

    #[test]
    fn crlf_documents_parse() {
        let doc = "---\r\nname: demo\r\n---\r\nbody\r\n";
        let fm = parse(doc).unwrap();
        assert_eq!(fm.scalars["name"], "demo");
        assert_eq!(fm.body, "body\r\n");
    }
}
