use dom_smoothie::{Readability, TextMode};

use common::error::AppError;

/// Turns raw document bytes into ordered text segments, dispatched on the
/// declared MIME type.
#[derive(Debug, Clone, Default)]
pub struct ParsingProvider;

impl ParsingProvider {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &[u8], mime_type: &str) -> Result<Vec<String>, AppError> {
        let text = std::str::from_utf8(raw).map_err(|err| {
            AppError::CorruptInput(format!("document bytes are not valid UTF-8: {err}"))
        })?;

        match essence(mime_type) {
            "text/plain" | "text/markdown" => Ok(paragraphs(text)),
            "text/html" => {
                let config = dom_smoothie::Config {
                    text_mode: TextMode::Markdown,
                    ..Default::default()
                };
                let mut readability = Readability::new(text, None, Some(config))
                    .map_err(|err| AppError::CorruptInput(format!("unreadable HTML: {err}")))?;
                let article = readability
                    .parse()
                    .map_err(|err| AppError::CorruptInput(format!("unreadable HTML: {err}")))?;
                Ok(paragraphs(&article.text_content))
            }
            other => Err(AppError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Strip any `; charset=...` parameters from a MIME type.
fn essence(mime_type: &str) -> &str {
    mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .trim()
}

/// Blank-line separated paragraphs, trimmed, empties dropped.
fn paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_splits_on_blank_lines() {
        let parser = ParsingProvider::new();
        let input = b"First paragraph.\n\nSecond paragraph.\n\n\n\nThird.";
        let segments = parser.parse(input, "text/plain").expect("parse");
        assert_eq!(
            segments,
            vec!["First paragraph.", "Second paragraph.", "Third."]
        );
    }

    #[test]
    fn markdown_passes_through_with_charset_parameter() {
        let parser = ParsingProvider::new();
        let segments = parser
            .parse(b"# Title\n\nBody text.", "text/markdown; charset=utf-8")
            .expect("parse");
        assert_eq!(segments, vec!["# Title", "Body text."]);
    }

    #[test]
    fn html_is_reduced_to_readable_text() {
        let parser = ParsingProvider::new();
        let html = b"<html><head><title>T</title></head>\
            <body><article><p>Readable content lives here and carries enough \
            length to be considered the article body by the extractor.</p>\
            </article></body></html>";
        let segments = parser.parse(html, "text/html").expect("parse");
        assert!(!segments.is_empty());
        assert!(segments.join(" ").contains("Readable content"));
    }

    #[test]
    fn unknown_mime_is_unsupported() {
        let parser = ParsingProvider::new();
        let err = parser
            .parse(b"%PDF-1.4", "application/pdf")
            .expect_err("pdf is not handled");
        assert!(matches!(err, AppError::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_utf8_is_corrupt_input() {
        let parser = ParsingProvider::new();
        let err = parser
            .parse(&[0xff, 0xfe, 0x00], "text/plain")
            .expect_err("invalid bytes");
        assert!(matches!(err, AppError::CorruptInput(_)));
    }
}
