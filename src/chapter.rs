//! Wraps a sanitized fragment into a standalone XHTML chapter document.

use std::num::NonZeroU32;

use crate::sanitize::{escape_xml, sanitize};
use crate::templates::STYLESHEET_PATH;

/// One sanitized XHTML content document of the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    id: NonZeroU32,
    title: String,
    content: String,
    filename: String,
    document: Vec<u8>,
    diagnostics: Vec<String>,
}

impl Chapter {
    pub fn id(&self) -> NonZeroU32 {
        self.id
    }

    /// Manifest id of the chapter document.
    pub fn item_id(&self) -> String {
        format!("chapter_{}", self.id)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Sanitized fragment placed under the chapter heading.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Full XHTML document, UTF-8 encoded.
    pub fn document(&self) -> &[u8] {
        &self.document
    }

    /// Repairs the sanitizer made while building this chapter.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }
}

pub fn chapter_filename(id: NonZeroU32) -> String {
    format!("chapter_{}.xhtml", id)
}

/// Wraps sanitized fragments into standalone chapter documents.
#[derive(Debug, Clone)]
pub struct ChapterBuilder {
    language: String,
}

impl ChapterBuilder {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    pub fn build(&self, raw_content: &str, title: &str, id: NonZeroU32) -> Chapter {
        let recovered = sanitize(raw_content);
        let title_text = escape_xml(title);

        let document = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}" lang="{lang}">
<head>
    <title>{title}</title>
    <link rel="stylesheet" type="text/css" href="{css}"/>
</head>
<body>
    <h3>{title}</h3>
    {content}
</body>
</html>"#,
            lang = escape_xml(&self.language),
            title = title_text,
            css = STYLESHEET_PATH,
            content = recovered.value,
        );

        Chapter {
            id,
            title: title.to_string(),
            content: recovered.value,
            filename: chapter_filename(id),
            document: document.into_bytes(),
            diagnostics: recovered.diagnostics,
        }
    }
}
