//! The book aggregate and the frozen package handed to the archive writer.

use std::collections::HashSet;

use crate::chapter::Chapter;
use crate::error::{PipelineError, Result, Stage};
use crate::sanitize::strip_invalid_xml_chars;
use crate::templates::{NAV_ID, NCX_ID, STYLESHEET_ID};

pub const DEFAULT_DESCRIPTION: &str = "No description provided.";

pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
pub const CSS_MEDIA_TYPE: &str = "text/css";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    identifier: String,
    language: String,
    title: String,
    author: String,
    description: String,
}

impl Metadata {
    /// Validates and normalizes the book metadata. Title and author are
    /// trimmed and must not end up empty.
    pub fn new(
        identifier: impl Into<String>,
        language: impl Into<String>,
        title: &str,
        author: &str,
        description: &str,
    ) -> Result<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PipelineError::MissingMetadata { field: "title" });
        }
        let author = author.trim();
        if author.is_empty() {
            return Err(PipelineError::MissingMetadata { field: "author" });
        }

        let description = match description.trim() {
            "" => DEFAULT_DESCRIPTION.to_string(),
            text => strip_invalid_xml_chars(text),
        };

        Ok(Self {
            identifier: identifier.into(),
            language: language.into(),
            title: title.to_string(),
            author: author.to_string(),
            description,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub filename: String,
    pub media_type: String,
    pub content: Vec<u8>,
    /// EPUB item properties, e.g. `nav`.
    pub properties: Option<String>,
}

impl ManifestItem {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        media_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            media_type: media_type.into(),
            content,
            properties: None,
        }
    }

    pub fn with_properties(mut self, properties: impl Into<String>) -> Self {
        self.properties = Some(properties.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineEntry {
    pub idref: String,
}

impl SpineEntry {
    pub fn new(idref: impl Into<String>) -> Self {
        Self {
            idref: idref.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub label: String,
    pub target: String,
}

impl TocEntry {
    pub fn new(label: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: target.into(),
        }
    }
}

/// Book under construction. Items are only ever appended.
#[derive(Debug, Clone)]
pub struct Book {
    metadata: Metadata,
    chapters: Vec<Chapter>,
    manifest: Vec<ManifestItem>,
    spine: Vec<SpineEntry>,
    toc: Vec<TocEntry>,
}

impl Book {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            chapters: Vec::new(),
            manifest: Vec::new(),
            spine: Vec::new(),
            toc: Vec::new(),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn manifest(&self) -> &[ManifestItem] {
        &self.manifest
    }

    pub fn spine(&self) -> &[SpineEntry] {
        &self.spine
    }

    pub fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    pub fn add_item(&mut self, item: ManifestItem, stage: Stage) -> Result<()> {
        if self.manifest.iter().any(|existing| existing.id == item.id) {
            return Err(PipelineError::DuplicateManifestItem {
                stage,
                what: "id",
                value: item.id,
            });
        }
        if self
            .manifest
            .iter()
            .any(|existing| existing.filename == item.filename)
        {
            return Err(PipelineError::DuplicateManifestItem {
                stage,
                what: "filename",
                value: item.filename,
            });
        }
        self.manifest.push(item);
        Ok(())
    }

    /// Registers the chapter document in the manifest and keeps the chapter.
    pub fn add_chapter(&mut self, chapter: Chapter) -> Result<()> {
        let item = ManifestItem::new(
            chapter.item_id(),
            chapter.filename(),
            XHTML_MEDIA_TYPE,
            chapter.document().to_vec(),
        );
        self.add_item(item, Stage::Content)?;
        self.chapters.push(chapter);
        Ok(())
    }

    pub fn push_toc(&mut self, entry: TocEntry) {
        self.toc.push(entry);
    }

    pub fn push_spine(&mut self, entry: SpineEntry) {
        self.spine.push(entry);
    }

    /// Checks the packaging invariants and freezes the book.
    pub fn freeze(self) -> Result<Package> {
        let incomplete = |reason: String| PipelineError::IncompleteBook { reason };

        if self.manifest.is_empty() {
            return Err(incomplete("manifest is empty".to_string()));
        }
        if self.spine.is_empty() {
            return Err(incomplete("spine is empty".to_string()));
        }
        if self.toc.is_empty() {
            return Err(incomplete("table of contents is empty".to_string()));
        }

        let ids: HashSet<&str> = self.manifest.iter().map(|i| i.id.as_str()).collect();
        let filenames: HashSet<&str> = self.manifest.iter().map(|i| i.filename.as_str()).collect();

        for required in [NCX_ID, NAV_ID, STYLESHEET_ID] {
            if !ids.contains(required) {
                return Err(incomplete(format!("manifest lacks the \"{}\" item", required)));
            }
        }
        for chapter in &self.chapters {
            if !filenames.contains(chapter.filename()) {
                return Err(incomplete(format!(
                    "manifest lacks chapter file {}",
                    chapter.filename()
                )));
            }
        }

        if self.spine[0].idref != NAV_ID {
            return Err(incomplete(
                "spine must start with the navigation document".to_string(),
            ));
        }
        if let Some(entry) = self.spine.iter().find(|e| !ids.contains(e.idref.as_str())) {
            return Err(incomplete(format!(
                "spine entry \"{}\" has no manifest item",
                entry.idref
            )));
        }
        if let Some(entry) = self.toc.iter().find(|e| !filenames.contains(e.target.as_str())) {
            return Err(incomplete(format!(
                "table of contents target {} has no manifest item",
                entry.target
            )));
        }

        // One table of contents entry per chapter, in chapter order.
        if self.toc.len() != self.chapters.len() {
            return Err(incomplete(format!(
                "table of contents has {} entries for {} chapters",
                self.toc.len(),
                self.chapters.len()
            )));
        }
        for (entry, chapter) in self.toc.iter().zip(&self.chapters) {
            if entry.label != chapter.title() || entry.target != chapter.filename() {
                return Err(incomplete(format!(
                    "table of contents entry {} does not match chapter {}",
                    entry.target,
                    chapter.filename()
                )));
            }
        }

        let reading_order: Vec<&str> = self.spine[1..].iter().map(|e| e.idref.as_str()).collect();
        let chapter_ids: Vec<String> = self.chapters.iter().map(|c| c.item_id()).collect();
        if reading_order != chapter_ids {
            return Err(incomplete(
                "spine must list the chapters in order after the navigation document".to_string(),
            ));
        }

        Ok(Package {
            metadata: self.metadata,
            manifest: self.manifest,
            spine: self.spine,
            toc: self.toc,
        })
    }
}

/// Read-only package description, valid by construction.
#[derive(Debug, Clone)]
pub struct Package {
    metadata: Metadata,
    manifest: Vec<ManifestItem>,
    spine: Vec<SpineEntry>,
    toc: Vec<TocEntry>,
}

impl Package {
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn manifest(&self) -> &[ManifestItem] {
        &self.manifest
    }

    pub fn spine(&self) -> &[SpineEntry] {
        &self.spine
    }

    pub fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    pub fn item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }
}
