//! Drives a conversion: metadata, content, menu, post-process, packaging.

use std::num::NonZeroU32;
use std::path::PathBuf;

use colored::*;
use scraper::{Html, Selector};
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveWriter;
use crate::book::{
    Book, ManifestItem, Metadata, SpineEntry, TocEntry, CSS_MEDIA_TYPE, NCX_MEDIA_TYPE,
    XHTML_MEDIA_TYPE,
};
use crate::chapter::ChapterBuilder;
use crate::config::Config;
use crate::error::{PipelineError, Result, Stage};
use crate::fetch::Fetch;
use crate::templates::{
    navigation_document, ncx_document, NAV_FILENAME, NAV_ID, NCX_FILENAME, NCX_ID, STYLESHEET,
    STYLESHEET_ID, STYLESHEET_PATH,
};
use crate::validate::ArchiveValidator;

pub const MAIN_CONTENT_SELECTOR: &str = "div.main_text";
pub const PLACEHOLDER_CONTENT: &str =
    "<p>No content was found for this novel. This is a placeholder chapter.</p>";

const MAX_ARCHIVE_NAME_CHARS: usize = 63;
const FALLBACK_ARCHIVE_NAME: &str = "novel";

/// What the user asked to convert.
#[derive(Debug, Clone, Default)]
pub struct BookRequest {
    pub url: String,
    pub title: String,
    pub author: String,
    pub card_id: String,
    pub file_id: String,
    pub description: String,
}

impl BookRequest {
    pub fn identifier(&self) -> String {
        format!("aozora_{}_{}", self.card_id, self.file_id)
    }
}

pub struct Assembler {
    config: Config,
    request: BookRequest,
    book: Option<Book>,
    // Last stage that finished successfully.
    completed: Option<Stage>,
}

impl Assembler {
    pub fn new(config: Config, request: BookRequest) -> Self {
        Self {
            config,
            request,
            book: None,
            completed: None,
        }
    }

    pub fn book(&self) -> Option<&Book> {
        self.book.as_ref()
    }

    /// Runs every stage in order and returns the path of the written archive.
    pub async fn run<F: Fetch>(
        mut self,
        fetcher: &F,
        writer: &dyn ArchiveWriter,
        validator: Option<&dyn ArchiveValidator>,
    ) -> Result<PathBuf> {
        self.set_metadata()?;
        self.fetch_content(fetcher).await?;
        self.build_menu()?;
        self.post_process()?;
        self.package(writer, validator)
    }

    pub fn set_metadata(&mut self) -> Result<()> {
        self.begin(Stage::Metadata)?;
        info!("Setting metadata from command-line arguments...");
        let metadata = Metadata::new(
            self.request.identifier(),
            self.config.language.as_str(),
            &self.request.title,
            &self.request.author,
            &self.request.description,
        )?;
        debug!("Book identifier: {}", metadata.identifier());
        self.book = Some(Book::new(metadata));
        self.completed = Some(Stage::Metadata);
        Ok(())
    }

    pub async fn fetch_content<F: Fetch>(&mut self, fetcher: &F) -> Result<()> {
        self.begin(Stage::Content)?;
        info!("Fetching content...");
        let page = fetcher.fetch(&self.request.url).await?;
        let html = page.decode();
        self.add_page(&html)
    }

    /// Turns a decoded work page into the book's chapter.
    pub fn add_page(&mut self, html: &str) -> Result<()> {
        self.begin(Stage::Content)?;
        let language = self.config.language.clone();
        let book = self.book_mut(Stage::Content, Stage::Metadata)?;
        let document = Html::parse_document(html);

        if check_declared_metadata(&document, book.metadata()) {
            debug!("Keeping the provided title and author");
        }

        let title = book.metadata().title().to_string();
        let content = match main_content(&document) {
            Some(content) => content,
            None => {
                warn!("No main content found. Adding placeholder chapter.");
                PLACEHOLDER_CONTENT.to_string()
            }
        };

        // The whole main text is one chapter.
        let chapters = [(title, content)];
        let builder = ChapterBuilder::new(language);
        let mut id = NonZeroU32::MIN;
        for (title, content) in &chapters {
            let chapter = builder.build(content, title, id);
            for diagnostic in chapter.diagnostics() {
                debug!("{}: {}", chapter.filename(), diagnostic);
            }
            book.add_chapter(chapter)?;
            id = id.saturating_add(1);
        }

        debug!("Chapters created: {}", book.chapters().len());
        self.completed = Some(Stage::Content);
        Ok(())
    }

    pub fn build_menu(&mut self) -> Result<()> {
        self.begin(Stage::Menu)?;
        let book = self.book_mut(Stage::Menu, Stage::Metadata)?;
        info!("Building menu...");
        if book.chapters().is_empty() {
            return Err(PipelineError::NoChapters {
                stage: Stage::Menu,
                action: "include in the table of contents",
            });
        }

        let entries: Vec<TocEntry> = book
            .chapters()
            .iter()
            .map(|chapter| TocEntry::new(chapter.title(), chapter.filename()))
            .collect();
        for entry in entries {
            book.push_toc(entry);
        }

        debug!("TOC items: {}", book.toc().len());
        self.completed = Some(Stage::Menu);
        Ok(())
    }

    pub fn post_process(&mut self) -> Result<()> {
        self.begin(Stage::PostProcess)?;
        let book = self.book_mut(Stage::PostProcess, Stage::Metadata)?;
        info!("Adding NCX and navigation document...");

        let ncx = ncx_document(book.metadata(), book.toc());
        book.add_item(
            ManifestItem::new(NCX_ID, NCX_FILENAME, NCX_MEDIA_TYPE, ncx.into_bytes()),
            Stage::PostProcess,
        )?;

        let nav = navigation_document(book.metadata().language(), book.toc());
        book.add_item(
            ManifestItem::new(NAV_ID, NAV_FILENAME, XHTML_MEDIA_TYPE, nav.into_bytes())
                .with_properties("nav"),
            Stage::PostProcess,
        )?;

        book.add_item(
            ManifestItem::new(
                STYLESHEET_ID,
                STYLESHEET_PATH,
                CSS_MEDIA_TYPE,
                STYLESHEET.as_bytes().to_vec(),
            ),
            Stage::PostProcess,
        )?;

        let chapter_ids: Vec<String> = book.chapters().iter().map(|c| c.item_id()).collect();
        book.push_spine(SpineEntry::new(NAV_ID));
        for id in chapter_ids {
            book.push_spine(SpineEntry::new(id));
        }

        debug!(
            "Spine: {:?}",
            book.spine().iter().map(|e| e.idref.as_str()).collect::<Vec<_>>()
        );
        debug!(
            "Items: {:?}",
            book.manifest()
                .iter()
                .map(|i| i.filename.as_str())
                .collect::<Vec<_>>()
        );
        self.completed = Some(Stage::PostProcess);
        Ok(())
    }

    /// Freezes the book and hands it to the archive writer.
    pub fn package(
        self,
        writer: &dyn ArchiveWriter,
        validator: Option<&dyn ArchiveValidator>,
    ) -> Result<PathBuf> {
        self.begin(Stage::Packaging)?;
        let book = self.book.ok_or(PipelineError::StageOrder {
            stage: Stage::Packaging,
            requires: Stage::Metadata,
        })?;
        info!("Building book...");
        if book.chapters().is_empty() {
            return Err(PipelineError::NoChapters {
                stage: Stage::Packaging,
                action: "build an archive from",
            });
        }

        let file_name = format!("{}.epub", archive_file_name(book.metadata().title()));
        let path = self.config.out_dir.join(file_name);
        let package = book.freeze()?;

        debug!("Writing archive with {} items", package.manifest().len());
        match writer.write(&path, &package) {
            Ok(()) => {
                info!("Finished. File saved as {}", path.display().to_string().green());
                Ok(path)
            }
            Err(source) => {
                error!("Error during archive writing: {}", source);
                let present = path.exists();
                if present {
                    warn!(
                        "{} was generated despite the error and may be invalid",
                        path.display().to_string().yellow()
                    );
                    inspect_leftover(&path, validator);
                } else {
                    error!("Archive file was not generated.");
                }
                Err(PipelineError::Write {
                    path,
                    present,
                    source,
                })
            }
        }
    }

    /// Each stage runs once, right after the one before it.
    fn begin(&self, stage: Stage) -> Result<()> {
        if self.completed >= Some(stage) {
            return Err(PipelineError::StageRepeated { stage });
        }
        match previous_stage(stage) {
            Some(requires) if self.completed != Some(requires) => {
                Err(PipelineError::StageOrder { stage, requires })
            }
            _ => Ok(()),
        }
    }

    fn book_mut(&mut self, stage: Stage, requires: Stage) -> Result<&mut Book> {
        self.book
            .as_mut()
            .ok_or(PipelineError::StageOrder { stage, requires })
    }
}

fn previous_stage(stage: Stage) -> Option<Stage> {
    match stage {
        Stage::Metadata => None,
        Stage::Content => Some(Stage::Metadata),
        Stage::Menu => Some(Stage::Content),
        Stage::PostProcess => Some(Stage::Menu),
        Stage::Packaging => Some(Stage::PostProcess),
    }
}

fn inspect_leftover(path: &std::path::Path, validator: Option<&dyn ArchiveValidator>) {
    let Some(validator) = validator else {
        return;
    };
    match validator.validate(path) {
        Some(report) if report.valid => {
            info!("Generated archive passed {} validation.", report.validator)
        }
        Some(report) => {
            warn!(
                "Generated archive failed {} validation: {:?}",
                report.validator, report.messages
            )
        }
        None => info!("Archive validation skipped: validator unavailable."),
    }
}

/// Warns when the page's own Dublin Core metadata disagrees with the
/// provided title and author, and returns whether it did. The provided
/// values are kept.
fn check_declared_metadata(document: &Html, metadata: &Metadata) -> bool {
    let declared = |name: &str| -> Option<String> {
        let selector = Selector::parse(&format!("meta[name=\"{}\"]", name)).ok()?;
        document
            .select(&selector)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .map(|content| content.trim().to_string())
    };

    match (declared("DC.Title"), declared("DC.Creator")) {
        (Some(title), Some(author))
            if title != metadata.title() || author != metadata.author() =>
        {
            warn!(
                "Provided title or author does not match page metadata (page: \"{}\" by \"{}\")",
                title, author
            );
            true
        }
        _ => false,
    }
}

fn main_content(document: &Html) -> Option<String> {
    let selector = Selector::parse(MAIN_CONTENT_SELECTOR).ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.inner_html())
}

/// Derives the archive base name from a title: letters, digits, whitespace
/// and hyphens survive, whitespace becomes `_`.
pub fn archive_file_name(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .take(MAX_ARCHIVE_NAME_CHARS)
        .collect();
    let name: String = kept
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    if name.is_empty() {
        FALLBACK_ARCHIVE_NAME.to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ArchiveError, FetchError};
    use crate::fetch::FetchedPage;
    use crate::book::Package;
    use std::cell::Cell;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticPage {
        html: String,
        calls: AtomicUsize,
    }

    impl StaticPage {
        fn new(html: &str) -> Self {
            Self {
                html: html.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Fetch for StaticPage {
        async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedPage {
                url: url::Url::parse(url).unwrap(),
                bytes: self.html.as_bytes().to_vec(),
                declared_encoding: Some("utf-8".to_string()),
            })
        }
    }

    struct FailingWriter {
        leave_file: bool,
    }

    impl ArchiveWriter for FailingWriter {
        fn write(&self, path: &Path, _package: &Package) -> std::result::Result<(), ArchiveError> {
            if self.leave_file {
                std::fs::write(path, b"PK")?;
            }
            Err(ArchiveError::Io(std::io::Error::other("simulated failure")))
        }
    }

    struct RecordingValidator {
        calls: Cell<usize>,
    }

    impl ArchiveValidator for RecordingValidator {
        fn validate(&self, _path: &Path) -> Option<crate::validate::ValidationReport> {
            self.calls.set(self.calls.get() + 1);
            None
        }
    }

    const PAGE: &str = r#"<html><head>
<meta name="DC.Title" content="淡島寒月氏" />
<meta name="DC.Creator" content="幸田露伴" />
</head><body>
<div class="main_text"><ruby><rb>露伴</rb><rp>(</rp><rt>ろはん</rt><rp>)</rp></ruby>を読む<img src="x.png" alt="g" class="gaiji" />。<br />
<div class="jisage_2" style="margin-left: 2em">二行目</div></div>
</body></html>"#;

    fn request(title: &str, author: &str) -> BookRequest {
        BookRequest {
            url: "https://www.aozora.gr.jp/cards/000051/files/47086_27953.html".to_string(),
            title: title.to_string(),
            author: author.to_string(),
            card_id: "000051".to_string(),
            file_id: "47086_27953".to_string(),
            description: String::new(),
        }
    }

    fn assembled(html: &str) -> Assembler {
        let mut assembler = Assembler::new(Config::default(), request("淡島寒月氏", "幸田露伴"));
        assembler.set_metadata().unwrap();
        assembler.add_page(html).unwrap();
        assembler.build_menu().unwrap();
        assembler.post_process().unwrap();
        assembler
    }

    #[test]
    fn archive_name_keeps_letters_digits_and_hyphens() {
        assert_eq!(archive_file_name("A/B: Test"), "AB_Test");
        assert_eq!(archive_file_name("淡島寒月氏"), "淡島寒月氏");
        assert_eq!(archive_file_name("well-known  tale"), "well-known__tale");
        assert_eq!(archive_file_name("  padded  "), "padded");
    }

    #[test]
    fn archive_name_falls_back_when_nothing_survives() {
        assert_eq!(archive_file_name("!!!"), "novel");
        assert_eq!(archive_file_name("   "), "novel");
    }

    #[test]
    fn archive_name_is_bounded() {
        let long = "x".repeat(200);
        assert_eq!(archive_file_name(&long).chars().count(), 63);
        let long_kanji = "漢".repeat(100);
        assert_eq!(archive_file_name(&long_kanji).chars().count(), 63);
    }

    #[test]
    fn identifier_combines_card_and_file() {
        assert_eq!(
            request("t", "a").identifier(),
            "aozora_000051_47086_27953"
        );
    }

    #[tokio::test]
    async fn empty_metadata_stops_before_fetching() {
        for (title, author) in [("", "幸田露伴"), ("淡島寒月氏", "  ")] {
            let fetcher = StaticPage::new(PAGE);
            let dir = tempfile::tempdir().unwrap();
            let assembler = Assembler::new(Config::new(dir.path()), request(title, author));
            let err = assembler
                .run(&fetcher, &crate::archive::EpubWriter::new(), None)
                .await
                .unwrap_err();
            assert_eq!(err.stage(), Stage::Metadata);
            assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn fetch_content_uses_fetcher_once() {
        let fetcher = StaticPage::new(PAGE);
        let mut assembler = Assembler::new(Config::default(), request("淡島寒月氏", "幸田露伴"));
        assembler.set_metadata().unwrap();
        assembler.fetch_content(&fetcher).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(assembler.book().unwrap().chapters().len(), 1);
    }

    #[test]
    fn main_text_becomes_single_sanitized_chapter() {
        let assembler = assembled(PAGE);
        let book = assembler.book().unwrap();
        assert_eq!(book.chapters().len(), 1);

        let chapter = &book.chapters()[0];
        assert_eq!(chapter.title(), "淡島寒月氏");
        assert_eq!(chapter.filename(), "chapter_1.xhtml");
        assert!(chapter.content().starts_with("露伴を読む。<br />"));
        assert!(chapter.content().contains("<div>二行目</div>"));
        assert!(!chapter.content().contains("gaiji"));
    }

    #[test]
    fn missing_main_text_yields_placeholder() {
        let assembler = assembled("<html><body><p>Nothing here</p></body></html>");
        let book = assembler.book().unwrap();
        assert_eq!(book.chapters().len(), 1);
        assert_eq!(book.chapters()[0].content(), PLACEHOLDER_CONTENT);
    }

    #[test]
    fn mismatched_page_metadata_keeps_provided_values() {
        let metadata = Metadata::new("id", "ja", "淡島寒月氏", "幸田露伴", "").unwrap();
        let page = PAGE.replace("幸田露伴", "別人");
        assert!(check_declared_metadata(&Html::parse_document(&page), &metadata));
        assert!(!check_declared_metadata(&Html::parse_document(PAGE), &metadata));
        assert!(!check_declared_metadata(
            &Html::parse_document("<html><body></body></html>"),
            &metadata
        ));

        let assembler = assembled(&page);
        let book = assembler.book().unwrap();
        assert_eq!(book.metadata().author(), "幸田露伴");
        assert_eq!(book.metadata().title(), "淡島寒月氏");
    }

    #[test]
    fn spine_starts_with_nav_and_follows_chapters() {
        let assembler = assembled(PAGE);
        let book = assembler.book().unwrap();

        let spine: Vec<&str> = book.spine().iter().map(|e| e.idref.as_str()).collect();
        assert_eq!(spine, vec![NAV_ID, "chapter_1"]);

        assert_eq!(book.toc().len(), book.chapters().len());
        for (entry, chapter) in book.toc().iter().zip(book.chapters()) {
            assert_eq!(entry.label, chapter.title());
            assert_eq!(entry.target, chapter.filename());
        }

        let filenames: Vec<&str> = book.manifest().iter().map(|i| i.filename.as_str()).collect();
        for required in ["chapter_1.xhtml", NCX_FILENAME, NAV_FILENAME, STYLESHEET_PATH] {
            assert!(filenames.contains(&required), "missing {}", required);
        }
    }

    #[test]
    fn navigation_document_links_chapters() {
        let assembler = assembled(PAGE);
        let book = assembler.book().unwrap();
        let nav = book.manifest().iter().find(|i| i.id == NAV_ID).unwrap();
        let nav = String::from_utf8(nav.content.clone()).unwrap();
        assert!(nav.contains(r#"<li><a href="chapter_1.xhtml">淡島寒月氏</a></li>"#));
        assert_eq!(nav_properties(book), Some("nav"));
    }

    fn nav_properties(book: &Book) -> Option<&str> {
        book.manifest()
            .iter()
            .find(|i| i.id == NAV_ID)
            .and_then(|i| i.properties.as_deref())
    }

    #[test]
    fn stages_enforce_their_order() {
        let mut assembler = Assembler::new(Config::default(), request("t", "a"));
        let err = assembler.add_page(PAGE).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageOrder {
                stage: Stage::Content,
                requires: Stage::Metadata
            }
        ));

        assembler.set_metadata().unwrap();
        let err = assembler.post_process().unwrap_err();
        assert!(matches!(err, PipelineError::StageOrder { requires: Stage::Menu, .. }));

        let err = assembler.build_menu().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageOrder {
                stage: Stage::Menu,
                requires: Stage::Content
            }
        ));
    }

    #[test]
    fn finished_stages_cannot_run_again() {
        let mut assembler = Assembler::new(Config::default(), request("淡島寒月氏", "幸田露伴"));
        assembler.set_metadata().unwrap();
        assembler.add_page(PAGE).unwrap();

        let err = assembler.set_metadata().unwrap_err();
        assert!(matches!(err, PipelineError::StageRepeated { stage: Stage::Metadata }));
        assert_eq!(assembler.book().unwrap().chapters().len(), 1);

        let err = assembler.add_page(PAGE).unwrap_err();
        assert!(matches!(err, PipelineError::StageRepeated { stage: Stage::Content }));

        assembler.build_menu().unwrap();
        let err = assembler.build_menu().unwrap_err();
        assert!(matches!(err, PipelineError::StageRepeated { stage: Stage::Menu }));
        assert_eq!(assembler.book().unwrap().toc().len(), 1);

        assembler.post_process().unwrap();
        let err = assembler.post_process().unwrap_err();
        assert!(matches!(err, PipelineError::StageRepeated { stage: Stage::PostProcess }));
        assert_eq!(assembler.book().unwrap().spine().len(), 2);

        let dir = tempfile::tempdir().unwrap();
        assembler.config.out_dir = dir.path().to_path_buf();
        let path = assembler
            .package(&crate::archive::EpubWriter::new(), None)
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn menu_without_chapters_fails() {
        let mut assembler = Assembler::new(Config::default(), request("t", "a"));
        assembler.set_metadata().unwrap();
        assembler.completed = Some(Stage::Content);
        let err = assembler.build_menu().unwrap_err();
        assert!(matches!(err, PipelineError::NoChapters { stage: Stage::Menu, .. }));
    }

    #[test]
    fn package_writes_named_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut assembler = Assembler::new(Config::new(dir.path()), request("A/B: Test", "a"));
        assembler.set_metadata().unwrap();
        assembler.add_page(PAGE).unwrap();
        assembler.build_menu().unwrap();
        assembler.post_process().unwrap();

        let path = assembler
            .package(&crate::archive::EpubWriter::new(), None)
            .unwrap();
        assert_eq!(path, dir.path().join("AB_Test.epub"));
        assert!(path.exists());
    }

    #[test]
    fn write_failure_with_leftover_file_is_inspected() {
        let dir = tempfile::tempdir().unwrap();
        let mut assembler = Assembler::new(Config::new(dir.path()), request("淡島寒月氏", "幸田露伴"));
        assembler.set_metadata().unwrap();
        assembler.add_page(PAGE).unwrap();
        assembler.build_menu().unwrap();
        assembler.post_process().unwrap();

        let validator = RecordingValidator {
            calls: Cell::new(0),
        };
        let err = assembler
            .package(&FailingWriter { leave_file: true }, Some(&validator))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Write { present: true, .. }));
        assert_eq!(validator.calls.get(), 1);
    }

    #[test]
    fn write_failure_without_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut assembler = Assembler::new(Config::new(dir.path()), request("淡島寒月氏", "幸田露伴"));
        assembler.set_metadata().unwrap();
        assembler.add_page(PAGE).unwrap();
        assembler.build_menu().unwrap();
        assembler.post_process().unwrap();

        let validator = RecordingValidator {
            calls: Cell::new(0),
        };
        let err = assembler
            .package(&FailingWriter { leave_file: false }, Some(&validator))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Write { present: false, .. }));
        assert_eq!(validator.calls.get(), 0);
    }
}
