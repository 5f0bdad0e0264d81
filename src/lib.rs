//! # aozora2epub
//!
//! A CLI utility to convert an Aozora Bunko work page into an EPUB file.
//!
//! ## Current Features
//!
//! - Ruby and gaiji cleanup of the work's main text
//! - Well-formed XHTML chapters, navigation document and NCX
//! - Post-mortem validation when writing the archive fails
//!
//! ## Usage
//!
//! ```bash
//! aozora2epub convert https://www.aozora.gr.jp/cards/000051/files/47086_27953.html \
//!     --title "淡島寒月氏" --author "幸田露伴" --card_id 000051 --file_id 47086_27953
//! ```

mod archive;
mod assembler;
mod book;
mod chapter;
mod config;
mod error;
mod fetch;
mod sanitize;
mod templates;
mod validate;

pub use archive::{package_document, ArchiveWriter, EpubWriter};
pub use assembler::{archive_file_name, Assembler, BookRequest, PLACEHOLDER_CONTENT};
pub use book::{Book, ManifestItem, Metadata, Package, SpineEntry, TocEntry};
pub use chapter::{Chapter, ChapterBuilder};
pub use config::{Config, FetchConfig};
pub use error::{ArchiveError, FetchError, PipelineError, Stage};
pub use fetch::{Fetch, FetchedPage, HttpFetcher};
pub use sanitize::{sanitize, strip_invalid_xml_chars, Recovered};
pub use templates::STYLESHEET;
pub use validate::{validate_all, ArchiveValidator, Epubcheck, StructuralCheck, ValidationReport};
