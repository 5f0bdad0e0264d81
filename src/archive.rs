use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::book::Package;
use crate::error::ArchiveError;
use crate::sanitize::escape_xml;
use crate::templates::NCX_ID;

pub const CONTAINER_ROOT: &str = "OEBPS";
pub const PACKAGE_DOCUMENT: &str = "OEBPS/content.opf";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

/// Serializes a frozen package into an archive at `path`.
pub trait ArchiveWriter {
    fn write(&self, path: &Path, package: &Package) -> Result<(), ArchiveError>;
}

/// Writes EPUB 3 archives (with an NCX for older reading systems).
#[derive(Debug, Clone, Default)]
pub struct EpubWriter;

impl EpubWriter {
    pub fn new() -> Self {
        Self
    }

    pub fn write_to<W: Write + Seek>(&self, package: &Package, writer: W) -> Result<W, ArchiveError> {
        let mut zip = ZipWriter::new(writer);

        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        // mimetype must be the first entry and uncompressed
        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(CONTAINER_XML.as_bytes())?;

        let modified = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        zip.start_file(PACKAGE_DOCUMENT, deflated)?;
        zip.write_all(package_document(package, &modified).as_bytes())?;

        for item in package.manifest() {
            let path = format!("{}/{}", CONTAINER_ROOT, item.filename);
            debug!("Adding {} ({} bytes)", path, item.content.len());
            zip.start_file(path, deflated)?;
            zip.write_all(&item.content)?;
        }

        Ok(zip.finish()?)
    }
}

impl ArchiveWriter for EpubWriter {
    fn write(&self, path: &Path, package: &Package) -> Result<(), ArchiveError> {
        let file = File::create(path)?;
        let mut writer = self.write_to(package, BufWriter::new(file))?;
        writer.flush()?;
        Ok(())
    }
}

/// The OPF package document.
pub fn package_document(package: &Package, modified: &str) -> String {
    let metadata = package.metadata();
    let mut opf = String::new();

    opf.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
"#,
    );
    opf.push_str(&format!(
        "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
        escape_xml(metadata.identifier())
    ));
    opf.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        escape_xml(metadata.title())
    ));
    opf.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        escape_xml(metadata.language())
    ));
    opf.push_str(&format!(
        "    <dc:creator>{}</dc:creator>\n",
        escape_xml(metadata.author())
    ));
    opf.push_str(&format!(
        "    <dc:description>{}</dc:description>\n",
        escape_xml(metadata.description())
    ));
    opf.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        modified
    ));

    opf.push_str("  </metadata>\n  <manifest>\n");
    for item in package.manifest() {
        let properties = item
            .properties
            .as_deref()
            .map(|p| format!(" properties=\"{}\"", escape_xml(p)))
            .unwrap_or_default();
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
            escape_xml(&item.id),
            escape_xml(&item.filename),
            escape_xml(&item.media_type),
            properties
        ));
    }

    opf.push_str(&format!("  </manifest>\n  <spine toc=\"{}\">\n", NCX_ID));
    for entry in package.spine() {
        opf.push_str(&format!(
            "    <itemref idref=\"{}\"/>\n",
            escape_xml(&entry.idref)
        ));
    }
    opf.push_str("  </spine>\n</package>\n");
    opf
}
