//! Post-mortem inspection of written archives.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use zip::{CompressionMethod, ZipArchive};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub validator: String,
    pub valid: bool,
    pub messages: Vec<String>,
}

/// Classifies an archive as structurally valid or not. `None` means the
/// validator could not run at all.
pub trait ArchiveValidator {
    fn validate(&self, path: &Path) -> Option<ValidationReport>;
}

/// Zip-level checks: mimetype entry, container document, package document
/// and every file it references.
#[derive(Debug, Clone, Default)]
pub struct StructuralCheck;

impl StructuralCheck {
    pub fn new() -> Self {
        Self
    }

    fn inspect(path: &Path) -> Result<Vec<String>, String> {
        let file = File::open(path).map_err(|e| format!("cannot open archive: {}", e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| format!("not a zip archive: {}", e))?;
        let mut problems = Vec::new();

        match archive.by_index(0) {
            Ok(mut first) => {
                if first.name() != "mimetype" {
                    problems.push(format!("first entry is \"{}\", not mimetype", first.name()));
                } else {
                    if first.compression() != CompressionMethod::Stored {
                        problems.push("mimetype entry is compressed".to_string());
                    }
                    let mut mimetype = String::new();
                    if first.read_to_string(&mut mimetype).is_err()
                        || mimetype != "application/epub+zip"
                    {
                        problems.push("mimetype entry has wrong content".to_string());
                    }
                }
            }
            Err(_) => problems.push("archive is empty".to_string()),
        }

        let container = match read_entry(&mut archive, "META-INF/container.xml") {
            Some(container) => container,
            None => {
                problems.push("META-INF/container.xml is missing".to_string());
                return Ok(problems);
            }
        };

        let Some(rootfile) = rootfile_pattern()
            .captures(&container)
            .map(|caps| caps[1].to_string())
        else {
            problems.push("container.xml names no rootfile".to_string());
            return Ok(problems);
        };

        let Some(opf) = read_entry(&mut archive, &rootfile) else {
            problems.push(format!("package document {} is missing", rootfile));
            return Ok(problems);
        };

        let base = rootfile.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        for caps in href_pattern().captures_iter(&opf) {
            let href = caps[1].replace("&amp;", "&");
            let entry = if base.is_empty() {
                href
            } else {
                format!("{}/{}", base, href)
            };
            if archive.index_for_name(&entry).is_none() {
                problems.push(format!("manifest item {} is missing from the archive", entry));
            }
        }

        if !opf.contains("<spine") || !opf.contains("<itemref") {
            problems.push("package document has an empty spine".to_string());
        }

        Ok(problems)
    }
}

impl ArchiveValidator for StructuralCheck {
    fn validate(&self, path: &Path) -> Option<ValidationReport> {
        let messages = match Self::inspect(path) {
            Ok(problems) => problems,
            Err(reason) => vec![reason],
        };
        Some(ValidationReport {
            validator: "structural".to_string(),
            valid: messages.is_empty(),
            messages,
        })
    }
}

fn rootfile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<rootfile[^>]*full-path="([^"]+)""#).expect("rootfile pattern is valid")
    })
}

fn href_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<item\s[^>]*href="([^"]+)""#).expect("href pattern is valid")
    })
}

fn read_entry<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>, name: &str) -> Option<String> {
    let mut entry = archive.by_name(name).ok()?;
    let mut text = String::new();
    entry.read_to_string(&mut text).ok()?;
    Some(text)
}

/// Runs the external `epubcheck` tool when it is installed.
#[derive(Debug, Clone)]
pub struct Epubcheck {
    program: String,
}

impl Default for Epubcheck {
    fn default() -> Self {
        Self {
            program: "epubcheck".to_string(),
        }
    }
}

impl Epubcheck {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ArchiveValidator for Epubcheck {
    fn validate(&self, path: &Path) -> Option<ValidationReport> {
        let output = match Command::new(&self.program).arg(path).output() {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} is not installed, skipping validation", self.program);
                return None;
            }
            Err(e) => {
                warn!("Failed to run {}: {}", self.program, e);
                return None;
            }
        };

        let messages = String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
            .filter(|line| line.starts_with("ERROR") || line.starts_with("FATAL"))
            .map(str::to_string)
            .collect();

        Some(ValidationReport {
            validator: self.program.clone(),
            valid: output.status.success(),
            messages,
        })
    }
}

/// Runs each validator in turn, keeping the reports of those that ran.
pub fn validate_all(path: &Path, validators: &[&dyn ArchiveValidator]) -> Vec<ValidationReport> {
    validators
        .iter()
        .filter_map(|validator| validator.validate(path))
        .collect()
}
