// Document loader
// Reads corpus files of the supported formats and normalizes them into text units


use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use pulldown_cmark::{Event, Parser, TagEnd};
use quick_xml::events::Event as XmlEvent;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{RagError, Result};

/// File formats the loader knows how to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Text,
    Markdown,
    Docx,
}

impl DocumentFormat {
    pub const SUPPORTED_EXTENSIONS: [&'static str; 4] = ["pdf", "txt", "md", "docx"];

    /// Case-insensitive lookup by file extension (without the dot)
    #[inline]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Text),
            "md" => Some(Self::Markdown),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    #[inline]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Formats loaded as one unit per page
    #[inline]
    pub fn is_paginated(self) -> bool {
        matches!(self, Self::Pdf)
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Docx => "docx",
        }
    }
}

/// Provenance attached to every unit produced from a corpus file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// File name, used for attribution and record identity
    pub source: String,
    /// Absolute path of the file
    pub file_path: String,
    /// Additional loader-specific attributes such as the format
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Normalized text of (part of) a corpus file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUnit {
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Outcome of scanning a corpus directory
#[derive(Debug, Default)]
pub struct LoadReport {
    pub units: Vec<DocumentUnit>,
    pub files_loaded: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
}

#[derive(Debug, Clone)]
pub struct DocumentLoader {
    documents_dir: PathBuf,
}

impl DocumentLoader {
    #[inline]
    pub fn new<P: Into<PathBuf>>(documents_dir: P) -> Self {
        Self {
            documents_dir: documents_dir.into(),
        }
    }

    #[inline]
    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    /// Load a single file
    ///
    /// Fails with `UnsupportedFormat` for unknown extensions and with `Load`
    /// when the file cannot be read or parsed.
    #[inline]
    pub fn load_file(&self, path: &Path) -> Result<Vec<DocumentUnit>> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| {
            RagError::UnsupportedFormat(
                path.extension()
                    .map(|ext| format!(".{}", ext.to_string_lossy()))
                    .unwrap_or_else(|| path.display().to_string()),
            )
        })?;

        let pages = match format {
            DocumentFormat::Text => read_text(path).map(|text| vec![text]),
            DocumentFormat::Markdown => read_text(path).map(|raw| vec![markdown_to_text(&raw)]),
            DocumentFormat::Pdf => read_pdf_pages(path),
            DocumentFormat::Docx => read_docx(path).map(|text| vec![text]),
        }
        .map_err(|message| RagError::Load {
            path: path.to_path_buf(),
            message,
        })?;

        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_path = fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();

        let mut extra = BTreeMap::new();
        extra.insert("format".to_string(), format.as_str().to_string());
        let metadata = DocumentMetadata {
            source,
            file_path,
            extra,
        };

        let units = page_units(pages, format.is_paginated(), &metadata);
        debug!(
            "Loaded {} ({} unit(s), {} characters)",
            metadata.source,
            units.len(),
            units.iter().map(|unit| unit.text.chars().count()).sum::<usize>()
        );
        Ok(units)
    }

    /// List supported files of the corpus directory in file-name order
    #[inline]
    pub fn supported_files(&self) -> Vec<PathBuf> {
        self.scan().0
    }

    /// Load every supported file of the corpus directory
    ///
    /// A missing directory yields an empty report. Files that fail to parse are
    /// logged and counted, never fatal for the batch.
    #[inline]
    pub fn load_directory(&self) -> LoadReport {
        let (files, files_skipped) = self.scan();
        let mut report = LoadReport {
            files_skipped,
            ..LoadReport::default()
        };

        for path in files {
            info!("Loading: {}", path.display());
            match self.load_file(&path) {
                Ok(units) => {
                    debug!("Loaded {} unit(s) from {}", units.len(), path.display());
                    report.files_loaded += 1;
                    report.units.extend(units);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.files_failed += 1;
                }
            }
        }

        info!(
            "Loaded {} document unit(s) from {} file(s) ({} failed, {} unsupported)",
            report.units.len(),
            report.files_loaded,
            report.files_failed,
            report.files_skipped
        );
        report
    }

    /// Supported files (sorted) and the number of unsupported entries skipped
    fn scan(&self) -> (Vec<PathBuf>, usize) {
        let entries = match fs::read_dir(&self.documents_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Documents directory {} is not readable: {}",
                    self.documents_dir.display(),
                    e
                );
                return (Vec::new(), 0);
            }
        };

        let mut files = Vec::new();
        let mut skipped = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if DocumentFormat::from_path(&path).is_some() {
                files.push(path);
            } else {
                debug!("Ignoring unsupported file {}", path.display());
                skipped += 1;
            }
        }

        files.sort();
        (files, skipped)
    }
}

fn read_text(path: &Path) -> std::result::Result<String, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| format!("file is not valid UTF-8: {}", e))
}

fn read_pdf_pages(path: &Path) -> std::result::Result<Vec<String>, String> {
    pdf_extract::extract_text_by_pages(path).map_err(|e| e.to_string())
}

/// One unit per page for paginated formats, tagged with its 1-based page
/// number; blank pages are dropped. Other formats yield a single unit.
pub(crate) fn page_units(
    pages: Vec<String>,
    paginated: bool,
    metadata: &DocumentMetadata,
) -> Vec<DocumentUnit> {
    if !paginated {
        return pages
            .into_iter()
            .map(|text| DocumentUnit {
                text,
                metadata: metadata.clone(),
            })
            .collect();
    }

    pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(index, text)| {
            let mut metadata = metadata.clone();
            metadata
                .extra
                .insert("page".to_string(), (index + 1).to_string());
            DocumentUnit { text, metadata }
        })
        .collect()
}

fn read_docx(path: &Path) -> std::result::Result<String, String> {
    let file = fs::File::open(path).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;
    docx_xml_to_text(&xml).map_err(|e| e.to_string())
}

/// Extract the visible text of a WordprocessingML body
pub(crate) fn docx_xml_to_text(xml: &str) -> std::result::Result<String, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event()? {
            XmlEvent::Start(e) if e.name().as_ref() == b"w:t" => in_text_run = true,
            XmlEvent::End(e) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            XmlEvent::Empty(e) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" => text.push('\n'),
                _ => {}
            },
            XmlEvent::Text(t) if in_text_run => text.push_str(&t.unescape()?),
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    Ok(text)
}

/// Render markdown to plain text, keeping block structure as blank lines
pub(crate) fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::with_capacity(markdown.len());

    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::BlockQuote(_)
                | TagEnd::List(_),
            ) => text.push_str("\n\n"),
            Event::End(TagEnd::Item) => text.push('\n'),
            _ => {}
        }
    }

    text.trim_end().to_string()
}
