//! Content tier
//!
//! Derives signals from the MIME type and, for text files, from phrases found
//! in the first 4 KiB of the file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Result, SentinelError};
use crate::models::{FileDescriptor, Signal, SignalSource};

/// Bytes read for the text preview
pub const PREVIEW_BYTES: usize = 4096;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "yaml", "yml", "toml", "xml", "html", "css", "js", "ts", "jsx", "tsx",
    "py", "rb", "go", "rs", "java", "c", "cpp", "h", "hpp", "swift", "kt", "sh", "bash", "zsh",
    "csv", "log", "ini", "conf", "config", "env", "rtf",
];

const CODE_EXTENSIONS: &[&str] = &[
    "js", "ts", "jsx", "tsx", "py", "rb", "go", "rs", "java", "c", "cpp", "h", "hpp", "swift",
    "kt", "sh", "bash", "zsh",
];

const INSTALLER_EXTENSIONS: &[&str] = &["dmg", "pkg", "msi", "exe", "deb", "rpm", "appimage"];

/// Phrase rules applied to the lowercased preview
const PHRASE_RULES: &[(&str, &str, f64)] = &[
    ("invoice number", "finance/invoices", 0.55),
    ("amount due", "finance/invoices", 0.45),
    ("bill to", "finance/invoices", 0.35),
    ("this agreement", "legal/contracts", 0.55),
    ("hereinafter", "legal/contracts", 0.45),
    ("governing law", "legal/contracts", 0.40),
    ("curriculum vitae", "career/resumes", 0.55),
    ("work experience", "career/resumes", 0.45),
    ("total paid", "finance/receipts", 0.45),
    ("meeting notes", "documents/notes", 0.45),
];

pub struct ContentClassifier;

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// MIME signal plus any phrase signals from the text preview
    ///
    /// Fails with `Validation` when a text file cannot be read.
    pub fn signals(&self, file: &FileDescriptor) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();
        let extension = file.extension();

        if let Some(signal) = mime_signal(file.mime_type().as_deref(), extension.as_deref()) {
            signals.push(signal);
        }

        if let Some(preview) = read_content_preview(&file.path, extension.as_deref())? {
            let lower = preview.to_lowercase();
            for (phrase, category, confidence) in PHRASE_RULES {
                if lower.contains(phrase) {
                    signals.push(Signal::new(
                        SignalSource::Content,
                        *category,
                        *confidence,
                        format!("content mentions '{}'", phrase),
                    ));
                }
            }
        }

        Ok(signals)
    }

    /// Learning key for the MIME type, `mime:<type>`
    pub fn signal_key(&self, file: &FileDescriptor) -> Option<String> {
        file.mime_type().map(|m| format!("mime:{}", m))
    }
}

fn mime_signal(mime: Option<&str>, extension: Option<&str>) -> Option<Signal> {
    let ext = extension.unwrap_or_default();

    let (category, confidence) = if INSTALLER_EXTENSIONS.contains(&ext) {
        ("software/installers", 0.60)
    } else if CODE_EXTENSIONS.contains(&ext) {
        ("code", 0.50)
    } else {
        let mime = mime?;
        match mime.split('/').next().unwrap_or_default() {
            "image" => ("images", 0.50),
            "video" => ("videos", 0.55),
            "audio" => ("audio", 0.55),
            "text" if ext == "csv" => ("documents/spreadsheets", 0.45),
            "text" => ("documents", 0.30),
            _ => application_category(mime)?,
        }
    };

    Some(Signal::new(
        SignalSource::Content,
        category,
        confidence,
        format!("mime type {}", mime.unwrap_or(ext)),
    ))
}

fn application_category(mime: &str) -> Option<(&'static str, f64)> {
    if mime == "application/pdf" {
        Some(("documents", 0.35))
    } else if mime.contains("spreadsheet") || mime.contains("excel") {
        Some(("documents/spreadsheets", 0.50))
    } else if mime.contains("presentation") || mime.contains("powerpoint") {
        Some(("documents/presentations", 0.50))
    } else if mime.contains("word") || mime.contains("opendocument.text") {
        Some(("documents", 0.40))
    } else if mime.contains("zip")
        || mime.contains("tar")
        || mime.contains("rar")
        || mime.contains("7z")
        || mime.contains("gzip")
    {
        Some(("archives", 0.60))
    } else if mime.contains("epub") {
        Some(("books", 0.55))
    } else {
        None
    }
}

/// First 4 KiB of a text-like file, lossily decoded. `None` for other files.
pub fn read_content_preview(path: &Path, extension: Option<&str>) -> Result<Option<String>> {
    let ext = match extension {
        Some(ext) => ext.to_lowercase(),
        None => return Ok(None),
    };
    if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(None);
    }

    let unreadable = |e: std::io::Error| {
        SentinelError::Validation(format!("Cannot read {}: {}", path.display(), e))
    };

    let file = File::open(path).map_err(unreadable)?;
    let mut buffer = Vec::with_capacity(PREVIEW_BYTES);
    file.take(PREVIEW_BYTES as u64)
        .read_to_end(&mut buffer)
        .map_err(unreadable)?;

    Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
}
