//! Input discovery and output naming.
//!
//! Turns a user-supplied file or folder into an ordered list of
//! [`InputFile`]s of one [`FileKind`], and maps each one to the path its
//! converted output should be written to. Directory walks are sorted by path
//! so the same folder always produces the same batch order.

use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use walkdir::WalkDir;

/// Which kind of file a batch processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    /// Lower-case extensions recognised for this kind.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FileKind::Pdf => &["pdf"],
            FileKind::Image => &["png", "jpg", "jpeg", "bmp", "webp"],
        }
    }

    /// Does `path` carry one of this kind's extensions (case-insensitive)?
    pub fn matches(self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions().contains(&e.as_str())
            })
            .unwrap_or(false)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format requested from the conversion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Markdown with `\( … \)` style math.
    #[serde(rename = "md")]
    Markdown,
    /// Markdown with `$ … $` style math. (default)
    #[default]
    #[serde(rename = "md_dollar")]
    MarkdownDollar,
    #[serde(rename = "latex")]
    Latex,
    #[serde(rename = "docx")]
    Docx,
}

impl OutputFormat {
    /// Wire name, as accepted on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::MarkdownDollar => "md_dollar",
            OutputFormat::Latex => "latex",
            OutputFormat::Docx => "docx",
        }
    }

    /// File extension of converted outputs.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown | OutputFormat::MarkdownDollar => "md",
            OutputFormat::Latex => "tex",
            OutputFormat::Docx => "docx",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md" => Ok(OutputFormat::Markdown),
            "md_dollar" => Ok(OutputFormat::MarkdownDollar),
            "latex" | "tex" => Ok(OutputFormat::Latex),
            "docx" => Ok(OutputFormat::Docx),
            other => Err(BatchError::InvalidConfig(format!(
                "unknown output format '{other}' (expected md, md_dollar, latex or docx)"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputFile {
    /// Path used to read the file.
    pub path: PathBuf,
    /// Path relative to the discovery root; for a single-file input, its name.
    pub relative: PathBuf,
    pub kind: FileKind,
}

impl InputFile {
    /// Where the converted output for this input goes under `out_dir`.
    ///
    /// The relative directory structure is mirrored and the extension
    /// replaced by the format's.
    pub fn output_path(&self, out_dir: &Path, format: OutputFormat) -> PathBuf {
        out_dir
            .join(&self.relative)
            .with_extension(format.extension())
    }

    /// File name sent to the service.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.relative.display().to_string())
    }
}

impl fmt::Display for InputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative.display())
    }
}

/// Discover every file of `kind` at `path`.
///
/// A file yields itself if it has a matching extension. A directory is walked
/// recursively; results are sorted by relative path.
///
/// # Errors
/// * [`BatchError::FileNotFound`] — `path` does not exist
/// * [`BatchError::PermissionDenied`] — `path` cannot be read
/// * [`BatchError::NoInputs`] — nothing of `kind` was found
pub fn discover(path: &Path, kind: FileKind) -> Result<Vec<InputFile>, BatchError> {
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => BatchError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => BatchError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let mut files = Vec::new();

    if meta.is_file() {
        if kind.matches(path) {
            let relative = path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| path.to_path_buf());
            files.push(InputFile {
                path: path.to_path_buf(),
                relative,
                kind,
            });
        }
    } else {
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !kind.matches(entry.path()) {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(path)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());
            files.push(InputFile {
                path: entry.path().to_path_buf(),
                relative,
                kind,
            });
        }
        files.sort_by(|a, b| a.relative.cmp(&b.relative));
    }

    if files.is_empty() {
        return Err(BatchError::NoInputs {
            path: path.to_path_buf(),
            kind: kind.to_string(),
        });
    }

    debug!("Discovered {} {} file(s) under {}", files.len(), kind, path.display());
    Ok(files)
}

/// Write `bytes` to `path` atomically: temp file in the same directory, then
/// rename. Parent directories are created as needed.
pub fn write_output(path: &Path, bytes: &[u8]) -> Result<(), BatchError> {
    let write_err = |source: std::io::Error| BatchError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) {
        let p = dir.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, b"x").unwrap();
    }

    #[test]
    fn kind_matches_case_insensitively() {
        assert!(FileKind::Pdf.matches(Path::new("a/b/Report.PDF")));
        assert!(FileKind::Image.matches(Path::new("scan.JpEg")));
        assert!(!FileKind::Image.matches(Path::new("doc.pdf")));
        assert!(!FileKind::Pdf.matches(Path::new("no_extension")));
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!(
            "MD_DOLLAR".parse::<OutputFormat>().unwrap(),
            OutputFormat::MarkdownDollar
        );
        assert_eq!("latex".parse::<OutputFormat>().unwrap(), OutputFormat::Latex);
        assert_eq!("docx".parse::<OutputFormat>().unwrap(), OutputFormat::Docx);
        assert!("html".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default(), OutputFormat::MarkdownDollar);
    }

    #[test]
    fn discover_walks_recursively_in_sorted_order() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.pdf");
        touch(dir.path(), "a.pdf");
        touch(dir.path(), "sub/c.pdf");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "img.png");

        let files = discover(dir.path(), FileKind::Pdf).unwrap();
        let rel: Vec<String> = files.iter().map(|f| f.to_string()).collect();
        let expected: Vec<String> = ["a.pdf", "b.pdf", "sub/c.pdf"]
            .iter()
            .map(|p| PathBuf::from(p).display().to_string())
            .collect();
        assert_eq!(rel, expected);
    }

    #[test]
    fn discover_single_file() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "page.png");
        let files = discover(&dir.path().join("page.png"), FileKind::Image).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, PathBuf::from("page.png"));
        assert_eq!(files[0].file_name(), "page.png");
    }

    #[test]
    fn discover_missing_path() {
        let err = discover(Path::new("/definitely/not/here"), FileKind::Pdf).unwrap_err();
        assert!(matches!(err, BatchError::FileNotFound { .. }));
    }

    #[test]
    fn discover_wrong_kind_is_no_inputs() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.pdf");
        let err = discover(dir.path(), FileKind::Image).unwrap_err();
        assert!(matches!(err, BatchError::NoInputs { .. }));
    }

    #[test]
    fn output_path_mirrors_structure() {
        let f = InputFile {
            path: PathBuf::from("/in/sub/paper.pdf"),
            relative: PathBuf::from("sub/paper.pdf"),
            kind: FileKind::Pdf,
        };
        assert_eq!(
            f.output_path(Path::new("Output"), OutputFormat::Latex),
            PathBuf::from("Output/sub/paper.tex")
        );
        assert_eq!(
            f.output_path(Path::new("Output"), OutputFormat::MarkdownDollar),
            PathBuf::from("Output/sub/paper.md")
        );
    }

    #[test]
    fn write_output_creates_parents() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("deep/nested/out.md");
        write_output(&target, b"# hi\n").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"# hi\n");
        // Overwrites atomically.
        write_output(&target, b"# bye\n").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"# bye\n");
    }
}
