use std::path::Path;

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "html", "css", "json", "xml", "yaml", "yml", "md", "txt", "ini", "conf", "sh",
    "bat", "ps1",
];
const DOC_EXTENSIONS: &[&str] = &["doc", "docx", "pdf", "txt", "md", "rtf"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Code,
    Document,
    Image,
}

impl FileKind {
    /// Classifies by extension, case-insensitively. Code wins over document
    /// for extensions in both lists.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_lowercase();
        if CODE_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Code)
        } else if DOC_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Document)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Image)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Code => "code",
            FileKind::Document => "document",
            FileKind::Image => "image",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_by_extension() {
        assert_eq!(FileKind::from_filename("main.PY"), Some(FileKind::Code));
        assert_eq!(FileKind::from_filename("notes.md"), Some(FileKind::Code));
        assert_eq!(FileKind::from_filename("report.docx"), Some(FileKind::Document));
        assert_eq!(FileKind::from_filename("photo.webp"), Some(FileKind::Image));
    }

    #[test]
    fn test_rejects_unknown_or_missing_extension() {
        assert_eq!(FileKind::from_filename("archive.tar.gz"), None);
        assert_eq!(FileKind::from_filename("Makefile"), None);
    }
}
