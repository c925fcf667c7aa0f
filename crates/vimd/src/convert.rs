//! Markdown to standalone HTML conversion.

use std::fmt::Write;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use pulldown_cmark::{Options, Parser, html};

/// Conversion failure.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConvertError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Turns a source document into a complete HTML page.
pub(crate) trait Converter: Send + Sync {
    /// Convert the document at `source`.
    fn convert(&self, source: &Path) -> Result<String, ConvertError>;

    /// Convert `source` and write the page to `output`.
    fn convert_to_file(&self, source: &Path, output: &Path) -> Result<(), ConvertError> {
        let html = self.convert(source)?;
        fs::write(output, html).map_err(|source| ConvertError::Write {
            path: output.to_path_buf(),
            source,
        })
    }
}

/// `CommonMark` + GFM converter with a fixed page wrapper.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MarkdownConverter;

impl MarkdownConverter {
    fn parser_options() -> Options {
        Options::ENABLE_TABLES
            | Options::ENABLE_STRIKETHROUGH
            | Options::ENABLE_TASKLISTS
            | Options::ENABLE_FOOTNOTES
            | Options::ENABLE_GFM
    }

    /// Render markdown text to an HTML page titled `title`.
    pub(crate) fn render(markdown: &str, title: &str) -> String {
        let mut body = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut body, Parser::new_ext(markdown, Self::parser_options()));
        render_page(title, &body)
    }
}

impl Converter for MarkdownConverter {
    fn convert(&self, source: &Path) -> Result<String, ConvertError> {
        let markdown = fs::read_to_string(source).map_err(|e| ConvertError::Read {
            path: source.to_path_buf(),
            source: e,
        })?;
        let title = source
            .file_stem()
            .map_or_else(|| "Preview".into(), |stem| stem.to_string_lossy());
        Ok(Self::render(&markdown, &title))
    }
}

const STYLE: &str = "\
body {
  max-width: 860px;
  margin: 0 auto;
  padding: 2rem 1.5rem;
  font-family: -apple-system, BlinkMacSystemFont, \"Segoe UI\", Helvetica, Arial, sans-serif;
  line-height: 1.6;
  color: #1f2328;
}
pre, code { font-family: ui-monospace, SFMono-Regular, Menlo, monospace; }
pre { padding: 1rem; overflow: auto; background: #f6f8fa; border-radius: 6px; }
code { background: #f6f8fa; padding: 0.1em 0.3em; border-radius: 4px; }
pre code { background: none; padding: 0; }
table { border-collapse: collapse; }
th, td { border: 1px solid #d0d7de; padding: 6px 13px; }
blockquote { margin: 0; padding: 0 1em; color: #59636e; border-left: 0.25em solid #d0d7de; }
img { max-width: 100%; }
";

fn render_page(title: &str, body: &str) -> String {
    let mut page = String::with_capacity(body.len() + STYLE.len() + 512);

    page.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    page.push_str("<meta charset=\"utf-8\">\n");
    page.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    let _ = writeln!(page, "<title>{}</title>", escape(title));
    let _ = writeln!(page, "<style>\n{STYLE}</style>");
    page.push_str("</head>\n<body>\n<article class=\"markdown-body\">\n");
    page.push_str(body);
    page.push_str("</article>\n</body>\n</html>\n");
    page
}

/// Escape HTML special characters.
fn escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}
