//! Page annotation: heading, anchor, and per-paragraph back-references.
//!
//! ```text
//! ## Page 3 <a id="p3"></a>
//!
//! First paragraph line
//! continued
//!  [p3](#p3)
//!
//! ## A heading paragraph gets no back-reference
//!
//! ```
//!
//! Paragraphs are maximal runs of non-blank lines. Line content is never
//! altered; only the heading, back-reference lines, and blank separators are
//! added.

/// Annotates page text with a labelled heading and anchors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageAnnotator {
    label: String,
}

impl Default for PageAnnotator {
    fn default() -> Self {
        Self::new("Page")
    }
}

impl PageAnnotator {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    /// Annotate `text` as page `page_number`.
    pub fn annotate(&self, text: &str, page_number: usize) -> String {
        let mut out: Vec<String> = vec![
            format!("## {} {} <a id=\"p{}\"></a>", self.label, page_number, page_number),
            String::new(),
        ];
        let back_ref = format!(" [p{page_number}](#p{page_number})");

        let mut paragraph: Vec<&str> = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                flush(&mut paragraph, &mut out, &back_ref);
            } else {
                paragraph.push(line);
            }
        }
        flush(&mut paragraph, &mut out, &back_ref);

        out.join("\n")
    }
}

fn flush(paragraph: &mut Vec<&str>, out: &mut Vec<String>, back_ref: &str) {
    let Some(first) = paragraph.first() else {
        return;
    };
    let heading = is_heading(first);
    out.extend(paragraph.drain(..).map(str::to_string));
    if !heading {
        out.push(back_ref.to_string());
    }
    out.push(String::new());
}

/// A heading marker (1 to 6 `#`) followed by a space, after leading whitespace.
fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_paragraph_gets_back_reference() {
        let out = PageAnnotator::new("Page").annotate("Hello world", 3);
        assert_eq!(
            out,
            "## Page 3 <a id=\"p3\"></a>\n\nHello world\n [p3](#p3)\n"
        );
    }

    #[test]
    fn headings_get_no_back_reference() {
        let out = PageAnnotator::default().annotate("# Title\n\nBody line one\nline two", 1);
        assert_eq!(
            out,
            "## Page 1 <a id=\"p1\"></a>\n\n# Title\n\nBody line one\nline two\n [p1](#p1)\n"
        );
    }

    #[test]
    fn blank_runs_collapse_and_edges_are_ignored() {
        let out = PageAnnotator::default().annotate("\n\n  \nA\n\n\n\nB\n\n", 2);
        assert_eq!(
            out,
            "## Page 2 <a id=\"p2\"></a>\n\nA\n [p2](#p2)\n\nB\n [p2](#p2)\n"
        );
    }

    #[test]
    fn empty_text_is_heading_only() {
        let out = PageAnnotator::new("Página").annotate("", 7);
        assert_eq!(out, "## Página 7 <a id=\"p7\"></a>\n");
    }

    #[test]
    fn lines_are_not_altered() {
        let text = "   indented  \n\ttabbed";
        let out = PageAnnotator::default().annotate(text, 1);
        assert!(out.contains("   indented  \n\ttabbed\n [p1](#p1)"));
    }

    #[test]
    fn heading_detection() {
        assert!(is_heading("# A"));
        assert!(is_heading("  ### A"));
        assert!(!is_heading("#hashtag"));
        assert!(!is_heading("####### seven"));
        assert!(!is_heading("plain"));
    }
}
