//! Markdown cleanup for crawled documentation pages.
//!
//! Strips navigation chrome (breadcrumbs, tables of contents, cookie and
//! feedback banners) that web crawls drag along, so that stored and served
//! content is the article body itself. [`clean`] is deterministic and
//! idempotent; [`truncate`] bounds content length at a readable boundary.

use std::sync::LazyLock;

use regex::Regex;

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*)$").expect("header regex"));

/// Headers whose whole section (until the next header of equal or shallower
/// level) is dropped.
static SKIP_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(related\s+(articles|pages|links|resources)|see\s+also|next\s+steps|additional\s+resources|feedback|contribute|help\s+us\s+improve)\b",
    )
    .expect("skip-section regex")
});

/// Headers that introduce a table-of-contents run of link-only list lines.
static TOC_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(in\s+this\s+(article|page|section|document|guide)|on\s+this\s+page|table\s+of\s+contents|contents|quick\s+links|navigation|jump\s+to)$",
    )
    .expect("toc-header regex")
});

static TOC_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*+]\s*\[[^\]]*\]\([^)]*\)\s*$").expect("toc-link regex"));

/// Breadcrumb chains: three or more short segments joined by `>`, `›`, `»`,
/// or `/`. The segment charset is restricted so code paths and prose with
/// punctuation survive.
static BREADCRUMB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s*[\w&' \-]+\s*[>›»/]){2,}\s*[\w&' \-]+\s*$").expect("breadcrumb regex")
});

static NOISE_LINE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*[*_]{0,2}last\s+(updated|modified|edited)\b.*$",
        r"(?i)^\s*\[?edit\s+this\s+page\b.*$",
        r"(?i)^\s*was\s+this\s+(page|article)\s+helpful\??.*$",
        r"(?i)^\s*rate\s+this\b.*$",
        r"(?i)^\s*(did\s+this\s+help|send\s+feedback|provide\s+feedback|submit\s+feedback|give\s+feedback)\b.*$",
        r"(?i)^\s*\d+\s+min(ute)?s?\s+read\s*$",
        r"(?i)^\s*(share(\s+this)?(\s+(article|page|post))?|tweet(\s+this)?|follow\s+us)\b.*$",
        r"(?i)(we\s+use\s+cookies|this\s+(web)?site\s+uses\s+cookies|cookie\s+(policy|settings|preferences|consent)|accept\s+(all\s+)?cookies)",
        r"^\s*\[[^\]]*\]\(#[^)]*\)\s*$",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("noise-line regex"))
    .collect()
});

static MULTI_NEWLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("newline-collapse regex"));

/// Marker appended by [`truncate`] when content had to be cut.
pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated...]";

fn is_noise_line(line: &str) -> bool {
    BREADCRUMB_RE.is_match(line) || NOISE_LINE_RES.iter().any(|re| re.is_match(line))
}

/// Removes navigation, TOC, and boilerplate lines from markdown.
pub fn clean(markdown: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    // Skip everything deeper than this header level (a skip-section is open).
    let mut skip_below: Option<usize> = None;
    let mut in_toc = false;

    for line in markdown.lines() {
        if let Some(caps) = HEADER_RE.captures(line) {
            let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
            let text = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            in_toc = false;
            if let Some(open_level) = skip_below {
                if level > open_level {
                    continue;
                }
                skip_below = None;
            }
            if SKIP_SECTION_RE.is_match(text) {
                skip_below = Some(level);
                continue;
            }
            if TOC_HEADER_RE.is_match(text) {
                in_toc = true;
                continue;
            }
            kept.push(line);
            continue;
        }

        if skip_below.is_some() {
            continue;
        }
        if in_toc {
            if line.trim().is_empty() || TOC_LINK_RE.is_match(line) {
                continue;
            }
            in_toc = false;
        }
        if line.trim().is_empty() {
            kept.push("");
            continue;
        }
        if is_noise_line(line) {
            // Keep an empty line so the collapse pass can normalize spacing.
            kept.push("");
            continue;
        }
        kept.push(line);
    }

    let joined = kept.join("\n");
    MULTI_NEWLINE_RE.replace_all(&joined, "\n\n").trim().to_string()
}

/// Bounds `content` to at most roughly `max_len` bytes, cutting at the
/// latest paragraph break past 70% of the budget, else a sentence boundary
/// past 80%, else a word boundary past 90%, else hard. Appends
/// [`TRUNCATION_MARKER`] whenever a cut happened.
pub fn truncate(content: &str, max_len: usize) -> String {
    if content.len() <= max_len {
        return content.to_string();
    }

    let hard_cut = floor_char_boundary(content, max_len);
    let window = &content[..hard_cut];

    let cut_at = paragraph_cut(window, max_len * 7 / 10)
        .or_else(|| sentence_cut(window, max_len * 8 / 10))
        .or_else(|| word_cut(window, max_len * 9 / 10))
        .unwrap_or(hard_cut);

    format!("{}{}", content[..cut_at].trim_end(), TRUNCATION_MARKER)
}

fn paragraph_cut(window: &str, floor: usize) -> Option<usize> {
    window.rfind("\n\n").filter(|&pos| pos >= floor)
}

fn sentence_cut(window: &str, floor: usize) -> Option<usize> {
    [". ", ".\n", "! ", "? "]
        .iter()
        .filter_map(|sep| window.rfind(sep).map(|pos| pos + 1))
        .max()
        .filter(|&pos| pos >= floor)
}

fn word_cut(window: &str, floor: usize) -> Option<usize> {
    window.rfind(char::is_whitespace).filter(|&pos| pos >= floor)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
