use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};

use crate::extract::collect_text;

// ── Lazy statics ─────────────────────────────────────────────────────────────

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\n\f]+").unwrap());
static CELL_NEWLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?: *\n)+ *").unwrap());
static BRUSH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"brush:\s*([A-Za-z0-9_+#-]+)").unwrap());

// Markdown-significant characters in text, and block markers that would
// start a heading, quote, list or setext underline at the start of a line.
static INLINE_ESCAPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\\*_`\[\]]").unwrap());
static LINE_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6} |[-=>]|\+ )").unwrap());
static ORDERED_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\. ").unwrap());

const COLUMN_SEPARATOR: &str = " --- |";
const LIST_INDENT: &str = "    ";

// ── Public API ───────────────────────────────────────────────────────────────

/// Convert an HTML fragment to Markdown.
///
/// Image sources are emitted exactly as written in the HTML; mapping them
/// to local files is left to [`crate::rewrite::rewrite`]. Elements without
/// a Markdown form (frames, scripts, styles, canvas, svg) are kept as raw
/// HTML.
pub fn render(content_html: &str) -> String {
    let fragment = Html::parse_fragment(content_html);
    let raw = walk_children(fragment.root_element());
    tidy(&raw)
}

// ── DOM tree walker → Markdown ───────────────────────────────────────────────

fn walk_element(el: ElementRef<'_>) -> String {
    let name = el.value().name();

    match name {
        "iframe" | "embed" | "script" | "style" | "canvas" | "svg" => el.html(),

        "head" | "title" | "meta" | "link" | "template" => String::new(),

        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            let content = walk_children(el);
            let text = content.trim().replace('\n', " ");
            if text.is_empty() {
                return String::new();
            }
            format!("\n\n{} {}\n\n", "#".repeat(level), text)
        }

        "p" | "div" | "section" | "article" | "main" | "header" | "footer" | "aside"
        | "nav" | "figure" | "figcaption" | "address" | "details" | "summary" | "dl"
        | "dt" | "dd" | "center" => block(walk_children(el)),

        "br" => "  \n".to_string(),
        "hr" => "\n\n---\n\n".to_string(),

        "a" => {
            let content = walk_children(el);
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return String::new();
            }
            match el.value().attr("href").filter(|h| !h.trim().is_empty()) {
                Some(href) => match el.value().attr("title").filter(|t| !t.is_empty()) {
                    Some(title) => format!("[{}]({} \"{}\")", trimmed, href, title.replace('"', "\\\"")),
                    None => format!("[{}]({})", trimmed, href),
                },
                None => trimmed.to_string(),
            }
        }

        "strong" | "b" => wrap_inline(el, "**", "**"),
        "em" | "i" => wrap_inline(el, "_", "_"),
        "del" | "s" | "strike" => wrap_inline(el, "~~", "~~"),
        "u" => wrap_inline(el, "<u>", "</u>"),

        "code" => {
            let text = collect_text(el);
            if text.is_empty() {
                return String::new();
            }
            if text.contains('`') {
                format!("`` {} ``", text)
            } else {
                format!("`{}`", text)
            }
        }

        "pre" => render_pre(el),

        "blockquote" => {
            let content = walk_children(el);
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return String::new();
            }
            let quoted = trimmed
                .lines()
                .map(|l| if l.trim().is_empty() { ">".to_string() } else { format!("> {}", l) })
                .collect::<Vec<_>>()
                .join("\n");
            block(quoted)
        }

        "ul" => render_list(el, false),
        "ol" => render_list(el, true),
        "li" => render_list_item(el, "- "),

        "img" => render_image(el),

        "table" => render_table(el),

        _ => walk_children(el),
    }
}

fn walk_children(el: ElementRef<'_>) -> String {
    let mut result = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let collapsed = WHITESPACE_RE.replace_all(&text.text, " ");
                let line_start = result.is_empty() || result.ends_with('\n');
                let piece = if line_start || result.ends_with(' ') {
                    collapsed.trim_start()
                } else {
                    &*collapsed
                };
                result.push_str(&escape_text(piece, line_start));
            }
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    result.push_str(&walk_element(child_el));
                }
            }
            _ => {}
        }
    }
    result
}

/// Backslash-escape text so it reads back literally. Code and preformatted
/// text never come through here.
fn escape_text(text: &str, line_start: bool) -> String {
    let escaped = INLINE_ESCAPE_RE.replace_all(text, r"\$0");
    if !line_start {
        return escaped.into_owned();
    }
    let escaped = LINE_MARKER_RE.replace(&escaped, r"\${1}");
    ORDERED_MARKER_RE.replace(&escaped, r"${1}\. ").into_owned()
}

fn block(content: String) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("\n\n{}\n\n", trimmed)
}

fn wrap_inline(el: ElementRef<'_>, open: &str, close: &str) -> String {
    let content = walk_children(el);
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{}{}{}", open, trimmed, close)
}

fn element_children<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.children().filter_map(ElementRef::wrap)
}

// ── Element-specific handlers ────────────────────────────────────────────────

fn render_image(el: ElementRef<'_>) -> String {
    let v = el.value();
    let src = v.attr("src").unwrap_or("");
    if src.is_empty() {
        return String::new();
    }
    let alt = v.attr("alt").unwrap_or("");
    let title = v.attr("title").filter(|t| !t.is_empty()).unwrap_or(alt);
    if title.is_empty() {
        format!("![{}]({})", alt, src)
    } else {
        format!("![{}]({} \"{}\")", alt, src, title.replace('"', "\\\""))
    }
}

fn render_pre(el: ElementRef<'_>) -> String {
    let text = collect_text(el);
    let language = code_language(el).unwrap_or_default();
    format!("\n\n```{}\n{}\n```\n\n", language, text.trim_end_matches('\n'))
}

/// `language-xxx` on the `<pre>` or its `<code>`, or a wiki syntax
/// highlighter `brush: xxx` parameter.
fn code_language(pre: ElementRef<'_>) -> Option<String> {
    let code = element_children(pre).find(|c| c.value().name() == "code");
    let from_class = |e: ElementRef<'_>| {
        e.value()
            .classes()
            .find_map(|c| c.strip_prefix("language-").map(str::to_string))
    };
    from_class(pre)
        .or_else(|| code.and_then(from_class))
        .or_else(|| {
            pre.value()
                .attr("data-syntaxhighlighter-params")
                .and_then(|p| BRUSH_RE.captures(p))
                .map(|c| c[1].to_string())
        })
}

fn render_list(el: ElementRef<'_>, ordered: bool) -> String {
    let start = if ordered {
        el.value()
            .attr("start")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(1)
    } else {
        1
    };

    let mut result = String::new();
    for (index, child) in element_children(el).enumerate() {
        if child.value().name() != "li" {
            continue;
        }
        let prefix = if ordered {
            format!("{}. ", start.saturating_add(index as i64))
        } else {
            "- ".to_string()
        };
        result.push_str(&render_list_item(child, &prefix));
    }

    if result.is_empty() {
        return String::new();
    }

    let nested = el
        .parent()
        .and_then(|p| p.value().as_element().map(|e| e.name() == "li"))
        .unwrap_or(false);
    if nested {
        format!("\n{}", result)
    } else {
        format!("\n\n{}\n\n", result)
    }
}

/// One list item; continuation lines are indented under the marker.
fn render_list_item(el: ElementRef<'_>, prefix: &str) -> String {
    let content = walk_children(el);
    let trimmed = content.trim_start_matches('\n').trim_end();
    let indented = trimmed.replace('\n', &format!("\n{}", LIST_INDENT));
    format!("{}{}\n", prefix, indented)
}

// ── Tables ───────────────────────────────────────────────────────────────────

fn render_table(el: ElementRef<'_>) -> String {
    let Some(first_row) = own_rows(el).next() else {
        return String::new();
    };

    let mut caption = String::new();
    let mut body = String::new();
    render_table_section(el, false, &mut caption, &mut body);

    let mut content = body.trim().to_string();
    if content.is_empty() {
        return String::new();
    }

    let has_head = element_children(el).any(|c| c.value().name() == "thead");
    if !has_head {
        let cell_count = table_cells(first_row).count();
        if cell_count > 0 {
            let separator = format!("|{}", COLUMN_SEPARATOR.repeat(cell_count));
            content = match content.find('\n') {
                Some(idx) => format!("{}\n{}{}", &content[..idx], separator, &content[idx..]),
                None => format!("{}\n{}", content, separator),
            };
        }
    }

    let caption = caption.trim();
    if caption.is_empty() {
        format!("\n\n{}\n\n", content)
    } else {
        format!("\n\n{}\n\n{}\n\n", caption, content)
    }
}

/// Rows of this table only, not of tables nested in its cells.
fn own_rows<'a>(table: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    element_children(table).flat_map(|child| {
        let rows: Vec<ElementRef<'a>> = match child.value().name() {
            "tr" => vec![child],
            "thead" | "tbody" | "tfoot" => element_children(child)
                .filter(|r| r.value().name() == "tr")
                .collect(),
            _ => Vec::new(),
        };
        rows
    })
}

fn render_table_section(el: ElementRef<'_>, in_head: bool, caption: &mut String, out: &mut String) {
    for child in element_children(el) {
        match child.value().name() {
            "thead" => render_table_section(child, true, caption, out),
            "tbody" | "tfoot" => render_table_section(child, false, caption, out),
            "tr" => out.push_str(&render_row(child, in_head)),
            "caption" => caption.push_str(walk_children(child).trim()),
            _ => {}
        }
    }
}

fn render_row(tr: ElementRef<'_>, in_head: bool) -> String {
    let cells: Vec<String> = table_cells(tr).map(render_cell).collect();
    let mut output = format!("|{}\n", cells.concat());
    if in_head {
        output.push_str(&format!("|{}\n", COLUMN_SEPARATOR.repeat(cells.len())));
    }
    output
}

fn table_cells<'a>(tr: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    element_children(tr).filter(|c| matches!(c.value().name(), "td" | "th"))
}

fn render_cell(cell: ElementRef<'_>) -> String {
    let content = walk_children(cell);
    let trimmed = content.trim();
    let trimmed = if trimmed.is_empty() { " " } else { trimmed };
    let single_line = CELL_NEWLINE_RE.replace_all(trimmed, "<br>");
    format!(" {} |", single_line.replace('|', "\\|"))
}

// ── Markdown post-processing ─────────────────────────────────────────────────

/// Blank out whitespace-only lines, collapse blank-line runs outside fenced
/// code, and trim.
fn tidy(raw: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_fence = false;
    let mut previous_blank = false;

    for line in raw.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence && line.trim().is_empty() {
            if !previous_blank {
                lines.push("");
            }
            previous_blank = true;
            continue;
        }
        previous_blank = false;
        lines.push(line);
    }

    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn header_cells_without_thead_get_separator() {
        let md = render("<table><tr><th>Name</th></tr><tr><td>Alice</td></tr></table>");
        assert_eq!(md, "| Name |\n| --- |\n| Alice |");
    }

    #[test]
    fn thead_rows_get_separator() {
        let md = render(
            "<table><thead><tr><th>A</th><th>B</th></tr></thead>\
             <tbody><tr><td>1</td><td>2</td></tr></tbody></table>",
        );
        assert_eq!(md, "| A | B |\n| --- | --- |\n| 1 | 2 |");
    }

    #[test]
    fn separator_matches_first_row_width() {
        let md = render("<table><tr><td>a</td><td>b</td><td>c</td></tr></table>");
        assert_eq!(md, "| a | b | c |\n| --- | --- | --- |");
    }

    #[test]
    fn cells_escape_pipes_and_break_lines() {
        let md = render(
            "<table><tr><td>a | b</td><td><p>one</p><p>two</p></td><td></td></tr></table>",
        );
        let first = md.lines().next().unwrap();
        assert_eq!(first, "| a \\| b | one<br>two |   |");
    }

    #[test]
    fn table_is_surrounded_by_blank_lines() {
        let md = render("<p>before</p><table><tr><td>x</td></tr></table><p>after</p>");
        assert_eq!(md, "before\n\n| x |\n| --- |\n\nafter");
    }

    #[test]
    fn images_keep_original_src() {
        let md = render(r#"<p><img src="/download/attachments/1/a.png" alt="diagram"></p>"#);
        assert_eq!(md, r#"![diagram](/download/attachments/1/a.png "diagram")"#);

        let md = render(r#"<img src="x.png" alt="a" title="Caption">"#);
        assert_eq!(md, r#"![a](x.png "Caption")"#);

        let md = render(r#"<img src="x.png">"#);
        assert_eq!(md, "![](x.png)");
    }

    #[test]
    fn image_inside_table_cell() {
        let md = render(r#"<table><tr><td><img src="//cdn/x.png"></td></tr></table>"#);
        assert_eq!(md, "| ![](//cdn/x.png) |\n| --- |");
    }

    #[test]
    fn strikethrough_and_underline() {
        let md = render("<p><del>old</del> <s>gone</s> <u>kept</u></p>");
        assert_eq!(md, "~~old~~ ~~gone~~ <u>kept</u>");
    }

    #[test]
    fn emphasis_and_links() {
        let md = render(r#"<p><strong>Bold</strong> and <em>it</em> <a href="/x">link</a></p>"#);
        assert_eq!(md, "**Bold** and _it_ [link](/x)");
    }

    #[test]
    fn ordered_list_respects_start() {
        let md = render("<ol start=\"3\"><li>three</li><li>four</li></ol>");
        assert_eq!(md, "3. three\n4. four");
    }

    #[test]
    fn nested_list_is_indented() {
        let md = render("<ul><li>top<ul><li>inner</li></ul></li><li>next</li></ul>");
        assert_eq!(md, "- top\n    - inner\n- next");
    }

    #[test]
    fn multi_paragraph_item_continuation() {
        let md = render("<ul><li><p>first</p><p>second</p></li></ul>");
        assert_eq!(md, "- first\n\n    second");
    }

    #[test]
    fn opaque_elements_pass_through() {
        let md = render(r#"<p>see</p><iframe src="https://x/embed"></iframe>"#);
        assert!(md.contains(r#"<iframe src="https://x/embed"></iframe>"#), "{md}");

        let md = render(r#"<svg width="10"><rect></rect></svg>"#);
        assert!(md.starts_with("<svg"), "{md}");
    }

    #[test]
    fn headings_and_code() {
        let md = render(
            "<h2>Setup</h2><pre><code class=\"language-bash\">cargo run\n</code></pre><p>use <code>--help</code></p>",
        );
        assert_eq!(md, "## Setup\n\n```bash\ncargo run\n```\n\nuse `--help`");
    }

    #[test]
    fn wiki_brush_language() {
        let md = render(
            r#"<pre class="syntaxhighlighter-pre" data-syntaxhighlighter-params="brush: java; gutter: false">int x = 1;</pre>"#,
        );
        assert_eq!(md, "```java\nint x = 1;\n```");
    }

    #[test]
    fn rendering_is_deterministic() {
        let html = "<div><h1>T</h1><table><tr><td>a</td></tr></table><ul><li>x</li></ul></div>";
        assert_eq!(render(html), render(html));
    }

    #[test]
    fn huge_list_start_does_not_overflow() {
        let md = render(r#"<ol start="9223372036854775807"><li>a</li><li>b</li></ol>"#);
        assert_eq!(md, "9223372036854775807. a\n9223372036854775807. b");
    }

    #[test]
    fn text_is_escaped_but_code_is_not() {
        let md = render("<p>snake_case_name uses *stars* and [brackets]</p><p>use <code>snake_case</code></p>");
        assert_eq!(
            md,
            "snake\\_case\\_name uses \\*stars\\* and \\[brackets\\]\n\nuse `snake_case`"
        );
    }

    #[test]
    fn line_start_markers_are_escaped() {
        assert_eq!(render("<p># not a heading</p>"), "\\# not a heading");
        assert_eq!(render("<p>1. not a list</p>"), "1\\. not a list");
        assert_eq!(render("<p>- not a bullet</p>"), "\\- not a bullet");
        assert_eq!(render("<p>a - b # c</p>"), "a - b # c");
    }

    #[test]
    fn nested_thead_does_not_suppress_outer_separator() {
        let md = render(
            "<table><tr><td>outer</td><td><table><thead><tr><th>i</th></tr></thead></table></td></tr>\
             <tr><td>x</td><td>y</td></tr></table>",
        );
        let lines: Vec<&str> = md.lines().collect();
        assert_eq!(lines.len(), 3, "{md}");
        assert!(lines[0].starts_with("| outer | "), "{md}");
        assert_eq!(lines[1], "| --- | --- |");
        assert_eq!(lines[2], "| x | y |");
    }
}
