use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::download::AssetMap;

// `![alt](url "title")`; the url may hold balanced parentheses and the
// title is optional.
static IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[([^\]]*)\]\(((?:[^()\s]|\([^()\s]*\))+)((?:\s+"(?:\\.|[^"\\])*")?)\)"#).unwrap()
});

/// Point image references in `markdown` at their downloaded copies.
///
/// A source URL is replaced where it is the whole target of
/// `![alt](URL "title")` or the whole content of a table cell. Source URLs
/// without an entry (failed downloads) keep their remote URL. Each part of
/// the input is examined once, so substituted paths are never rewritten
/// again.
pub fn rewrite(markdown: &str, assets: &AssetMap) -> String {
    if assets.is_empty() {
        return markdown.to_string();
    }

    let mut rewritten = 0usize;
    let cells_done = markdown
        .split('\n')
        .map(|line| {
            if line.trim_start().starts_with('|') {
                rewrite_row(line, assets, &mut rewritten)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let updated = IMAGE_RE
        .replace_all(&cells_done, |caps: &Captures| match assets.get(&caps[2]) {
            Some(local_path) => {
                rewritten += 1;
                format!("![{}]({}{})", &caps[1], local_path, &caps[3])
            }
            None => caps[0].to_string(),
        })
        .into_owned();

    tracing::debug!(entries = assets.len(), rewritten, "rewrote image paths");
    updated
}

/// Replace cells of a table row whose entire (trimmed) content is a
/// mapped URL. Escaped pipes do not split cells.
fn rewrite_row(line: &str, assets: &AssetMap, rewritten: &mut usize) -> String {
    let mut out = String::with_capacity(line.len());
    let mut cell_start = 0;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' => {
                escaped = !escaped;
                continue;
            }
            '|' if !escaped => {
                out.push_str(&rewrite_cell(&line[cell_start..i], assets, rewritten));
                out.push('|');
                cell_start = i + 1;
            }
            _ => {}
        }
        escaped = false;
    }
    out.push_str(&rewrite_cell(&line[cell_start..], assets, rewritten));
    out
}

fn rewrite_cell(cell: &str, assets: &AssetMap, rewritten: &mut usize) -> String {
    let token = cell.trim();
    match assets.get(token).filter(|_| !token.is_empty()) {
        Some(local_path) => {
            *rewritten += 1;
            let lead = &cell[..cell.len() - cell.trim_start().len()];
            let trail = &cell[cell.trim_end().len()..];
            format!("{}{}{}", lead, local_path, trail)
        }
        None => cell.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assets(pairs: &[(&str, &str)]) -> AssetMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_map_is_identity() {
        let md = "# T\n\n![a](https://x/img.png \"a\")\n\n| b |\n| --- |";
        assert_eq!(rewrite(md, &AssetMap::new()), md);
    }

    #[test]
    fn rewrites_image_syntax_keeping_alt_and_title() {
        let md = "![Arch](/download/a.png?version=1 \"Architecture\")";
        let out = rewrite(md, &assets(&[("/download/a.png?version=1", "./Page_1a2b3c4d/img_0.png")]));
        assert_eq!(out, "![Arch](./Page_1a2b3c4d/img_0.png \"Architecture\")");
    }

    #[test]
    fn rewrites_standalone_and_table_occurrences() {
        let md = "![x](https://wiki/a.png)\n\n| ![x](https://wiki/a.png) | https://wiki/a.png |\n| --- | --- |";
        let out = rewrite(md, &assets(&[("https://wiki/a.png", "./d/img_1_table.png")]));
        assert_eq!(
            out,
            "![x](./d/img_1_table.png)\n\n| ![x](./d/img_1_table.png) | ./d/img_1_table.png |\n| --- | --- |"
        );
    }

    #[test]
    fn bare_urls_in_adjacent_cells() {
        let md = "| u.png | u.png |";
        let out = rewrite(md, &assets(&[("u.png", "./d/img_0.png")]));
        assert_eq!(out, "| ./d/img_0.png | ./d/img_0.png |");
    }

    #[test]
    fn failed_download_is_left_alone() {
        let md = "![alt](https://x/img.png)";
        let out = rewrite(md, &assets(&[("https://x/other.png", "./d/img_0.png")]));
        assert_eq!(out, md);
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let md = "![](https://x/a+b(1).png) ![](https://x/aab1.png)";
        let out = rewrite(md, &assets(&[("https://x/a+b(1).png", "./d/img_0.png")]));
        assert_eq!(out, "![](./d/img_0.png) ![](https://x/aab1.png)");
    }

    #[test]
    fn longer_url_sharing_a_prefix_stays_remote() {
        let md = r#"![ok](/download/a.png "ok") ![failed](/download/a.png?version=2 "failed")"#;
        let out = rewrite(md, &assets(&[("/download/a.png", "./P_1/img_0.png")]));
        assert_eq!(
            out,
            r#"![ok](./P_1/img_0.png "ok") ![failed](/download/a.png?version=2 "failed")"#
        );
    }

    #[test]
    fn shorter_url_is_not_matched_by_a_longer_entry() {
        let md = "![](https://x/a.png)";
        let out = rewrite(md, &assets(&[("https://x/a.png?v=2", "./d/img_0.png")]));
        assert_eq!(out, md);
    }

    #[test]
    fn local_path_containing_the_source_is_written_once() {
        let local = "./diagram.png_1a2b3c4d/img_0_table.png";
        let md = "| ![](diagram.png) | diagram.png |
| --- | --- |";
        let out = rewrite(md, &assets(&[("diagram.png", local)]));
        assert_eq!(out, format!("| ![]({local}) | {local} |
| --- | --- |"));
    }

    #[test]
    fn mixed_outcomes_in_one_cell() {
        let md = "| ![a](https://x/a.png) ![b](https://x/b.png) |";
        let out = rewrite(md, &assets(&[("https://x/a.png", "./d/img_0_table.png")]));
        assert_eq!(out, "| ![a](./d/img_0_table.png) ![b](https://x/b.png) |");
    }

    #[test]
    fn cell_text_mentioning_the_url_is_untouched() {
        let md = "| see a.png here | a.png \\| b |";
        let out = rewrite(md, &assets(&[("a.png", "./d/img_0.png")]));
        assert_eq!(out, md);
    }

    #[test]
    fn escaped_quotes_in_title_are_kept() {
        let md = r#"![a](u.png "say \"hi\"")"#;
        let out = rewrite(md, &assets(&[("u.png", "./d/img_0.png")]));
        assert_eq!(out, r#"![a](./d/img_0.png "say \"hi\"")"#);
    }

    #[test]
    fn only_map_values_are_introduced() {
        let md = "![](a.png) ![](a.png.bak)\n| a.png | a.pngx |\n![](ba.png)";
        let map = assets(&[("a.png", "./a.png_0/img_0.png")]);
        let out = rewrite(md, &map);
        let targets: Vec<&str> = IMAGE_RE
            .captures_iter(&out)
            .map(|c| c.get(2).map_or("", |m| m.as_str()))
            .collect();
        assert_eq!(targets, vec!["./a.png_0/img_0.png", "a.png.bak", "ba.png"]);
        assert!(out.contains("\n| ./a.png_0/img_0.png | a.pngx |\n"), "{out}");
        assert_eq!(out.matches("./a.png_0/img_0.png").count(), 2);
    }
}
