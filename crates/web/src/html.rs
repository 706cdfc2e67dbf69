//! HTML rendering for the merge GUI.

use similar::{DiffTag, TextDiff};

use kyso_core::merge::{ConflictEntry, FileDiff};

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse;width:100%}\
td{font-family:monospace;white-space:pre-wrap;padding:0 .5em;vertical-align:top}\
td.n{color:#888;text-align:right;width:3em}\
tr.delete td.l,tr.replace td.l{background:#fdd}\
tr.insert td.r,tr.replace td.r{background:#dfd}\
.ind{font-family:monospace;font-weight:bold}";

/// Escape text for HTML element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// One row of a side-by-side diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub tag: DiffTag,
    pub left: Option<(usize, String)>,
    pub right: Option<(usize, String)>,
}

/// Pair up the lines of `old` and `new` for a two-column view.
pub fn side_by_side(old: &str, new: &str) -> Vec<Row> {
    let diff = TextDiff::from_lines(old, new);
    let mut rows = Vec::new();
    for op in diff.ops() {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        let olds = &diff.old_slices()[old_range.clone()];
        let news = &diff.new_slices()[new_range.clone()];
        let line = |n: usize, s: &str| (n + 1, s.trim_end_matches(['\n', '\r']).to_string());
        for i in 0..olds.len().max(news.len()) {
            rows.push(Row {
                tag,
                left: olds.get(i).map(|s| line(old_range.start + i, *s)),
                right: news.get(i).map(|s| line(new_range.start + i, *s)),
            });
        }
    }
    rows
}

fn tag_class(tag: DiffTag) -> &'static str {
    match tag {
        DiffTag::Equal => "equal",
        DiffTag::Delete => "delete",
        DiffTag::Insert => "insert",
        DiffTag::Replace => "replace",
    }
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <style>{STYLE}</style></head><body>\n{body}</body></html>\n",
        title = escape(title),
    )
}

/// The conflict list page.
pub fn conflicts_page(version: Option<&str>, entries: &[ConflictEntry]) -> String {
    let mut body = String::from("<h1>kyso merge</h1>\n");
    if let Some(sha) = version {
        body.push_str(&format!("<p>Pulled version <code>{}</code></p>\n", escape(sha)));
    }
    if entries.is_empty() {
        body.push_str("<p>No conflicts.</p>\n");
        return page("kyso merge", &body);
    }
    body.push_str("<table>\n");
    for entry in entries {
        body.push_str(&format!(
            "<tr><td class=\"ind\">{ind}</td><td><a href=\"/diff?file={href}\">{name}</a></td><td>{kind}</td></tr>\n",
            ind = entry.kind.indicator(),
            href = escape(&urlencoding::encode(&entry.name)),
            name = escape(&entry.name),
            kind = entry.kind,
        ));
    }
    body.push_str("</table>\n");
    page("kyso merge", &body)
}

/// The side-by-side diff page for one file, local on the left.
pub fn diff_page(diff: &FileDiff) -> String {
    let local = diff.local.as_deref().unwrap_or("");
    let mut body = format!(
        "<p><a href=\"/\">&larr; conflicts</a></p>\n<h1>{name}</h1>\n<p>{kind}</p>\n",
        name = escape(&diff.name),
        kind = diff.kind,
    );
    body.push_str(&format!(
        "<form method=\"post\" action=\"/resolve\">\
         <input type=\"hidden\" name=\"file\" value=\"{file}\">\
         <button name=\"take\" value=\"local\">Keep local</button> \
         <button name=\"take\" value=\"remote\">Take remote</button></form>\n",
        file = escape(&diff.name),
    ));
    if diff.local.is_none() {
        body.push_str("<p>The file does not exist locally.</p>\n");
    }
    body.push_str("<table>\n<tr><th></th><th>local</th><th></th><th>remote</th></tr>\n");
    for row in side_by_side(local, &diff.remote) {
        let cell = |side: &Option<(usize, String)>| match side {
            Some((n, text)) => format!("<td class=\"n\">{}</td><td>{}</td>", n, escape(text)),
            None => "<td class=\"n\"></td><td></td>".to_string(),
        };
        body.push_str(&format!(
            "<tr class=\"{}\">{}{}</tr>\n",
            tag_class(row.tag),
            cell(&row.left).replace("<td>", "<td class=\"l\">"),
            cell(&row.right).replace("<td>", "<td class=\"r\">"),
        ));
    }
    body.push_str("</table>\n");
    page(&diff.name, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyso_core::merge::ConflictKind;

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn test_conflict_links_encode_file_names() {
        let entries = vec![ConflictEntry {
            name: "a&b/my file.txt".into(),
            kind: ConflictKind::Modified,
        }];
        let page = conflicts_page(None, &entries);
        assert!(page.contains("href=\"/diff?file=a%26b%2Fmy%20file.txt\""));
    }

    #[test]
    fn test_side_by_side_pairs_replacements() {
        let rows = side_by_side("a\nb\nc\n", "a\nB\nc\nd\n");
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].tag, DiffTag::Equal);
        assert_eq!(rows[1].tag, DiffTag::Replace);
        assert_eq!(rows[1].left, Some((2, "b".to_string())));
        assert_eq!(rows[1].right, Some((2, "B".to_string())));
        assert_eq!(rows[3].tag, DiffTag::Insert);
        assert_eq!(rows[3].left, None);
        assert_eq!(rows[3].right, Some((4, "d".to_string())));
    }
}
