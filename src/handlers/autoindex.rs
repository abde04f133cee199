//! Directory listing generation.

use std::fs;
use std::io;
use std::path::Path;

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Renders an HTML listing of `dir`, linked relative to `uri` (which
/// must end with a slash). Directories sort before files.
pub fn listing(dir: &Path, uri: &str) -> io::Result<String> {
    let mut entries: Vec<(String, bool)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        let is_dir = entry
            .file_type()
            .map(|t| t.is_dir())
            .unwrap_or(false);
        entries.push((name, is_dir));
    }
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let title = escape(uri);
    let mut html = format!(
        "<html>\n<head><title>Index of {title}</title></head>\n\
         <body>\n<h1>Index of {title}</h1>\n<hr>\n<ul>\n\
         <li><a href=\"../\">../</a></li>\n",
        title = title,
    );
    for (name, is_dir) in entries {
        let suffix = if is_dir { "/" } else { "" };
        let shown = escape(&name);
        html.push_str(&format!(
            "<li><a href=\"{name}{suffix}\">{shown}{suffix}</a></li>\n",
            name = shown,
            suffix = suffix,
            shown = shown,
        ));
    }
    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    Ok(html)
}
