// src/core/pattern.rs

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

/// Translates a glob (`**`, `*`, `?`, `[...]`, `{a,b}`) into an anchored regex over
/// `/`-separated relative paths.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut brace_depth = 0usize;
    let mut i = 0;

    while let Some(&c) = chars.get(i) {
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let close = chars
                    .iter()
                    .skip(i + 1)
                    .position(|&ch| ch == ']')
                    .map(|offset| i + 1 + offset);
                match close {
                    Some(end) => {
                        out.push('[');
                        let mut j = i + 1;
                        if matches!(chars.get(j), Some('!') | Some('^')) {
                            out.push('^');
                            j += 1;
                        }
                        while j < end {
                            if let Some(&ch) = chars.get(j) {
                                if ch == '\\' || ch == '[' {
                                    out.push('\\');
                                }
                                out.push(ch);
                            }
                            j += 1;
                        }
                        out.push(']');
                        i = end + 1;
                        continue;
                    }
                    None => out.push_str(r"\["),
                }
            }
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
            }
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
            }
            ',' if brace_depth > 0 => out.push('|'),
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    out.push_str(&regex::escape(&next.to_string()));
                    i += 1;
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    out.push('$');
    Regex::new(&out)
}

/// The longest leading run of path components without glob metacharacters.
fn literal_base(pattern: &str) -> &str {
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
    let meta = pattern.find(['*', '?', '[', '{']).unwrap_or(pattern.len());
    match pattern.get(..meta).and_then(|head| head.rfind('/')) {
        Some(slash) => pattern.get(..slash).unwrap_or(""),
        None if meta == pattern.len() => pattern,
        None => "",
    }
}

/// Joins the components of `path` with `/`. An absolute path keeps a single leading `/`.
fn to_slash(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push_str(&prefix.as_os_str().to_string_lossy()),
            Component::RootDir => out.push('/'),
            other => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

/// Renders `path` relative to `root` with `/` separators. Paths outside `root` stay absolute.
pub fn normalize_relative(path: &Path, root: &Path) -> String {
    to_slash(path.strip_prefix(root).unwrap_or(path))
}

/// Every file or directory matched by `pattern`, sorted, as `/`-separated paths. Relative
/// patterns (including `../` ones) yield paths relative to `root`; absolute patterns yield
/// absolute paths. Unreadable entries are skipped.
pub fn expand(pattern: &str, root: &Path) -> Result<Vec<String>, regex::Error> {
    let matcher = glob_to_regex(pattern)?;
    let is_absolute = Path::new(pattern).is_absolute();
    let base = literal_base(pattern);
    let start = if base.is_empty() {
        root.to_path_buf()
    } else {
        root.join(base)
    };
    if !start.exists() {
        return Ok(Vec::new());
    }

    let mut matches: Vec<String> = WalkDir::new(&start)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| {
            if is_absolute {
                to_slash(entry.path())
            } else {
                normalize_relative(entry.path(), root)
            }
        })
        .filter(|relative| !relative.is_empty() && matcher.is_match(relative))
        .collect();
    matches.sort();
    matches.dedup();
    Ok(matches)
}

/// Joins a match from [`expand`] back onto `root`. Absolute matches are returned as is.
pub fn absolute(root: &Path, matched: &str) -> PathBuf {
    if Path::new(matched).is_absolute() {
        return PathBuf::from(matched);
    }
    matched.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
}
