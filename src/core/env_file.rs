// src/core/env_file.rs

use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::EnvDeclaration;

lazy_static! {
    // KEY=VALUE with an optional `export` prefix.
    static ref DOTENV_LINE_RE: Regex =
        Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_.\-]*)\s*=\s*(.*?)\s*$")
            .expect("dotenv line pattern is valid");
}

/// Resolves a `$env` declaration into variables, later entries overriding earlier ones.
/// Dotenv paths are relative to `working_dir`; a missing file contributes nothing.
pub fn resolve(declaration: &EnvDeclaration, working_dir: &Path) -> Vec<(String, String)> {
    match declaration {
        EnvDeclaration::Inline(vars) => vars.clone(),
        EnvDeclaration::File(path) => {
            let full_path = working_dir.join(path);
            match fs::read_to_string(&full_path) {
                Ok(content) => parse_dotenv(&content),
                Err(e) => {
                    log::warn!("Env file '{}' could not be read: {}", full_path.display(), e);
                    Vec::new()
                }
            }
        }
        EnvDeclaration::Many(items) => items
            .iter()
            .flat_map(|item| resolve(item, working_dir))
            .collect(),
    }
}

/// Parses dotenv content. Blank lines and `#` comments are skipped; values may be
/// single- or double-quoted, and double-quoted values understand `\n`, `\t`, `\r`, `\\`.
pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .filter_map(|line| {
            let captures = DOTENV_LINE_RE.captures(line)?;
            let key = captures.get(1)?.as_str().to_string();
            let raw = captures.get(2).map_or("", |m| m.as_str());
            Some((key, parse_value(raw)))
        })
        .collect()
}

fn parse_value(raw: &str) -> String {
    if let Some(inner) = strip_quotes(raw, '"') {
        return unescape(inner);
    }
    if let Some(inner) = strip_quotes(raw, '\'') {
        return inner.to_string();
    }
    // Unquoted values end at an inline comment.
    match raw.find(" #") {
        Some(idx) => raw.get(..idx).unwrap_or(raw).trim_end().to_string(),
        None => raw.to_string(),
    }
}

fn strip_quotes(raw: &str, quote: char) -> Option<&str> {
    raw.strip_prefix(quote)?.strip_suffix(quote)
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
