//! Applies paper size and page margins to a document preamble.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::entities::{CompileOptions, Margins};

static DOCUMENTCLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\documentclass\s*(?:\[([^\]]*)\])?\s*\{([^}]*)\}").expect("valid regex")
});
static GEOMETRY_LOADED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\usepackage\s*(?:\[[^\]]*\])?\s*\{[^}]*\bgeometry\b[^}]*\}").expect("valid regex"));

/// Returns `source` with the requested paper size and margins applied.
///
/// Sources without a `\documentclass` are returned unchanged; validation rejects
/// them before they get here.
pub fn apply_layout(source: &str, options: &CompileOptions) -> String {
    let Some(class) = DOCUMENTCLASS.captures(source) else {
        return source.to_owned();
    };
    let Some(whole) = class.get(0) else {
        return source.to_owned();
    };

    let mut head = source[..whole.start()].to_owned();
    let mut tail = source[whole.end()..].to_owned();

    let existing: Vec<&str> = class
        .get(1)
        .map(|m| m.as_str().split(',').map(str::trim).filter(|o| !o.is_empty()).collect())
        .unwrap_or_default();
    let mut class_options: Vec<String> = existing.iter().map(|o| (*o).to_owned()).collect();
    if let Some(paper) = options.paper_size.as_deref()
        && !existing.contains(&paper)
    {
        class_options.push(paper.to_owned());
    }
    let class_name = class.get(2).map(|m| m.as_str()).unwrap_or_default();
    let declaration = if class_options.is_empty() {
        format!("\\documentclass{{{class_name}}}")
    } else {
        format!("\\documentclass[{}]{{{class_name}}}", class_options.join(","))
    };

    if let Some(margins) = options.margins.as_ref().filter(|m| !m.is_empty()) {
        let settings = geometry_settings(margins);
        if GEOMETRY_LOADED.is_match(&tail) {
            let line = format!("\\geometry{{{settings}}}\n");
            match tail.find("\\begin{document}") {
                Some(at) => tail.insert_str(at, &line),
                None => tail.push_str(&line),
            }
        } else {
            tail.insert_str(0, &format!("\n\\usepackage[{settings}]{{geometry}}"));
        }
    }

    head.push_str(&declaration);
    head.push_str(&tail);
    head
}

fn geometry_settings(margins: &Margins) -> String {
    margins
        .sides()
        .filter_map(|(side, value)| value.map(|v| format!("{side}={}", v.trim())))
        .collect::<Vec<_>>()
        .join(",")
}
