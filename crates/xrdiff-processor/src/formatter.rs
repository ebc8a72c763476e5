//! Diff generation and pretty-printing
//!
//! Both sides are normalized (volatile metadata, status and resourceRefs
//! stripped), serialized to canonical YAML and line-diffed. Output is
//! GNU-style: a header naming the resource, then `+ `/`- `/`  ` prefixed
//! lines, optionally colorized, full or compact with context windows.

use console::Style;
use kube::core::DynamicObject;
use similar::{ChangeTag, TextDiff};

use xrdiff_core::object::{cleanup_for_diff, to_canonical_yaml};

use crate::error::{DiffError, Result};

/// The kind of change a resource diff represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    Added,
    Removed,
    Modified,
    Equal,
}

impl DiffType {
    fn header_marker(self) -> &'static str {
        match self {
            DiffType::Added => "+++",
            DiffType::Removed => "---",
            DiffType::Modified => "~~~",
            DiffType::Equal => "===",
        }
    }
}

/// Tag of a single diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    Added,
    Removed,
    Context,
}

/// One line of a resource diff.
#[derive(Debug, Clone)]
pub struct DiffLine {
    pub tag: LineTag,
    pub content: String,
}

/// The diff for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    pub kind: String,
    pub name: String,
    pub diff_type: DiffType,
    pub lines: Vec<DiffLine>,
}

impl ResourceDiff {
    pub fn is_equal(&self) -> bool {
        self.diff_type == DiffType::Equal
            || !self.lines.iter().any(|l| l.tag != LineTag::Context)
    }
}

/// Configuration for diff output.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub use_colors: bool,
    pub compact: bool,
    pub context_lines: usize,
    pub chunk_separator: String,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            use_colors: true,
            compact: false,
            context_lines: 3,
            chunk_separator: "...".to_string(),
        }
    }
}

impl DiffOptions {
    pub fn compact() -> Self {
        Self {
            compact: true,
            ..Self::default()
        }
    }
}

fn normalized_yaml(obj: Option<&DynamicObject>) -> Result<String> {
    let Some(obj) = obj else {
        return Ok(String::new());
    };
    let mut value = serde_json::to_value(obj).map_err(|e| DiffError::Format(e.to_string()))?;
    cleanup_for_diff(&mut value);
    to_canonical_yaml(&value).map_err(|e| DiffError::Format(e.to_string()))
}

fn display_name(obj: &DynamicObject) -> String {
    obj.metadata
        .name
        .clone()
        .or(obj.metadata.generate_name.clone())
        .unwrap_or_default()
}

/// Produce the structural diff between the live and desired versions of a
/// resource. `None` on either side marks an addition or a removal.
pub fn generate_diff(
    current: Option<&DynamicObject>,
    desired: Option<&DynamicObject>,
) -> Result<ResourceDiff> {
    let (kind, name) = match (desired, current) {
        (Some(d), _) => (
            d.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
            display_name(d),
        ),
        (None, Some(c)) => (
            c.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
            display_name(c),
        ),
        (None, None) => {
            return Err(DiffError::Format(
                "both current and desired cannot be nil".to_string(),
            ));
        }
    };

    let diff_type = match (current, desired) {
        (None, Some(_)) => DiffType::Added,
        (Some(_), None) => DiffType::Removed,
        _ => DiffType::Modified,
    };

    let current_text = normalized_yaml(current)?;
    let desired_text = normalized_yaml(desired)?;

    if diff_type == DiffType::Modified && current_text == desired_text {
        return Ok(ResourceDiff {
            kind,
            name,
            diff_type: DiffType::Equal,
            lines: Vec::new(),
        });
    }

    let text_diff = TextDiff::from_lines(&current_text, &desired_text);
    let lines = text_diff
        .iter_all_changes()
        .map(|change| DiffLine {
            tag: match change.tag() {
                ChangeTag::Insert => LineTag::Added,
                ChangeTag::Delete => LineTag::Removed,
                ChangeTag::Equal => LineTag::Context,
            },
            content: change.value().trim_end().to_string(),
        })
        .collect();

    Ok(ResourceDiff {
        kind,
        name,
        diff_type,
        lines,
    })
}

fn format_line(line: &DiffLine, options: &DiffOptions) -> String {
    let (prefix, style) = match line.tag {
        LineTag::Added => ("+ ", Style::new().green()),
        LineTag::Removed => ("- ", Style::new().red()),
        LineTag::Context => ("  ", Style::new()),
    };

    let text = format!("{prefix}{}", line.content);
    if options.use_colors && line.tag != LineTag::Context {
        style.force_styling(true).apply_to(text).to_string()
    } else {
        text
    }
}

/// Render one resource diff as text. Equal diffs render as the empty
/// string. For identical inputs the output is byte-identical.
pub fn format_diff(diff: &ResourceDiff, options: &DiffOptions) -> String {
    if diff.is_equal() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{} {}/{}\n",
        diff.diff_type.header_marker(),
        diff.kind,
        diff.name
    ));

    if options.compact {
        format_compact(&diff.lines, options, &mut out);
    } else {
        for line in &diff.lines {
            out.push_str(&format_line(line, options));
            out.push('\n');
        }
    }

    out
}

/// Emit only changed lines with `context_lines` of context on each side;
/// non-overlapping windows are separated by the chunk separator.
fn format_compact(lines: &[DiffLine], options: &DiffOptions, out: &mut String) {
    let mut blocks: Vec<(usize, usize)> = Vec::new();
    let mut open: Option<(usize, usize)> = None;
    for (i, line) in lines.iter().enumerate() {
        if line.tag != LineTag::Context {
            open = Some(match open {
                Some((start, _)) => (start, i),
                None => (i, i),
            });
        } else if let Some(block) = open.take() {
            blocks.push(block);
        }
    }
    if let Some(block) = open {
        blocks.push(block);
    }
    if blocks.is_empty() {
        return;
    }

    let context = options.context_lines;
    let mut last_printed: Option<usize> = None;

    for (block_idx, &(start, end)) in blocks.iter().enumerate() {
        let mut context_start = start.saturating_sub(context);

        if block_idx > 0 {
            let (_, prev_end) = blocks[block_idx - 1];
            let prev_context_end = (prev_end + context + 1).min(lines.len());
            if context_start > prev_context_end {
                out.push_str(&options.chunk_separator);
                out.push('\n');
                last_printed = None;
            } else if let Some(last) = last_printed {
                context_start = context_start.max(last + 1);
            }
        }

        for i in context_start..start {
            if last_printed.is_none_or(|last| i > last) {
                out.push_str(&format_line(&lines[i], options));
                out.push('\n');
                last_printed = Some(i);
            }
        }

        for i in start..=end {
            out.push_str(&format_line(&lines[i], options));
            out.push('\n');
            last_printed = Some(i);
        }

        let context_end = (end + context + 1).min(lines.len());
        for i in (end + 1)..context_end {
            out.push_str(&format_line(&lines[i], options));
            out.push('\n');
            last_printed = Some(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn plain() -> DiffOptions {
        DiffOptions {
            use_colors: false,
            ..DiffOptions::default()
        }
    }

    fn obj(name: &str, spec: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "TestResource",
            "metadata": {"name": name},
            "spec": spec,
        }))
        .unwrap()
    }

    #[test]
    fn test_added_diff_header_and_lines() {
        let desired = obj("new-resource", json!({"field": "value"}));
        let diff = generate_diff(None, Some(&desired)).unwrap();

        assert_eq!(diff.diff_type, DiffType::Added);
        let text = format_diff(&diff, &plain());
        assert!(text.starts_with("+++ TestResource/new-resource\n"), "{text}");
        assert!(text.contains("+ apiVersion: example.org/v1"));
        assert!(text.lines().skip(1).all(|l| l.starts_with("+ ")));
    }

    #[test]
    fn test_removed_diff_header() {
        let current = obj("old-resource", json!({"field": "value"}));
        let diff = generate_diff(Some(&current), None).unwrap();

        assert_eq!(diff.diff_type, DiffType::Removed);
        let text = format_diff(&diff, &plain());
        assert!(text.starts_with("--- TestResource/old-resource\n"));
        assert!(text.lines().skip(1).all(|l| l.starts_with("- ")));
    }

    #[test]
    fn test_modified_diff_shows_both_sides() {
        let current = obj("resource", json!({"field": "old"}));
        let desired = obj("resource", json!({"field": "new"}));
        let diff = generate_diff(Some(&current), Some(&desired)).unwrap();

        assert_eq!(diff.diff_type, DiffType::Modified);
        let text = format_diff(&diff, &plain());
        assert!(text.starts_with("~~~ TestResource/resource\n"));
        assert!(text.contains("- ") && text.contains("+ "));
        assert!(text.contains("field: old"));
        assert!(text.contains("field: new"));
    }

    #[test]
    fn test_equal_objects_render_nothing() {
        let current = obj("resource", json!({"field": "same"}));
        let desired = obj("resource", json!({"field": "same"}));
        let diff = generate_diff(Some(&current), Some(&desired)).unwrap();

        assert_eq!(diff.diff_type, DiffType::Equal);
        assert_eq!(format_diff(&diff, &plain()), "");
    }

    #[test]
    fn test_volatile_metadata_does_not_produce_a_diff() {
        let mut current = obj("resource", json!({"field": "same"}));
        current.metadata.uid = Some("live-uid".to_string());
        current.metadata.resource_version = Some("42".to_string());
        let desired = obj("resource", json!({"field": "same"}));

        let diff = generate_diff(Some(&current), Some(&desired)).unwrap();
        assert_eq!(diff.diff_type, DiffType::Equal);
    }

    #[test]
    fn test_both_nil_is_an_error() {
        assert!(generate_diff(None, None).is_err());
    }

    #[test]
    fn test_output_is_byte_identical_across_runs() {
        let current = obj("resource", json!({"a": 1, "b": {"c": "x"}}));
        let desired = obj("resource", json!({"a": 2, "b": {"c": "x"}}));

        let first = format_diff(&generate_diff(Some(&current), Some(&desired)).unwrap(), &plain());
        let second = format_diff(&generate_diff(Some(&current), Some(&desired)).unwrap(), &plain());
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    fn big_objects() -> (DynamicObject, DynamicObject) {
        let mut base = serde_json::Map::new();
        for i in 0..20 {
            base.insert(format!("key{i:02}"), json!(format!("value{i}")));
        }
        let current = obj("resource", Value::Object(base.clone()));
        base.insert("key00".to_string(), json!("changed-start"));
        base.insert("key19".to_string(), json!("changed-end"));
        let desired = obj("resource", Value::Object(base));
        (current, desired)
    }

    #[test]
    fn test_compact_mode_inserts_chunk_separator() {
        let (current, desired) = big_objects();
        let diff = generate_diff(Some(&current), Some(&desired)).unwrap();

        let mut options = plain();
        options.compact = true;
        let text = format_diff(&diff, &options);

        assert!(text.contains("...\n"), "{text}");
        // Far-apart hunks must not drag the full context along.
        assert!(text.lines().count() < diff.lines.len() + 2);
    }

    #[test]
    fn test_compact_mode_without_gap_has_no_separator() {
        let current = obj("resource", json!({"a": "old", "b": "same"}));
        let desired = obj("resource", json!({"a": "new", "b": "same"}));
        let diff = generate_diff(Some(&current), Some(&desired)).unwrap();

        let mut options = plain();
        options.compact = true;
        let text = format_diff(&diff, &options);
        assert!(!text.contains("...\n"));
    }

    #[test]
    fn test_colors_wrap_changed_lines_only() {
        let current = obj("resource", json!({"field": "old"}));
        let desired = obj("resource", json!({"field": "new"}));
        let diff = generate_diff(Some(&current), Some(&desired)).unwrap();

        let text = format_diff(&diff, &DiffOptions::default());
        assert!(text.contains("\x1b[32m"));
        assert!(text.contains("\x1b[31m"));

        let no_color = format_diff(&diff, &plain());
        assert!(!no_color.contains('\x1b'));
    }
}
