//! Element id and path manipulation.
//!
//! Ids are dotted paths whose segments may carry colon-suffixed slice names
//! (`Extension.extension:foo.value[x]`); paths are the same walk without
//! slice names. Prefix rewrites keep the two in lock-step: the id rewrite
//! preserves slice names, the path rewrite compares slice-stripped prefixes.

use anvil_models::Element;

/// First dotted segment of an id.
pub fn first_segment(id: &str) -> &str {
    id.split('.').next().unwrap_or(id)
}

/// Last dotted segment of an id, slice suffix included.
pub fn last_segment(id: &str) -> &str {
    id.rsplit('.').next().unwrap_or(id)
}

/// Remove every colon-suffixed slice name from an id, yielding its path form.
pub fn strip_slice_names(id: &str) -> String {
    id.split('.')
        .map(|segment| segment.split(':').next().unwrap_or(segment))
        .collect::<Vec<_>>()
        .join(".")
}

/// Parent id of an element id, and whether the element is a slice of that
/// parent. A final segment carrying `:slicename` parents onto the sliced
/// element (final slice suffix stripped); otherwise the ordinary dotted
/// parent applies. Returns `None` for a root id.
pub fn parent_id(id: &str) -> Option<(String, bool)> {
    let (head, last) = match id.rfind('.') {
        Some(pos) => (&id[..pos + 1], &id[pos + 1..]),
        None => ("", id),
    };

    if let Some(colon) = last.rfind(':') {
        return Some((format!("{}{}", head, &last[..colon]), true));
    }
    if head.is_empty() {
        return None;
    }
    Some((id[..head.len() - 1].to_string(), false))
}

/// True when `id` is strictly below `prefix` (child or slice boundary).
pub fn is_under(id: &str, prefix: &str) -> bool {
    id.len() > prefix.len()
        && id.starts_with(prefix)
        && matches!(id.as_bytes()[prefix.len()], b'.' | b':')
}

/// Uppercase the first character (`dateTime` → `DateTime`).
pub fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}

/// Retarget a single id from `old_prefix` to `new_prefix`: exact match or a
/// `.`-boundary descendant is rewritten, everything else is copied.
pub fn rewrite_id(id: &str, new_prefix: &str, old_prefix: &str) -> String {
    if id == old_prefix {
        return new_prefix.to_string();
    }
    if let Some(rest) = id.strip_prefix(old_prefix) {
        if rest.starts_with('.') {
            return format!("{}{}", new_prefix, rest);
        }
    }
    id.to_string()
}

/// Retarget id and path prefixes across a sequence. Ids are rewritten as-is;
/// paths are rewritten against the slice-stripped forms of both prefixes.
pub fn rewrite_prefix(elements: &[Element], new_prefix: &str, old_prefix: &str) -> Vec<Element> {
    let old_path_prefix = strip_slice_names(old_prefix);
    let new_path_prefix = strip_slice_names(new_prefix);

    elements
        .iter()
        .map(|element| {
            let mut out = element.clone();
            if let Some(id) = &element.id {
                out.id = Some(rewrite_id(id, new_prefix, old_prefix));
            }
            out.path = rewrite_id(&element.path, &new_path_prefix, &old_path_prefix);
            out
        })
        .collect()
}
