//! Inherited-element migration
//!
//! A base snapshot is prepared once, at the moment it is consumed as the
//! parent of a derivation: structural metadata that must not be inherited is
//! stripped from the root, relative documentation links from the base
//! library are absolutised, and constraints are stamped with the canonical
//! URL they came from.

use anvil_models::Element;
use once_cell::sync::Lazy;
use regex::Regex;

/// Canonical namespace of the base type library.
pub const BASE_NAMESPACE: &str = "http://hl7.org/fhir";

/// Root-element extensions that describe the publication status of the base
/// resource, not the derived profile.
const NON_INHERITABLE_EXTENSIONS: &[&str] = &[
    "structuredefinition-fmm",
    "structuredefinition-fmm-no-warnings",
    "structuredefinition-hierarchy",
    "structuredefinition-interface",
    "structuredefinition-normative-version",
    "structuredefinition-applicable-version",
    "structuredefinition-category",
    "structuredefinition-codegen-super",
    "structuredefinition-security-category",
    "structuredefinition-standards-status",
    "structuredefinition-summary",
    "structuredefinition-wg",
    "replaces",
    "resource-approvalDate",
    "resource-effectivePeriod",
    "resource-lastReviewDate",
];

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").expect("valid markdown link pattern"));

/// Prepare inherited elements for use as the base of a derivation.
pub fn migrate_elements(elements: &mut [Element], source_url: &str) {
    if let Some(root) = elements.first_mut() {
        strip_non_inheritable_extensions(root);
    }

    let rewrite_links = source_url.starts_with(BASE_NAMESPACE);

    for element in elements.iter_mut() {
        if rewrite_links {
            for field in [
                &mut element.definition,
                &mut element.comment,
                &mut element.requirements,
                &mut element.meaning_when_missing,
            ] {
                if let Some(text) = field {
                    *text = absolutize_links(text);
                }
            }
        }

        if let Some(constraints) = &mut element.constraint {
            for constraint in constraints {
                if constraint.source.is_none() {
                    constraint.source = Some(source_url.to_string());
                }
            }
        }
    }
}

fn strip_non_inheritable_extensions(root: &mut Element) {
    if let Some(extensions) = &mut root.extension {
        extensions.retain(|e| !is_blocked(&e.url));
        if extensions.is_empty() {
            root.extension = None;
        }
    }
}

fn is_blocked(url: &str) -> bool {
    url.strip_prefix("http://hl7.org/fhir/StructureDefinition/")
        .is_some_and(|name| NON_INHERITABLE_EXTENSIONS.contains(&name))
}

/// Rewrite Markdown links with scheme-less targets to absolute URLs under the
/// base namespace.
fn absolutize_links(text: &str) -> String {
    MARKDOWN_LINK
        .replace_all(text, |captures: &regex::Captures| {
            let label = &captures[1];
            let target = &captures[2];
            if has_scheme(target) || target.starts_with('#') {
                captures[0].to_string()
            } else {
                format!("[{}]({}/{})", label, BASE_NAMESPACE, target)
            }
        })
        .into_owned()
}

fn has_scheme(target: &str) -> bool {
    match target.find(':') {
        Some(pos) => !target[..pos].contains('/'),
        None => false,
    }
}
