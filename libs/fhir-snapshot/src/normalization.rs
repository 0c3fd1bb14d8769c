//! Element id normalization
//!
//! Differentials in the wild occasionally omit element ids. The engine keys
//! everything by id, so missing ids are derived from `path[:sliceName]`
//! before any tree work. Present ids are never rewritten: nested slice ids
//! legitimately differ from their `path:sliceName` form.

use anvil_models::Element;

/// Fill in missing ids across a sequence.
pub fn ensure_ids(elements: &mut [Element]) {
    for element in elements {
        normalize_element_id(element);
    }
}

fn normalize_element_id(element: &mut Element) {
    if element.id.is_some() {
        return;
    }
    element.id = Some(match &element.slice_name {
        Some(slice_name) => format!("{}:{}", element.path, slice_name),
        None => element.path.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_element(path: &str, id: Option<&str>, slice_name: Option<&str>) -> Element {
        Element {
            id: id.map(str::to_string),
            path: path.to_string(),
            slice_name: slice_name.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn derives_missing_slice_id() {
        let mut elements = vec![make_element("Patient.name", None, Some("official"))];
        ensure_ids(&mut elements);
        assert_eq!(elements[0].id.as_deref(), Some("Patient.name:official"));
    }

    #[test]
    fn derives_missing_plain_id() {
        let mut elements = vec![make_element("Patient.name", None, None)];
        ensure_ids(&mut elements);
        assert_eq!(elements[0].id.as_deref(), Some("Patient.name"));
    }

    #[test]
    fn preserves_existing_ids() {
        // A nested slice child: id is not path:sliceName and must stay as-is.
        let mut elements = vec![make_element(
            "Patient.identifier.system",
            Some("Patient.identifier:mrn.system"),
            None,
        )];
        ensure_ids(&mut elements);
        assert_eq!(
            elements[0].id.as_deref(),
            Some("Patient.identifier:mrn.system")
        );
    }
}
