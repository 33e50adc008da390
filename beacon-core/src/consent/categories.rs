//! Consent category maps

use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Category name to consent flag. A missing category is not consented.
pub type Categories = BTreeMap<String, bool>;

/// Check that `value` is a category map and convert it.
///
/// Accepts a JSON object holding at least one boolean. Entries whose value is
/// not a boolean are dropped, which leaves those categories not consented.
pub fn validate_categories(value: &Value) -> Result<Categories> {
    let invalid = || Error::validation("Categories should be {[categoryName: string]: boolean}", value);

    let Value::Object(map) = value else {
        return Err(invalid());
    };

    let categories: Categories = map
        .iter()
        .filter_map(|(name, flag)| flag.as_bool().map(|flag| (name.clone(), flag)))
        .collect();

    if categories.is_empty() {
        return Err(invalid());
    }
    Ok(categories)
}

/// Whether any of `required` is consented in `categories`.
pub fn any_consented<S: AsRef<str>>(categories: &Categories, required: &[S]) -> bool {
    required
        .iter()
        .any(|c| categories.get(c.as_ref()).copied().unwrap_or(false))
}
