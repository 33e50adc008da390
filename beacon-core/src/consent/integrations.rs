//! Device-mode gating of CDN integrations

use super::categories::{any_consented, Categories};
use super::IntegrationCategoryMappings;
use crate::settings::SettingsTransform;
use serde_json::{Map, Value};

/// Categories declared under `consentSettings.categories` of a descriptor.
pub fn declared_categories(descriptor: &Value) -> Option<Vec<String>> {
    let categories = descriptor
        .get("consentSettings")?
        .get("categories")?
        .as_array()?;
    Some(
        categories
            .iter()
            .filter_map(|c| c.as_str().map(str::to_string))
            .collect(),
    )
}

/// Disable every integration the user has not consented to.
///
/// Required categories come from `mappings` when supplied, otherwise from the
/// descriptor itself. An integration without required categories stays
/// enabled; one with no consented category is replaced by `false`. Keys are
/// never removed.
pub fn build_integrations(
    integrations: &Map<String, Value>,
    categories: &Categories,
    mappings: Option<&IntegrationCategoryMappings>,
) -> Map<String, Value> {
    integrations
        .iter()
        .map(|(name, descriptor)| {
            let required = match mappings {
                Some(mappings) => mappings.get(name).cloned(),
                None => declared_categories(descriptor),
            };

            let consented = match required.as_deref() {
                None | Some([]) => true,
                Some(required) => any_consented(categories, required),
            };

            if consented {
                (name.clone(), descriptor.clone())
            } else {
                tracing::debug!(integration = %name, "Disabling integration without consent");
                (name.clone(), Value::Bool(false))
            }
        })
        .collect()
}

/// Settings transform that applies [`build_integrations`].
pub fn gate_integrations(
    categories: Categories,
    mappings: Option<IntegrationCategoryMappings>,
) -> SettingsTransform {
    SettingsTransform::new(move |mut settings| {
        settings.integrations =
            build_integrations(&settings.integrations, &categories, mappings.as_ref());
        settings
    })
}
