use std::collections::HashMap;

use scraper::{ElementRef, Html};
use serde::Serialize;
use tracing::debug;

use super::{descendants, stripped_text, CompiledSchema};

/// One dataset row. Field order is the CSV column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListingRecord {
    #[serde(rename = "Price")]
    pub price: Option<String>,
    #[serde(rename = "Land Size")]
    pub land_size: Option<String>,
    #[serde(rename = "Building Size")]
    pub building_size: Option<String>,
    #[serde(rename = "Year Built")]
    pub year_built: Option<String>,
    #[serde(rename = "Rooms")]
    pub rooms: Option<String>,
    #[serde(rename = "County")]
    pub county: Option<String>,
}

/// Why a successfully fetched page produced no row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
    NoFeatureContainer,
    MissingDiscriminator,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::NoFeatureContainer => "no feature list",
            SkipReason::MissingDiscriminator => "not a listing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Record(ListingRecord),
    Skipped(SkipReason),
}

/// Turn a detail page into a record, or say why it isn't one.
///
/// Missing price or missing individual features leave those fields empty.
/// Only a missing feature list or a missing discriminator entry rejects the
/// page.
pub fn extract(schema: &CompiledSchema, url: &str, html: &str) -> Extraction {
    let doc = Html::parse_document(html);

    let price = doc.select(&schema.price).next().map(stripped_text);

    let Some(container) = doc.select(&schema.features_container).next() else {
        return Extraction::Skipped(SkipReason::NoFeatureContainer);
    };

    let features = feature_map(schema, url, container);
    match features.get(&schema.discriminator) {
        Some(value) if !value.is_empty() => {}
        _ => return Extraction::Skipped(SkipReason::MissingDiscriminator),
    }

    let field = |label: &str| features.get(label).cloned();
    let labels = &schema.labels;

    Extraction::Record(ListingRecord {
        price,
        land_size: field(&labels.land_size),
        building_size: field(&labels.building_size),
        year_built: field(&labels.year_built),
        rooms: field(&labels.rooms),
        county: field(&labels.county),
    })
}

/// Label → value pairs under the feature list. A label seen twice keeps its
/// last value.
fn feature_map(schema: &CompiledSchema, url: &str, container: ElementRef<'_>) -> HashMap<String, String> {
    let mut features = HashMap::new();

    for item in descendants(container, &schema.feature_item) {
        let key = descendants(item, &schema.feature_key).next();
        let value = descendants(item, &schema.feature_value).next();

        match (key, value) {
            (Some(k), Some(v)) => {
                features.insert(stripped_text(k), stripped_text(v));
            }
            (Some(k), None) => {
                debug!("{}: feature {:?} has no value", url, stripped_text(k));
            }
            _ => {}
        }
    }

    if features.is_empty() {
        debug!("{}: feature list present but empty", url);
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SelectorSchema;

    fn schema() -> CompiledSchema {
        CompiledSchema::compile(&SelectorSchema::default()).unwrap()
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn full_listing() {
        let got = extract(&schema(), "house", &fixture("listing_house"));
        assert_eq!(
            got,
            Extraction::Record(ListingRecord {
                price: Some("$1,250,000USD".into()),
                land_size: Some("500 sqm".into()),
                building_size: Some("2,400sqft".into()),
                year_built: Some("1998".into()),
                rooms: Some("4".into()),
                county: Some("Travis".into()),
            })
        );
    }

    #[test]
    fn partial_listing_keeps_what_it_has() {
        let Extraction::Record(r) = extract(&schema(), "condo", &fixture("listing_partial")) else {
            panic!("expected a record");
        };
        assert_eq!(r.price, None);
        assert_eq!(r.land_size, None);
        assert_eq!(r.county, None);
        // later duplicate label wins
        assert_eq!(r.rooms.as_deref(), Some("3"));
    }

    #[test]
    fn missing_property_type_is_skipped() {
        assert_eq!(
            extract(&schema(), "ad", &fixture("listing_no_property_type")),
            Extraction::Skipped(SkipReason::MissingDiscriminator)
        );
    }

    #[test]
    fn missing_feature_list_is_skipped_not_an_empty_row() {
        assert_eq!(
            extract(&schema(), "removed", &fixture("listing_removed")),
            Extraction::Skipped(SkipReason::NoFeatureContainer)
        );
    }

    #[test]
    fn empty_discriminator_value_is_skipped() {
        let html = r#"<div class="zs0kp9-9 hp6kep-0 kyvSuM" data-test-id="ListingFeaturesContainer">
            <div><div class="basicInfoKey">Property Type</div><div class="basicInfoValue">  </div></div>
            <div><div class="basicInfoKey">Rooms</div><div class="basicInfoValue">5</div></div>
        </div>"#;
        assert_eq!(
            extract(&schema(), "blank", html),
            Extraction::Skipped(SkipReason::MissingDiscriminator)
        );
    }

    #[test]
    fn garbage_markup_never_panics() {
        for html in ["", "<<<>>>", "<div class=", "\u{0}\u{feff}<html><body></div></span>"] {
            assert_eq!(
                extract(&schema(), "junk", html),
                Extraction::Skipped(SkipReason::NoFeatureContainer)
            );
        }
    }

    #[test]
    fn scenario_land_size_only() {
        let html = r#"<div class="zs0kp9-9 hp6kep-0 kyvSuM" data-test-id="ListingFeaturesContainer">
            <div><div class="basicInfoKey">Property Type</div><div class="basicInfoValue">House</div></div>
            <div><div class="basicInfoKey">Land Size</div><div class="basicInfoValue">500 sqm</div></div>
        </div>"#;
        assert_eq!(
            extract(&schema(), "listing-1", html),
            Extraction::Record(ListingRecord {
                land_size: Some("500 sqm".into()),
                ..ListingRecord::default()
            })
        );
    }

    #[test]
    fn custom_labels_follow_the_schema() {
        let mut cfg = SelectorSchema::default();
        cfg.labels.county = "Parish".into();
        cfg.discriminator = "Type".into();
        let html = r#"<div class="zs0kp9-9 hp6kep-0 kyvSuM" data-test-id="ListingFeaturesContainer">
            <div><div class="basicInfoKey">Type</div><div class="basicInfoValue">Land</div></div>
            <div><div class="basicInfoKey">Parish</div><div class="basicInfoValue">Orleans</div></div>
        </div>"#;
        let Extraction::Record(r) = extract(&CompiledSchema::compile(&cfg).unwrap(), "la", html) else {
            panic!("expected a record");
        };
        assert_eq!(r.county.as_deref(), Some("Orleans"));
    }
}
