pub mod cards;
pub mod listing;

use anyhow::{anyhow, Result};
use scraper::{ElementRef, Selector};

use crate::settings::{FieldLabels, SelectorSchema};

/// Selector schema with every rule parsed once up front.
pub struct CompiledSchema {
    pub price: Selector,
    pub features_container: Selector,
    pub feature_item: Selector,
    pub feature_key: Selector,
    pub feature_value: Selector,
    pub discriminator: String,
    pub labels: FieldLabels,
    pub listing_card: Selector,
    pub card_link: Selector,
}

impl CompiledSchema {
    pub fn compile(schema: &SelectorSchema) -> Result<Self> {
        Ok(Self {
            price: selector("price", &schema.price)?,
            features_container: selector("features_container", &schema.features_container)?,
            feature_item: selector("feature_item", &schema.feature_item)?,
            feature_key: selector("feature_key", &schema.feature_key)?,
            feature_value: selector("feature_value", &schema.feature_value)?,
            discriminator: schema.discriminator.clone(),
            labels: schema.labels.clone(),
            listing_card: selector("listing_card", &schema.listing_card)?,
            card_link: selector("card_link", &schema.card_link)?,
        })
    }
}

fn selector(name: &str, css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector for {} ({:?}): {}", name, css, e))
}

/// Element text with every fragment trimmed and the pieces joined with no
/// separator, so `<b> 3 </b> beds` reads `3beds`.
pub fn stripped_text(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).filter(|t| !t.is_empty()).collect()
}

/// Matches strictly below `el`, never `el` itself.
pub fn descendants<'a, 'b>(
    el: ElementRef<'a>,
    selector: &'b Selector,
) -> impl Iterator<Item = ElementRef<'a>> + 'b
where
    'a: 'b,
{
    let own_id = el.id();
    el.select(selector).filter(move |e| e.id() != own_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn default_schema_compiles() {
        assert!(CompiledSchema::compile(&SelectorSchema::default()).is_ok());
    }

    #[test]
    fn bad_selector_names_the_field() {
        let schema = SelectorSchema {
            price: "div[".into(),
            ..SelectorSchema::default()
        };
        let err = CompiledSchema::compile(&schema).err().unwrap().to_string();
        assert!(err.contains("price"), "{}", err);
    }

    #[test]
    fn text_fragments_are_trimmed_and_joined() {
        let html = Html::parse_fragment("<div>  $1,200,000 <span> USD </span>\n</div>");
        let sel = Selector::parse("div").unwrap();
        let el = html.select(&sel).next().unwrap();
        assert_eq!(stripped_text(el), "$1,200,000USD");
    }
}
