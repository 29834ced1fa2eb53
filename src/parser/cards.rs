use scraper::Html;

use super::{descendants, CompiledSchema};

/// Detail-page links found on one index page: the first link on each
/// listing card whose target starts with `prefix`. Cards without such a
/// link contribute nothing.
pub fn card_links(schema: &CompiledSchema, prefix: &str, html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);

    doc.select(&schema.listing_card)
        .filter_map(|card| {
            descendants(card, &schema.card_link)
                .filter_map(|a| a.value().attr("href"))
                .find(|href| href.starts_with(prefix))
                .map(str::to_string)
        })
        .collect()
}
