//! Shared fixtures and pipeline factories

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use contextmatch_core::{
    ContentBundle, Pipeline, PipelineConfig, RawImage, TaxonomyEntry,
};

/// A small but realistic taxonomy spanning several verticals
pub fn taxonomy_entries() -> Vec<TaxonomyEntry> {
    vec![
        entry(
            "auto-ev",
            "Electric Vehicles",
            "Battery electric cars, charging networks, range and pricing",
            &["electric", "battery", "charging", "vehicle", "range"],
        ),
        entry(
            "auto-classic",
            "Classic Cars",
            "Vintage and collectible automobiles, restoration and auctions",
            &["vintage", "classic", "restoration", "auction"],
        ),
        entry(
            "fin-credit",
            "Credit Cards",
            "Consumer credit cards, rewards programs, interest rates and fees",
            &["credit", "card", "rewards", "interest", "apr"],
        ),
        entry(
            "fin-taxes",
            "Taxes",
            "Income tax filing, deductions, tax credits and refunds",
            &["tax", "taxes", "credit", "deduction", "refund"],
        ),
        entry(
            "fin-invest",
            "Investing",
            "Stocks, bonds, index funds and retirement portfolios",
            &["stocks", "bonds", "portfolio", "retirement", "funds"],
        ),
        entry(
            "travel-cruise",
            "Cruise Travel",
            "Ocean and river cruises, cruise lines, itineraries and ports",
            &["cruise", "ocean", "itinerary", "ports"],
        ),
        entry(
            "food-cooking",
            "Cooking",
            "Recipes, kitchen techniques, ingredients and meal planning",
            &["recipes", "cooking", "ingredients", "kitchen"],
        ),
    ]
}

fn entry(id: &str, name: &str, description: &str, keywords: &[&str]) -> TaxonomyEntry {
    TaxonomyEntry {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        source: "iab".to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        parent_id: None,
        level: 1,
    }
}

/// Ephemeral pipeline preloaded with the fixture taxonomy
pub fn loaded_pipeline() -> Arc<Pipeline> {
    let pipeline = Pipeline::in_memory(PipelineConfig::default());
    pipeline
        .load_entries(taxonomy_entries())
        .expect("taxonomy load");
    pipeline
}

/// Write the fixture taxonomy as a snapshot file, returning its path.
/// The caller keeps the TempDir alive.
pub fn write_taxonomy_file(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("taxonomy.json");
    let json = serde_json::to_string_pretty(&taxonomy_entries()).expect("serialize taxonomy");
    let mut file = std::fs::File::create(&path).expect("create taxonomy file");
    file.write_all(json.as_bytes()).expect("write taxonomy");
    path
}

/// Valid PNG bytes for a solid-color image
pub fn png_bytes(r: u8, g: u8, b: u8) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(32, 32, image::Rgb([r, g, b]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encode fixture png");
    bytes.into_inner()
}

/// A text bundle reading like an EV review page
pub fn ev_article() -> ContentBundle {
    ContentBundle::from_text(
        "https://example.com/reviews/ev-range-test",
        "We tested the battery range of six electric vehicles on a single charge. \
         Charging speed at public charging networks varied widely, and the electric \
         models with the largest battery packs delivered the best range.",
    )
}

/// A text bundle reading like a credit card comparison page
pub fn credit_article() -> ContentBundle {
    ContentBundle::from_text(
        "https://example.com/finance/best-rewards-cards",
        "Comparing rewards credit cards: annual fees, interest rates and sign-up \
         bonuses. The best credit card for travel rewards depends on your spending.",
    )
}

/// A bundle with no text and only images
pub fn image_only_bundle() -> ContentBundle {
    ContentBundle {
        source: "https://example.com/gallery".to_string(),
        text: String::new(),
        images: vec![
            RawImage {
                bytes: png_bytes(220, 40, 40),
                source_url: Some("https://example.com/img/1.png".to_string()),
            },
            RawImage {
                bytes: png_bytes(40, 40, 220),
                source_url: Some("https://example.com/img/2.png".to_string()),
            },
        ],
        layout: Default::default(),
    }
}
