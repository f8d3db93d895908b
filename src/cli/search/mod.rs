//! Search command - seeds an in-process catalog and runs one vector search

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use tracing::info;

use crate::config::AppConfig;
use crate::domain::catalog::Product;
use crate::infrastructure::document_store::StorageType;
use crate::infrastructure::logging;

/// Arguments for the search command
#[derive(Args, Clone, Debug)]
pub struct SearchArgs {
    /// JSON file holding an array of products
    #[arg(long)]
    pub catalog: PathBuf,

    /// Query vector as comma separated components
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub vector: Vec<f32>,

    /// Similarity floor (overrides config)
    #[arg(long, allow_hyphen_values = true)]
    pub min_score: Option<f32>,

    /// Maximum number of results (overrides config)
    #[arg(long)]
    pub max_results: Option<usize>,
}

/// Run a search and print the matches as JSON
pub async fn run(args: SearchArgs) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut config = AppConfig::load().unwrap_or_default();
    config.storage.backend = StorageType::InMemory.to_string();
    logging::init_logging(&config.logging)?;

    let catalog = load_catalog(&args.catalog)?;
    let stores = crate::create_stores(&config).await?;
    let seeded = crate::ensure_catalog_seeded(&stores, catalog).await?;

    info!(products = seeded, catalog = %args.catalog.display(), "Catalog loaded");

    let min_score = args.min_score.unwrap_or(config.search.min_score);
    let max_results = args.max_results.unwrap_or(config.search.max_results);

    let results = stores
        .products
        .search(&args.vector, min_score, max_results)
        .await?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

/// Read a catalog file into products
pub fn load_catalog(path: &Path) -> anyhow::Result<Vec<Product>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;

    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse catalog {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_catalog() {
        let path = std::env::temp_dir().join(format!("catalog-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"[{"id": "p1", "categoryId": "c1", "categoryName": "Bikes", "sku": "RB-1",
                 "name": "Road Bike", "description": "fast", "price": 999.0,
                 "tags": ["road"], "vector": [1.0, 0.0]}]"#,
        )
        .unwrap();

        let products = load_catalog(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].category_id, "c1");
        assert_eq!(products[0].vector, vec![1.0, 0.0]);
    }

    #[test]
    fn test_load_catalog_missing_file() {
        let err = load_catalog(Path::new("/nonexistent/catalog.json")).unwrap_err();

        assert!(err.to_string().contains("Failed to read catalog"));
    }
}
