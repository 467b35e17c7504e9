use anyhow::Result;
use content_repo::config::AppConfig;
use content_repo::logic::{RetryPolicy, SchemaRegistry};
use content_repo::store::PostgresStore;
use std::sync::Arc;

/// Replays the change chain of every stored schema container and reports
/// versions whose stored definition differs from the replayed one
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info,sqlx=warn")).init();

    let config = AppConfig::load()?;
    let store = PostgresStore::new(&config.database_url()?, config.max_connections()).await?;
    println!("Connected to database. Verifying schema chains...");

    let registry = SchemaRegistry::new(Arc::new(store), RetryPolicy::no_retry());
    let results = registry.verify_all().await?;

    let mut broken = 0;
    for result in &results {
        if result.is_consistent() {
            println!("ok      {} ({} versions)", result.name, result.versions);
            continue;
        }
        broken += 1;
        match &result.error {
            Some(error) => println!("broken  {}: replay failed: {}", result.name, error),
            None => println!(
                "broken  {}: fingerprint mismatch in versions {:?}",
                result.name, result.mismatched_versions
            ),
        }
    }

    println!("\nVerified {} schema containers, {} inconsistent", results.len(), broken);
    if broken > 0 {
        std::process::exit(1);
    }
    Ok(())
}
