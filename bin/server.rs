// Smart ID Chip Storage Engine - Web Server
// REST API over the SQLite chip store

use anyhow::{Context, Result};
use smartid_chip::api::{router, AppState};
use smartid_chip::{logging, AppConfig, CodeBook, SqliteChipStore};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing("info");

    println!("🌐 Smart ID Chip Storage - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = AppConfig::from_env()?;
    let book = CodeBook::standard();

    let mut store = SqliteChipStore::open(&config.db_path, book.clone(), config.layout)?;
    println!("✓ Chip store opened: {}", config.db_path.display());

    if store.patient_count()? == 0 {
        let written = store.seed_demo()?;
        println!("✓ Seeded {} demo patients", written);
    }

    let app = router(AppState::new(store, book));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");

    println!("\n🚀 Server running on http://{}", config.bind_addr);
    println!("   API: http://{}/api/health", config.bind_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
