// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Result};
use std::env;
use std::path::Path;

use smartid_chip::{logging, AppConfig, CodeBook, IdentityLookup, SqliteChipStore};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = AppConfig::from_env()?;

    match args.get(1).map(String::as_str) {
        Some("seed") => {
            logging::init_tracing("info");
            run_seed(&config)?;
        }
        Some("import") => {
            logging::init_tracing("info");
            let Some(csv_path) = args.get(2) else {
                bail!("usage: smartid import <visits.csv>");
            };
            run_import(&config, Path::new(csv_path))?;
        }
        Some("show") => {
            logging::init_tracing("warn");
            let Some(identity) = args.get(2) else {
                bail!("usage: smartid show <identity>");
            };
            run_show(&config, identity)?;
        }
        Some(other) if other != "ui" => {
            bail!("unknown command {:?} (expected seed, import, show or ui)", other);
        }
        _ => {
            // UI mode (default); keep logs out of the alternate screen
            logging::init_tracing("error");
            run_ui_mode(&config)?;
        }
    }

    Ok(())
}

fn open_store(config: &AppConfig) -> Result<SqliteChipStore> {
    SqliteChipStore::open(&config.db_path, CodeBook::standard(), config.layout)
}

fn run_seed(config: &AppConfig) -> Result<()> {
    println!("💳 Seeding demo patients");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut store = open_store(config)?;
    let written = store.seed_demo()?;

    println!("✓ Wrote {} chips to {}", written, config.db_path.display());
    for identity in store.identities()? {
        println!("  • {}", identity);
    }
    Ok(())
}

fn run_import(config: &AppConfig, csv_path: &Path) -> Result<()> {
    println!("📂 Importing visits from {}", csv_path.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut store = open_store(config)?;
    let report = store.import_visits_csv(csv_path)?;

    println!("✓ Imported: {} visits", report.imported);
    println!("✓ Chips written: {}", report.chips_written);
    if report.evicted > 0 {
        println!("↺ Evicted (history full): {}", report.evicted);
    }
    for (line, reason) in &report.rejected {
        println!("✗ line {}: {}", line, reason);
    }
    Ok(())
}

fn run_show(config: &AppConfig, identity: &str) -> Result<()> {
    let store = open_store(config)?;
    let book = CodeBook::standard();

    let Some(chip) = store.lookup(identity)? else {
        bail!("identity not found: {}", identity);
    };

    let critical = chip.critical();
    let usage = chip.usage();
    println!("🪪 {} ({})", critical.name, critical.identity);
    println!("   Blood type: {}", critical.blood_type);
    if critical.allergies.is_empty() {
        println!("   Allergies:  none recorded");
    } else {
        println!("   Allergies:  {}", critical.allergies.join(", "));
    }
    for code in &critical.chronic_conditions {
        println!("   Chronic:    {} - {}", code, book.diagnosis_label(code));
    }

    println!(
        "\n💾 Chip storage: {:.1}% used ({} critical + {} history, {} available)",
        usage.percent_used, usage.critical_bytes, usage.history_bytes, usage.available_bytes
    );

    println!(
        "\n📋 History ({} of {} slots, newest first)",
        chip.visit_count(),
        chip.layout().max_visit_count()
    );
    for visit in chip.history().reverse_chronological() {
        println!(
            "   {}  {:<6} {:<28} {:<8} {:<12} {:>3}B",
            visit.display_date(),
            visit.diagnosis_code(),
            book.diagnosis_label(visit.diagnosis_code()),
            visit.medication_code(),
            book.medication_label(visit.medication_code()),
            visit.encoded_size()
        );
    }
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &AppConfig) -> Result<()> {
    use smartid_chip::SimulatedCard;

    let mut store = open_store(config)?;
    if store.patient_count()? == 0 {
        println!("📊 Empty chip store, seeding demo patients...");
        store.seed_demo()?;
    }

    let card = SimulatedCard::new(store, config.latency);
    let mut app = ui::App::new(CodeBook::standard(), Box::new(card));
    ui::run_ui(&mut app)?;

    println!("\n✅ Clinic terminal closed");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &AppConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin smartid-server --features server");
    std::process::exit(1);
}
