use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;

// Use library instead of local modules
use visitor_zscore::{
    count_visitors, get_visitors_by_brand, insert_visitors, list_brands, load_csv,
    run_and_record, BrandId, Config, SqliteStore, ZscorePipeline,
};

const USAGE: &str = "Usage:
  visitor-zscore import <visitors.csv>   Load visitors (id,brand_id,amt,trn)
  visitor-zscore run <brand>             Recompute z-scores for one brand
  visitor-zscore run-all                 Recompute z-scores for every brand
  visitor-zscore show <brand>            Print visitors and their z-scores";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let config = Config::load()?;

    match args.get(1).map(String::as_str) {
        Some("import") => run_import(&config, args.get(2))?,
        Some("run") => run_brand(&config, args.get(2))?,
        Some("run-all") => run_all(&config)?,
        Some("show") => show_brand(&config, args.get(2))?,
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path)
}

fn run_import(config: &Config, csv_path: Option<&String>) -> Result<()> {
    let csv_path = csv_path.context("import needs a CSV path")?;

    println!("📂 Loading {}...", csv_path);
    let visitors = load_csv(Path::new(csv_path))?;
    println!("✓ Loaded {} visitors from CSV", visitors.len());

    let store = open_store(config)?;
    insert_visitors(store.connection(), &visitors)?;

    let count = count_visitors(store.connection())?;
    println!("✓ Database contains {} visitors", count);

    Ok(())
}

fn run_brand(config: &Config, brand: Option<&String>) -> Result<()> {
    let brand = BrandId::from(brand.context("run needs a brand id")?.as_str());

    let pipeline =
        ZscorePipeline::new(open_store(config)?).with_partition_cache(config.cache_partition);

    match run_and_record(&pipeline, &brand, "cli") {
        Ok(report) => {
            println!("✅ {}", report.summary());
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Z-score update for brand {} failed: {}", brand, e);
            if e.writes_applied() > 0 {
                eprintln!("   {} visitors already hold new z-scores", e.writes_applied());
            }
            std::process::exit(1);
        }
    }
}

fn run_all(config: &Config) -> Result<()> {
    let pipeline =
        ZscorePipeline::new(open_store(config)?).with_partition_cache(config.cache_partition);
    let brands = list_brands(pipeline.store().connection())?;

    let mut failed = Vec::new();
    for brand in &brands {
        match run_and_record(&pipeline, brand, "cli") {
            Ok(report) => println!("✓ {}", report.summary()),
            Err(e) => {
                println!("✗ Brand {}: {}", brand, e);
                failed.push(brand.clone());
            }
        }
    }

    println!("\n{} of {} brands updated", brands.len() - failed.len(), brands.len());
    if !failed.is_empty() {
        bail!("{} brand(s) failed", failed.len());
    }

    Ok(())
}

fn show_brand(config: &Config, brand: Option<&String>) -> Result<()> {
    let brand = BrandId::from(brand.context("show needs a brand id")?.as_str());
    let store = open_store(config)?;

    let visitors = get_visitors_by_brand(store.connection(), &brand)?;
    println!("{:<38} {:>12} {:>6} {:>10} {:>10}", "visitor", "amt", "trn", "z.amt", "z.trn");

    for scored in visitors {
        let (z_amt, z_trn) = match scored.zscore {
            Some(z) => (format!("{:.4}", z.amt), format!("{:.4}", z.trn)),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<38} {:>12.2} {:>6} {:>10} {:>10}",
            scored.visitor.id, scored.visitor.summaries.amt, scored.visitor.summaries.trn, z_amt, z_trn
        );
    }

    Ok(())
}
