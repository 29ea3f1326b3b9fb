//! latest-titles — Ad-hoc CLI that prints the most recent improvement titles.
//!
//! Reads store configuration from the environment (a local `.env` file is
//! honored) and lists the newest N titles, default 3.
//!
//! Run:
//! ```bash
//! SUPABASE_URL=https://<project>.supabase.co \
//! SUPABASE_KEY=<service-role-key> \
//!   cargo run -p latest-titles -- 5
//! ```

use std::env;
use std::process;

use domain::ImprovementRepository;
use supabase_rest::{SupaConfig, SupaRepo};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().compact().with_target(false))
        .init();
}

fn run() -> Result<(), String> {
    let count = match env::args().nth(1) {
        Some(arg) => arg
            .parse::<usize>()
            .map_err(|_| format!("invalid count: {arg}"))?,
        None => 3,
    };

    let config = SupaConfig::from_env().map_err(|e| e.to_string())?;
    let repo = SupaRepo::connect(config).map_err(|e| format!("store unreachable: {e}"))?;

    tracing::debug!(count, "fetching latest improvements");
    let improvements = repo.get_all(Some(count)).map_err(|e| e.to_string())?;
    if improvements.is_empty() {
        println!("no improvements stored yet");
        return Ok(());
    }

    println!("latest entries:");
    for imp in &improvements {
        println!("- {}", imp.title);
    }
    Ok(())
}

fn main() {
    // A local .env is convenient for ad-hoc runs; ignore if absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    if let Err(msg) = run() {
        eprintln!("error: {}", msg);
        process::exit(1);
    }
}
