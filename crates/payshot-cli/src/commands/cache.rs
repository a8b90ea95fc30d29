//! Cache command - inspect or clear a result directory's recognition cache.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use console::style;

use payshot_core::cache::{self, FingerprintCache};

use super::load_config;

/// Arguments for the cache command.
#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show cache statistics
    Show {
        /// Result directory of a previous batch
        result_dir: PathBuf,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Back up and remove the cache so the next batch recognizes everything
    Clear {
        /// Result directory of a previous batch
        result_dir: PathBuf,
    },
}

pub async fn run(args: CacheArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    match args.command {
        CacheCommand::Show { result_dir, json } => {
            let path = result_dir.join(&config.output.cache_file);
            if !path.exists() {
                println!("{} No cache at {}", style("ℹ").blue(), path.display());
                return Ok(());
            }

            let stats = FingerprintCache::load(&path).stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }

            println!("Cache file: {}", path.display());
            println!(
                "Entries: {} ({} complete)",
                style(stats.entries).green(),
                stats.complete_entries
            );
            for (folder, count) in &stats.folders {
                println!("  {:40} {:5}", folder, count);
            }
        }
        CacheCommand::Clear { result_dir } => {
            let path = result_dir.join(&config.output.cache_file);
            match cache::clear(&path)? {
                Some(backup) => println!(
                    "{} Cache cleared, backup at {}",
                    style("✓").green(),
                    backup.display()
                ),
                None => println!("{} No cache at {}", style("ℹ").blue(), path.display()),
            }
        }
    }

    Ok(())
}
