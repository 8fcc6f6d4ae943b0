use clap::Subcommand;
use codeearn_core::{Config, SqliteBalanceStore, TimeBalanceStore};
use serde_json::json;

use super::{format_ms, open_shared};

#[derive(Subcommand)]
pub enum BalanceAction {
    /// Show the remaining time
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Overwrite the remaining time
    Set {
        /// New balance in milliseconds
        ms: u64,
    },
    /// Add (or with a negative value, remove) time
    Add {
        /// Delta in milliseconds
        #[arg(allow_hyphen_values = true)]
        delta_ms: i64,
    },
}

pub fn run(action: BalanceAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let store = SqliteBalanceStore::new(open_shared()?, config.lock.default_balance_ms)?;

    match action {
        BalanceAction::Show { json } => {
            let balance_ms = store.read_once()?;
            if json {
                let out = json!({ "balance_ms": balance_ms });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{} remaining", format_ms(balance_ms));
            }
        }
        BalanceAction::Set { ms } => {
            store.set(ms)?;
            println!("balance set to {}", format_ms(ms));
        }
        BalanceAction::Add { delta_ms } => {
            let balance_ms = store.add(delta_ms)?;
            println!("balance now {}", format_ms(balance_ms));
        }
    }
    Ok(())
}
