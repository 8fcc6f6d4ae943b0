use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use codeearn_core::{Config, EarnOutcome, JsonFileSource, RewardVerifier, SqliteBalanceStore};

use super::{format_ms, open_shared};

#[derive(Subcommand)]
pub enum EarnAction {
    /// Reward accepted submissions from a saved `user.status` response
    Verify {
        /// Path to the saved JSON response
        #[arg(long)]
        from: PathBuf,
        /// Judge handle (defaults to `user.handle` from config)
        #[arg(long)]
        handle: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: EarnAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        EarnAction::Verify { from, handle, json } => {
            let config = Config::load()?;
            let handle = handle.unwrap_or_else(|| config.user.handle.clone());

            let db = open_shared()?;
            let store = Arc::new(SqliteBalanceStore::new(db.clone(), config.lock.default_balance_ms)?);
            let verifier = RewardVerifier::new(Box::new(JsonFileSource::new(from)), store, db, &config.reward);

            let outcome = verifier.verify_and_reward(&handle)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }
            match outcome {
                EarnOutcome::Rewarded { problems, earned_ms } => {
                    println!("Great job! Earned {} for {problems} problem(s)", format_ms(earned_ms));
                }
                EarnOutcome::NoNewSubmissions => println!("No new accepted submissions found"),
            }
        }
    }
    Ok(())
}
