use clap::Subcommand;
use codeearn_core::{Config, RestrictedApp, RestrictedSet, SqliteRestrictedSet};

use super::open_shared;

#[derive(Subcommand)]
pub enum AppsAction {
    /// List restricted apps
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restrict an app
    Add {
        /// Package name (e.g. "com.instagram.android")
        package_name: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Forget an app entirely
    Remove { package_name: String },
    /// Turn the restriction back on
    Enable { package_name: String },
    /// Keep the app listed but stop restricting it
    Disable { package_name: String },
    /// Record the configured default apps if none are listed yet
    Seed,
}

pub fn run(action: AppsAction) -> Result<(), Box<dyn std::error::Error>> {
    let set = SqliteRestrictedSet::new(open_shared()?)?;

    match action {
        AppsAction::List { json } => {
            let apps = set.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&apps)?);
            } else if apps.is_empty() {
                println!("no restricted apps");
            } else {
                for app in apps {
                    let mark = if app.active { "locked" } else { "off" };
                    println!("{:<8} {} ({})", mark, app.package_name, app.app_name);
                }
            }
        }
        AppsAction::Add { package_name, name } => {
            let package_name = package_name.trim().to_string();
            if package_name.is_empty() {
                return Err("package name must not be blank".into());
            }
            let app_name = name.unwrap_or_else(|| package_name.clone());
            set.upsert(RestrictedApp::new(package_name.clone(), app_name))?;
            println!("restricted {package_name}");
        }
        AppsAction::Remove { package_name } => {
            require(set.remove(&package_name)?, &package_name)?;
            println!("removed {package_name}");
        }
        AppsAction::Enable { package_name } => {
            require(set.set_active(&package_name, true)?, &package_name)?;
            println!("enabled {package_name}");
        }
        AppsAction::Disable { package_name } => {
            require(set.set_active(&package_name, false)?, &package_name)?;
            println!("disabled {package_name}");
        }
        AppsAction::Seed => {
            let config = Config::load()?;
            let added = set.seed_if_empty(&config.lock.default_restricted)?;
            println!("seeded {added} apps");
        }
    }
    Ok(())
}

fn require(found: bool, package_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    if found {
        Ok(())
    } else {
        Err(format!("unknown app: {package_name}").into())
    }
}
