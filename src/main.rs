use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use encore_catalog::config;
use encore_catalog::store::{PreferenceStore, SessionStore, SqliteStorage, Theme};
use encore_catalog::{load_artist_profile, Lookup, SpotifyClient};
use env_logger;

const PROFILE_LIMIT: usize = 5;

/// `encore-catalog` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "encore-catalog",
    about = "Look up artists in the music catalog and manage local preferences",
    version
)]
struct Cli {
    /// Configuration file, created with defaults when missing.
    #[arg(long = "config", value_name = "path", default_value = config::CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show an artist with their top tracks and related artists.
    Search {
        /// Artist name; several words are joined with spaces.
        #[arg(value_name = "name", required = true, num_args = 1..)]
        name: Vec<String>,
    },
    /// Show the colour theme, or set it when one is given.
    Theme {
        #[arg(value_name = "light|dark|system", value_parser = parse_theme)]
        theme: Option<Theme>,
    },
    /// Set the market used for top tracks.
    Market {
        /// Two-letter country code.
        #[arg(value_name = "code")]
        code: String,
    },
    /// Forget the signed-in session.
    Logout,
}

fn parse_theme(value: &str) -> Result<Theme, String> {
    value.parse()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config(&cli.config)?;

    let storage = Arc::new(SqliteStorage::open(&config.storage.path)?);
    let preferences = PreferenceStore::new(Arc::clone(&storage));
    let sessions = SessionStore::new(Arc::clone(&storage));

    match cli.command {
        Command::Search { name } => {
            let name = name.join(" ");
            let market = preferences.load().market;
            let client = SpotifyClient::from_config(&config.catalog)?;

            match load_artist_profile(&client, &name, &market, PROFILE_LIMIT).await? {
                Lookup::Found(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
                Lookup::NotFound => println!("No artist found for \"{}\"", name),
            }
        }
        Command::Theme { theme } => {
            let mut current = preferences.load();
            if let Some(theme) = theme {
                current.theme = theme;
                preferences.save(&current)?;
            }
            println!("Theme: {:?}", current.theme);
        }
        Command::Market { code } => {
            let mut current = preferences.load();
            current.market = code.to_ascii_uppercase();
            preferences.save(&current)?;
            println!("Market: {}", current.market);
        }
        Command::Logout => {
            match sessions.load() {
                Some(session) => println!("Signing out {}", session.email),
                None => println!("No active session"),
            }
            sessions.clear()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_joins_multi_word_names() {
        let cli = Cli::try_parse_from(["encore-catalog", "search", "Daft", "Punk"]).unwrap();
        match cli.command {
            Command::Search { name } => assert_eq!(name.join(" "), "Daft Punk"),
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.config, PathBuf::from(config::CONFIG_PATH));
    }

    #[test]
    fn search_requires_a_name() {
        assert!(Cli::try_parse_from(["encore-catalog", "search"]).is_err());
    }

    #[test]
    fn theme_is_optional_and_validated() {
        let cli = Cli::try_parse_from(["encore-catalog", "theme", "Dark"]).unwrap();
        assert!(matches!(cli.command, Command::Theme { theme: Some(Theme::Dark) }));

        let cli = Cli::try_parse_from(["encore-catalog", "theme"]).unwrap();
        assert!(matches!(cli.command, Command::Theme { theme: None }));

        assert!(Cli::try_parse_from(["encore-catalog", "theme", "sepia"]).is_err());
    }

    #[test]
    fn market_and_logout_parse() {
        let cli = Cli::try_parse_from(["encore-catalog", "--config", "alt.toml", "market", "se"]).unwrap();
        assert!(matches!(cli.command, Command::Market { ref code } if code.as_str() == "se"));
        assert_eq!(cli.config, PathBuf::from("alt.toml"));

        let cli = Cli::try_parse_from(["encore-catalog", "logout"]).unwrap();
        assert!(matches!(cli.command, Command::Logout));
    }
}
