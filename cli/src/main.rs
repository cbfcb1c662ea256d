use anyhow::{Context, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use save_vault::{Config, ConfigManager, Engine, ErrorKind};
use std::path::PathBuf;
use std::process;

mod commands;

fn main() {
    init_tracing();

    let matches = App::new("Save Vault")
        .version("0.1.0")
        .author("paoda <musukarekai@gmail.com>")
        .about("Backs up and restores saved game data.")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .takes_value(true)
                .help("Use this config file instead of the default one."),
        )
        .subcommand(
            SubCommand::with_name("add-game")
                .about("Registers a game.")
                .arg(Arg::with_name("title").index(1).required(true))
                .arg(
                    Arg::with_name("external-id")
                        .help("Unique identifier, e.g. the Steam app id.")
                        .index(2)
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("update-game")
                .about("Changes a game's title or external id.")
                .arg(Arg::with_name("id").index(1).required(true))
                .arg(Arg::with_name("title").index(2).required(true))
                .arg(Arg::with_name("external-id").index(3).required(true)),
        )
        .subcommand(SubCommand::with_name("games").about("Lists every registered game."))
        .subcommand(
            SubCommand::with_name("backup")
                .about("Copies a save directory or file into a new backup.")
                .arg(Arg::with_name("external-id").index(1).required(true))
                .arg(
                    Arg::with_name("path")
                        .help("The save directory or file to back up.")
                        .index(2)
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("restore")
                .about("Copies a backup back onto the original save location.")
                .arg(Arg::with_name("external-id").index(1).required(true))
                .arg(Arg::with_name("backup-path").index(2).required(true)),
        )
        .subcommand(
            SubCommand::with_name("saves")
                .about("Lists the backups of a game.")
                .arg(Arg::with_name("game-id").index(1).required(true)),
        )
        .subcommand(
            SubCommand::with_name("info")
                .about("Displays information about a backup.")
                .arg(Arg::with_name("id").index(1).required(true))
                .arg(
                    Arg::with_name("delta")
                        .short("d")
                        .long("delta")
                        .help("Determines which files have changed since the backup."),
                ),
        )
        .subcommand(
            SubCommand::with_name("delete-save")
                .about("Deletes a backup and its directory.")
                .alias("del")
                .arg(Arg::with_name("id").index(1).required(true)),
        )
        .subcommand(
            SubCommand::with_name("delete-game")
                .about("Deletes a game together with all of its backups.")
                .arg(Arg::with_name("id").index(1).required(true)),
        )
        .subcommand(
            SubCommand::with_name("purge").about("Removes backups left over by failed deletes."),
        )
        .get_matches();

    if let Err(err) = run(&matches) {
        eprintln!("Error: {:#}", err);
        process::exit(exit_code(&err));
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches.value_of("config"))?;
    let engine = Engine::open(&config).context("Unable to open the save database")?;

    match matches.subcommand() {
        ("add-game", Some(sub_matches)) => commands::add_game(&engine, sub_matches),
        ("update-game", Some(sub_matches)) => commands::update_game(&engine, sub_matches),
        ("games", Some(_)) => commands::list_games(&engine),
        ("backup", Some(sub_matches)) => commands::backup(&engine, sub_matches),
        ("restore", Some(sub_matches)) => commands::restore(&engine, sub_matches),
        ("saves", Some(sub_matches)) => commands::list_saves(&engine, sub_matches),
        ("info", Some(sub_matches)) => commands::info(&engine, sub_matches),
        ("delete-save", Some(sub_matches)) => commands::delete_save(&engine, sub_matches),
        ("delete-game", Some(sub_matches)) => commands::delete_game(&engine, sub_matches),
        ("purge", Some(_)) => commands::purge(&engine),
        _ => Ok(()),
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let path = match path {
        Some(path) => PathBuf::from(path),
        None => ConfigManager::default_path()?,
    };

    let manager = ConfigManager::new(path, &Config::platform_default()?)?;
    let config = manager
        .load_from_file()
        .with_context(|| format!("Unable to load {}", manager.path().display()))?;

    tracing::debug!(config = ?config, "loaded config");
    Ok(config)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // Only fails if a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn exit_code(err: &anyhow::Error) -> i32 {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<save_vault::Error>())
        .map(save_vault::Error::kind);

    match kind {
        Some(ErrorKind::NotFound) | Some(ErrorKind::BackupMissing) => 2,
        Some(ErrorKind::Conflict) => 3,
        Some(ErrorKind::InvalidInput) => 4,
        Some(ErrorKind::Io) => 5,
        Some(ErrorKind::Database) | Some(ErrorKind::Config) | None => 1,
    }
}
