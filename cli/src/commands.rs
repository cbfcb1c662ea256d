use anyhow::{Context, Result};
use clap::ArgMatches;
use save_vault::models::{Game, Save};
use save_vault::Engine;
use std::path::Path;

pub fn add_game(engine: &Engine, args: &ArgMatches) -> Result<()> {
    let title = required(args, "title")?;
    let external_id = required(args, "external-id")?;

    let game = engine.register_game(title, external_id)?;
    print_game(&game);
    Ok(())
}

pub fn update_game(engine: &Engine, args: &ArgMatches) -> Result<()> {
    let id = parse_id(args, "id")?;
    let title = required(args, "title")?;
    let external_id = required(args, "external-id")?;

    let game = engine.update_game(id, title, external_id)?;
    print_game(&game);
    Ok(())
}

pub fn list_games(engine: &Engine) -> Result<()> {
    let games = engine.list_games()?;

    if games.is_empty() {
        println!("No games registered.");
    }

    for game in &games {
        print_game(game);
    }
    Ok(())
}

pub fn backup(engine: &Engine, args: &ArgMatches) -> Result<()> {
    let external_id = required(args, "external-id")?;
    let path = Path::new(required(args, "path")?);

    let save = engine.backup_save(external_id, path)?;
    println!("Backed up to {}", save.backup_path);
    Ok(())
}

pub fn restore(engine: &Engine, args: &ArgMatches) -> Result<()> {
    let external_id = required(args, "external-id")?;
    let backup_path = Path::new(required(args, "backup-path")?);

    engine.restore_save(external_id, backup_path)?;
    println!("Restored {}", backup_path.display());
    Ok(())
}

pub fn list_saves(engine: &Engine, args: &ArgMatches) -> Result<()> {
    let game_id = parse_id(args, "game-id")?;
    let saves = engine.list_saves(game_id)?;

    if saves.is_empty() {
        println!("No backups for game {}.", game_id);
    }

    for save in &saves {
        print_save(save);
    }
    Ok(())
}

pub fn info(engine: &Engine, args: &ArgMatches) -> Result<()> {
    let save_id = parse_id(args, "id")?;
    let save = engine.get_save(save_id)?;
    print_save(&save);

    if args.is_present("delta") {
        let delta = engine.delta(save_id)?;

        if delta.is_empty() {
            println!("  unchanged since backup");
        }

        for path in &delta.added {
            println!("  + {}", path.display());
        }
        for path in &delta.changed {
            println!("  ~ {}", path.display());
        }
        for path in &delta.removed {
            println!("  - {}", path.display());
        }
    }
    Ok(())
}

pub fn delete_save(engine: &Engine, args: &ArgMatches) -> Result<()> {
    let save_id = parse_id(args, "id")?;

    engine.delete_save(save_id)?;
    println!("Deleted save {}", save_id);
    Ok(())
}

pub fn delete_game(engine: &Engine, args: &ArgMatches) -> Result<()> {
    let game_id = parse_id(args, "id")?;

    engine.delete_game(game_id)?;
    println!("Deleted game {} and all of its backups", game_id);
    Ok(())
}

pub fn purge(engine: &Engine) -> Result<()> {
    let count = engine.purge_trash()?;
    println!("Purged {} leftover backup(s)", count);
    Ok(())
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.value_of(name)
        .with_context(|| format!("No {} was provided.", name))
}

fn parse_id(args: &ArgMatches, name: &str) -> Result<i32> {
    let raw = required(args, name)?;
    raw.parse()
        .with_context(|| format!("\"{}\" is not a valid {}.", raw, name))
}

fn print_game(game: &Game) {
    println!("[{}] {} ({})", game.id, game.title, game.external_id);
}

fn print_save(save: &Save) {
    println!(
        "[{}] {} {} <- {} ({})",
        save.id,
        save.created_at.format("%Y-%m-%d %H:%M:%S"),
        save.backup_path,
        save.source_path,
        save.kind
    );
}
