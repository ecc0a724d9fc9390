use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use multirando::playthrough::PlaythroughBuilder;
use multirando::settings::{PlaythroughSettings, TraceSettings};
use multirando_game::World;
use multirando_game::worlddef::WorldDef;
use multirando_logic::LogicOracle;
use std::path::PathBuf;

#[derive(Parser)]
struct Args {
    /// World definition JSON (regions, locations, placed items, rules).
    #[arg(long)]
    world: PathBuf,

    /// Where to write the playthrough JSON; stdout if omitted.
    #[arg(long)]
    output_playthrough: Option<PathBuf>,

    /// Where to write the newline-delimited JSON trace log.
    #[arg(long)]
    trace_log: Option<PathBuf>,

    /// Emit one trace line per collected item.
    #[arg(long)]
    per_item_updates: bool,

    /// Emit one trace line per finalized sphere.
    #[arg(long)]
    per_sphere_updates: bool,

    /// Include origin-to-region entrance paths in the playthrough.
    #[arg(long)]
    paths: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let args = Args::parse();

    let world_str = std::fs::read_to_string(&args.world)
        .with_context(|| format!("Unable to read world definition {}", args.world.display()))?;
    let def: WorldDef = serde_json::from_str(&world_str)
        .with_context(|| format!("Unable to parse world definition {}", args.world.display()))?;
    let mut world = World::from_def(&def)?;
    info!(
        "Loaded world: {} participant(s), {} regions, {} locations",
        world.num_players(),
        world.regions.len(),
        world.locations.len()
    );

    let settings = PlaythroughSettings {
        trace: TraceSettings {
            log_path: args.trace_log.clone(),
            per_item_updates: args.per_item_updates,
            per_sphere_updates: args.per_sphere_updates,
        },
        compute_paths: args.paths,
    };

    let playthrough =
        PlaythroughBuilder::new(&mut world, &LogicOracle, &settings).create_playthrough()?;
    let playthrough_str = serde_json::to_string_pretty(&playthrough)?;
    match &args.output_playthrough {
        Some(path) => {
            info!("Writing playthrough to {}", path.display());
            std::fs::write(path, playthrough_str)?;
        }
        None => println!("{playthrough_str}"),
    }
    Ok(())
}
