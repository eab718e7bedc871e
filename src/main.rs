// =============================================================================
// Arcade Learning Environment over FIFO pipes
// =============================================================================
// Run:
//   mkfifo ale_fifo_out ale_fifo_in      (or: cargo run -- setup)
//   cargo run --release -- run --game freeway --ale ../ale --rom-dir roms/
//   cargo run --release -- games

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;

use ale_fifo_rl::{
    CloseReason, EmulatorLink, EpisodeController, Game, GameProfile, GameSpec, LinkConfig,
    RandomAgent, prepare_fifos, save_reward_history, summarize,
};

// =============================================================================
// Run
// =============================================================================

fn load_spec(args: &RunArgs) -> Result<GameSpec> {
    let mut spec = match (&args.game, &args.profile) {
        (Some(name), None) => name.parse::<Game>().map_err(anyhow::Error::msg)?.spec(),
        (None, Some(path)) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open profile: {}", path.display()))?;
            serde_json::from_reader(std::io::BufReader::new(file))
                .with_context(|| format!("Invalid profile: {}", path.display()))?
        }
        _ => bail!("pass exactly one of --game or --profile"),
    };

    if let Some(frame_skip) = args.frame_skip {
        spec.settings.frame_skip = frame_skip;
    }
    if let Some(start_delay) = args.start_delay {
        spec.settings.start_delay = start_delay;
    }
    spec.validate()?;
    Ok(spec)
}

fn run(args: &RunArgs) -> Result<()> {
    let spec = load_spec(args)?;
    let config = LinkConfig {
        ale_binary: args.ale.clone(),
        rom_dir: args.rom_dir.clone(),
        working_dir: args.work_dir.clone(),
        ..Default::default()
    };

    eprintln!("═══════════════════════════════════════════════════════════");
    eprintln!("  RUN: {} ({})", spec.name, spec.settings.rom_file);
    eprintln!("═══════════════════════════════════════════════════════════");
    eprintln!(
        "frame skip {}, restart delay {} ticks, first action {:?}",
        spec.settings.frame_skip,
        spec.settings.restart_delay(),
        spec.settings.first_action
    );

    let mut link = EmulatorLink::launch(&config, &spec.settings)?;
    let mut controller = EpisodeController::new(GameProfile::from_spec(spec));
    let mut agent = match args.seed {
        Some(seed) => RandomAgent::seeded(seed, args.action_repeat),
        None => RandomAgent::new(args.action_repeat),
    };

    let result = link.run(&mut controller, &mut agent);
    let (_, _, process) = link.into_parts();
    let status = process.shutdown()?;

    let summary = result?;
    let history = controller.into_reward_history();
    let stats = summarize(&history);
    eprintln!(
        "Session closed after {} ticks ({}), emulator {status}",
        summary.ticks,
        match summary.close_reason {
            CloseReason::ChildExited => "emulator exited",
            CloseReason::EndOfStream => "pipe closed",
        }
    );
    eprintln!(
        "Episodes: {} | avg reward {:.2} | best {:.2} | last {:.2}",
        stats.episodes, stats.avg_reward, stats.best_reward, stats.last_reward
    );

    if !args.no_save {
        let path = save_reward_history(&history, &args.work_dir)?;
        eprintln!("💾 Reward history saved to {}", path.display());
    }
    Ok(())
}

fn games() -> Result<()> {
    let specs: Vec<GameSpec> = Game::ALL.iter().map(|g| g.spec()).collect();
    println!("{}", serde_json::to_string_pretty(&specs)?);
    Ok(())
}

fn setup(args: &SetupArgs) -> Result<()> {
    let config = LinkConfig {
        working_dir: args.work_dir.clone(),
        ..Default::default()
    };
    let created = prepare_fifos(&config)?;
    if created.is_empty() {
        eprintln!("FIFOs already present in {}", args.work_dir.display());
    }
    for path in created {
        eprintln!("Created {}", path.display());
    }
    Ok(())
}

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "ale-fifo-rl", about = "Drive A.L.E over FIFO pipes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a session with the random agent
    Run(RunArgs),
    /// Print the built-in game profiles as JSON
    Games,
    /// Create the two FIFOs the emulator expects
    Setup(SetupArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Built-in game (freeway, space_invaders, asterix, seaquest, bowling)
    #[arg(long)]
    game: Option<String>,
    /// JSON game profile, instead of --game
    #[arg(long)]
    profile: Option<PathBuf>,
    #[arg(long, default_value = "../ale")]
    ale: PathBuf,
    #[arg(long, default_value = ".")]
    rom_dir: PathBuf,
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
    #[arg(long)]
    frame_skip: Option<u32>,
    #[arg(long)]
    start_delay: Option<u32>,
    /// Extra ticks to hold each random action
    #[arg(long, default_value = "0")]
    action_repeat: u32,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = false)]
    no_save: bool,
}

#[derive(Parser)]
struct SetupArgs {
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => run(args),
        Commands::Games => games(),
        Commands::Setup(args) => setup(args),
    }
}
