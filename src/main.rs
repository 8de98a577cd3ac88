//! gdpack - game data packager

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use gdpack::config::ResolveConfig;
use gdpack::model::{GameData, IdentificationIndex};
use gdpack::resolver::{Diagnostic, FillResult, Resolver};
use gdpack::scan;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gdpack")]
#[command(version)]
#[command(about = "Build game data packages from installers, CDs and existing installations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the packages and files of a game description
    Info {
        /// Path to the game description (JSON)
        game: PathBuf,
    },

    /// Print the canonical form of a game description
    Dump {
        /// Path to the game description (JSON)
        game: PathBuf,
    },

    /// Report which wanted file each given file is
    Identify {
        /// Path to the game description (JSON)
        game: PathBuf,

        /// Files or directories to identify
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Locate everything the packages need
    Resolve {
        /// Path to the game description (JSON)
        game: PathBuf,

        /// Files or directories to search (CDs, installers, archives)
        paths: Vec<PathBuf>,

        /// Package or virtual package to resolve (repeatable; default: all)
        #[arg(short, long = "package")]
        packages: Vec<String>,

        /// Download freely redistributable files
        #[arg(long)]
        download: bool,

        /// Where to keep downloaded files
        #[arg(long)]
        download_dir: Option<PathBuf>,

        /// Do not search Steam libraries and existing install directories
        #[arg(long)]
        no_default_locations: bool,

        /// Stage every complete package under this directory
        #[arg(long)]
        stage: Option<PathBuf>,

        /// Mirror URL prefix to try first
        #[arg(long, env = "GDPACK_MIRROR")]
        mirror: Option<String>,

        /// Seed for the mirror order (reproducible runs)
        #[arg(long)]
        seed: Option<u64>,

        /// Per-URL download timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(if cli.verbose { "gdpack=debug".parse()? } else { "gdpack=warn".parse()? }),
            )
            .init();
    }

    match cli.command {
        Commands::Info { game } => {
            let game = GameData::load(&game)?;
            let index = IdentificationIndex::build(&game);

            println!("=== {} ===", game.longname());
            println!("Short name: {}", game.shortname);
            println!("Plugin:     {}", game.plugin);
            if let Some(steam) = &game.steam {
                println!("Steam:      {}", steam.path);
            }
            println!("Files:      {}", game.files.len());
            println!("Groups:     {}", game.groups.len());
            println!("Indexed:    {}", if index.is_empty() { "nothing" } else { "yes" });

            println!("\n=== Packages ===");
            for package in game.packages.values() {
                let required = game.required_files(package);
                let optional = game.optional_files(package);
                println!(
                    "{:<32} {:>4} required {:>4} optional  [{}] {}",
                    package.name,
                    required.len(),
                    optional.len(),
                    package.component,
                    package.install_dir(&game.shortname)
                );
            }

            let search = scan::default_search_paths(&game);
            if !search.is_empty() {
                println!("\n=== Installed copies found ===");
                for path in search {
                    println!("  {}", path.display());
                }
            }
        }

        Commands::Dump { game } => {
            let game = GameData::load(&game)?;
            println!("{}", game.to_json()?);
        }

        Commands::Identify { game, paths } => {
            let mut config = ResolveConfig::new(&game);
            config.search_paths = paths.clone();
            config.validate()?;

            let game = GameData::load(&game)?;
            let mut resolver = Resolver::from_config(game, &config)?;

            for path in &paths {
                for candidate in scan::iterate(path)? {
                    match resolver.identify(&candidate.path, true)? {
                        Some(name) if resolver.session().found.contains_key(&name) => {
                            println!("{}\t{}", name, candidate.path.display())
                        }
                        Some(name) => println!("{} (unsuitable)\t{}", name, candidate.path.display()),
                        None => println!("?\t{}", candidate.path.display()),
                    }
                }
            }
            print_diagnostics(&resolver.session().diagnostics, false);
        }

        Commands::Resolve {
            game,
            paths,
            packages,
            download,
            download_dir,
            no_default_locations,
            stage,
            mirror,
            seed,
            timeout,
        } => {
            let mut config = ResolveConfig::new(&game);
            config.search_paths = paths;
            config.use_default_locations = !no_default_locations;
            config.packages = packages;
            config.allow_download = download;
            config.download_dir = download_dir;
            config.mirror_seed = seed;
            if mirror.is_some() {
                config.preferred_mirror = mirror;
            }
            if let Some(secs) = timeout {
                config.timeout = Duration::from_secs(secs);
            }
            config.validate()?;

            let game = GameData::load(&config.game_path)?;
            let mut search = config.search_paths.clone();
            if config.use_default_locations {
                search.extend(scan::default_search_paths(&game));
            }

            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {spinner:.blue} [{bar:30.white/dim}] {bytes}/{total_bytes} {bytes_per_sec}")
                    .unwrap()
                    .progress_chars("=>-"),
            );
            let bar = pb.clone();
            let mut resolver = Resolver::from_config(game, &config)?.with_progress(Box::new(
                move |done: u64, total: Option<u64>| {
                    if let Some(total) = total {
                        bar.set_length(total);
                    }
                    bar.set_position(done);
                },
            ));

            println!("Searching {} locations...", search.len());
            let identified = resolver.scan(&search)?;
            println!("Identified {} files", identified);

            let report = resolver.resolve(&config.packages, config.allow_download)?;
            pb.finish_and_clear();

            println!("\n=== Packages ===");
            for verdict in &report.verdicts {
                println!("{:<32} {}", verdict.package, verdict.result);
                if verdict.result == FillResult::DownloadNeeded && !config.allow_download {
                    println!("    (run again with --download)");
                }
                for name in &verdict.missing {
                    println!("    missing: {}", name);
                }
            }

            if !report.missing_tools.is_empty() {
                println!("\n=== Missing tools ===");
                for (format, tool) in &report.missing_tools {
                    println!("  {} (needed for {})", tool, format);
                }
            }

            if !report.any_complete() {
                print_diagnostics(&report.diagnostics, true);
                bail!("No package could be completed");
            }

            if let Some(root) = stage {
                for verdict in report.complete() {
                    let plan = resolver.plan_package(&verdict.package)?;
                    let dir = root.join(&verdict.package);
                    plan.stage(&dir)?;
                    println!("Staged {} ({} files) in {}", verdict.package, plan.files.len(), dir.display());
                }
            }
        }
    }

    Ok(())
}

/// Print what an operator can act on. Unresolved files are always shown
/// when `failed`, everything else only when present.
fn print_diagnostics(diagnostics: &[Diagnostic], failed: bool) {
    let relevant: Vec<_> = diagnostics
        .iter()
        .filter(|d| failed || !matches!(d, Diagnostic::Unresolved { .. }))
        .collect();
    if relevant.is_empty() {
        return;
    }

    eprintln!("\n=== Problems ===");
    for diagnostic in relevant {
        eprintln!("  {}", diagnostic);
    }
}
