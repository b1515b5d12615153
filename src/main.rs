use pzero::cli::Args;
use pzero::config;
use pzero::entities::Scene;
use pzero::script::Script;
use pzero::session::Session;
use pzero::view::view_config::load_views;
use pzero::view::{HeadlessRenderer, ViewConfig, ViewKind};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

/// View configs: --views, then pzero_views.json in the config dir, then one 3D view
fn view_configs(args: &Args, path_config: &config::PathConfig) -> Result<Vec<ViewConfig>> {
    if let Some(path) = &args.views {
        return load_views(path);
    }
    let local = config::config_file("pzero_views.json", path_config);
    if local.exists() {
        return load_views(&local);
    }
    debug!("No view config, opening default 3D view");
    Ok(vec![ViewConfig::preset("3D", ViewKind::View3D)])
}

fn run(args: &Args, path_config: &config::PathConfig) -> Result<()> {
    let scene = match &args.scene {
        Some(path) => Scene::from_json(path)?,
        None => Scene::new(),
    };
    info!(
        "Scene: {} collections, {} entities",
        scene.names().count(),
        scene.entity_count()
    );

    let mut session: Session<HeadlessRenderer> = Session::new(scene);
    for cfg in view_configs(args, path_config)? {
        session
            .open_view(&cfg, HeadlessRenderer::new())
            .with_context(|| format!("Cannot open view '{}'", cfg.name))?;
    }

    let mut stdout = std::io::stdout();
    if let Some(path) = &args.script {
        Script::from_json(path)?.run(&mut session, &mut stdout)?;
    }

    if args.print {
        print!("{}", session.render(None));
    }

    if let Some(path) = &args.save {
        session.scene().to_json(path)?;
    }

    session.close_all();
    Ok(())
}

fn main() -> Result<()> {
    // Parse command-line arguments first (needed for log setup)
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = config::PathConfig::from_env_and_cli(args.config_dir.clone());

    // Ensure directories exist
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    // Determine log level based on verbosity flags
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    // Initialize logger based on --log flag
    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::data_file("pzero.log", &path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging with specified verbosity level (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }

    info!("PZero {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);
    info!(
        "Config path: {}",
        config::config_file("pzero_views.json", &path_config).display()
    );

    run(&args, &path_config)
}
