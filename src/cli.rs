use clap::Parser;
use std::path::PathBuf;

// Build version with engine info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Renderer: headless\n",
    "Target:   ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Entity/view synchronization engine (headless driver)
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Scene JSON to load (empty scene if omitted)
    #[arg(value_name = "SCENE")]
    pub scene: Option<PathBuf>,

    /// View configs (JSON array). Default: pzero_views.json in the config dir, else a 3D view
    #[arg(short = 'w', long = "views", value_name = "VIEWS")]
    pub views: Option<PathBuf>,

    /// Script of scene edits and user gestures to replay
    #[arg(short = 's', long = "script", value_name = "SCRIPT")]
    pub script: Option<PathBuf>,

    /// Save the scene after the script ran
    #[arg(long = "save", value_name = "FILE")]
    pub save: Option<PathBuf>,

    /// Print every view's projections at the end
    #[arg(short = 'p', long = "print")]
    pub print: bool,

    /// Enable debug logging to file (default: pzero.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}
