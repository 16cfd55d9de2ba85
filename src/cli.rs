use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ytmux")]
#[command(author, version, about = "Download a video with yt-dlp, falling back to innertube streams merged by ffmpeg", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory finished videos are copied into (defaults to OUTPUT_DIR)
    #[arg(long, global = true)]
    pub output_dir: Option<String>,

    /// Log file path (defaults to LOG_FILE_PATH)
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    /// Don't log periodic progress during fallback merges
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Download a video by link
    Yt {
        /// Video link
        url: Option<String>,
    },

    /// Same as `yt`
    Ytv {
        /// Video link
        url: Option<String>,
    },

    /// Search and download the best match
    Vs {
        /// Search words
        query: Vec<String>,
    },
}

impl Commands {
    /// The request target this command describes.
    pub fn target(&self) -> crate::download::pipeline::Target {
        use crate::download::pipeline::Target;
        match self {
            Commands::Yt { url } | Commands::Ytv { url } => Target::Reference(url.clone().unwrap_or_default()),
            Commands::Vs { query } => Target::Search(query.join(" ")),
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
