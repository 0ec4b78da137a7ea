use clap::Parser;
use std::io::IsTerminal;
use std::sync::Arc;

use crate::console::PromptConflictHandler;
use crate::extract::OverwritePolicy;

#[derive(Parser, Debug)]
#[command(name = "punzip")]
#[command(version)]
#[command(about = "Parallel unzip with HTTP URL support", long_about = None)]
#[command(after_help = "Examples:\n  \
  punzip data1.zip -x joe        extract all files except joe from data1.zip\n  \
  punzip -T 8 big.zip -d out     extract with 8 workers into out/\n  \
  punzip -p foo.zip | more       send contents of foo.zip via pipe into more\n  \
  punzip -l https://example.com/archive.zip   list files from remote ZIP")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely/show version info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Number of extraction workers (and runtime threads)
    #[arg(short = 'T', long, value_name = "N", default_value_t = 1, env = "PUNZIP_THREADS")]
    pub threads: usize,

    /// Allow entry names containing `..` or absolute paths
    #[arg(long)]
    pub allow_parent_paths: bool,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Default `tracing` filter when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.is_very_quiet() {
            "error"
        } else if self.is_quiet() {
            "warn"
        } else {
            "info"
        }
    }

    /// Map `-n`/`-o` onto an overwrite policy.
    ///
    /// Without either flag the user is asked per file when stdin is a
    /// terminal; otherwise existing files are kept.
    pub fn overwrite_policy(&self) -> OverwritePolicy {
        if self.never_overwrite {
            OverwritePolicy::DontOverwrite
        } else if self.overwrite {
            if self.is_quiet() {
                OverwritePolicy::OverwriteSilently
            } else {
                OverwritePolicy::Overwrite
            }
        } else if std::io::stdin().is_terminal() {
            OverwritePolicy::InvokeCallback(Arc::new(PromptConflictHandler::stdin()))
        } else {
            OverwritePolicy::DontOverwrite
        }
    }
}
