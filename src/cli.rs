use std::path::Path;

use clap::Parser;

use crate::config::BridgeConfig;

#[derive(Parser, Debug)]
#[command(name = "zipbridge")]
#[command(version)]
#[command(about = "Stream files out of ZIP archives and directories with bounded memory", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipbridge bundle.zip -x '*.log'      extract everything except log files\n  \
  zipbridge -p bundle.zip notes.txt    print one entry to stdout\n  \
  zipbridge -d backup photos/          copy a directory tree into backup/")]
pub struct Cli {
    /// ZIP archive, directory, or plain file
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Names or globs to select (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List names only
    #[arg(short = 'l')]
    pub list: bool,

    /// List with sizes and timestamps
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Write contents to stdout, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Destination directory
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Skip names matching these patterns
    #[arg(short = 'x', value_name = "PATTERN", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Keep existing destination files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Replace existing destination files without asking
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Flatten names into the destination directory
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Less output (-qq: errors only)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Window size in bytes for every read
    #[arg(long, value_name = "BYTES", default_value_t = crate::config::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
}

impl Cli {
    /// SOURCE is read as an archive when it is a `.zip` file.
    pub fn is_archive(&self) -> bool {
        let path = Path::new(&self.source);
        path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    pub fn config(&self) -> BridgeConfig {
        BridgeConfig::default().with_chunk_size(self.chunk_size)
    }
}
