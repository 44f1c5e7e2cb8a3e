use clap::Parser;
use std::path::PathBuf;

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Cel animation editor core: runs a scripted editing session and reports
/// cache and history behavior
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Number of frames to animate
    #[arg(short = 'n', long = "frames", value_name = "N", default_value_t = 12)]
    pub frames: usize,

    /// Number of layers
    #[arg(long = "layers", value_name = "N", default_value_t = 2)]
    pub layers: usize,

    /// Frame size (overrides settings)
    #[arg(long = "size", value_names = ["WIDTH", "HEIGHT"], num_args = 2)]
    pub size: Option<Vec<u32>>,

    /// Write the composite of the last frame as PNG
    #[arg(short = 'o', long = "output", value_name = "PNG")]
    pub output: Option<PathBuf>,

    /// Recompute cache hits and compare against the cached value
    #[arg(long = "debug-cache")]
    pub debug_cache: bool,

    /// Enable debug logging to file (default: celdraw.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["celdraw"]);
        assert_eq!(args.frames, 12);
        assert_eq!(args.layers, 2);
        assert!(args.log_file.is_none());
        assert_eq!(args.verbosity, 0);
    }

    #[test]
    fn test_flags() {
        let args = Args::parse_from(["celdraw", "-vv", "--size", "64", "48", "--log", "-n", "3"]);
        assert_eq!(args.verbosity, 2);
        assert_eq!(args.size, Some(vec![64, 48]));
        assert_eq!(args.frames, 3);
        assert_eq!(args.log_file, Some(None));
    }
}
