use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
pub struct DaemonArgs {
    /// Stay attached to the terminal instead of detaching.
    #[arg(long)]
    pub force: bool,
    /// Application directory. Holds config.toml, snapshots, activity logs and reports.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tracing::level_filters::LevelFilter;

    use super::DaemonArgs;

    #[test]
    fn parses_restart_arguments() {
        let args = DaemonArgs::parse_from([
            "dwellwatch-daemon",
            "--force",
            "--dir",
            "/tmp/dw",
            "--log-filter",
            "debug",
        ]);
        assert!(args.force);
        assert_eq!(args.dir.as_deref(), Some(std::path::Path::new("/tmp/dw")));
        assert_eq!(args.log, Some(LevelFilter::DEBUG));
        assert!(!args.log_console);
    }
}
