//! Logging module for terminal based output control.
//!
//! Contains a custom logging implementation to disable/redirect output
//! based on command line switches baked into each subcommand.
use clap::ArgMatches;
use logger::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Target prefix of every record emitted by this crate.
const TARGET: &str = "s3_log_fetch";

/// Basic logger instance to allow quiet-aware logging.
struct BasicLogger {
    quiet: bool,
}

impl Log for BasicLogger {
    /// Returns enabled only for records from this crate.
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with(TARGET)
    }

    /// Logs out a `Record` when logging is enabled.
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match record.metadata().level() {
            Level::Error => eprintln!("{}", record.args()),
            Level::Warn if !self.quiet => eprintln!("{}", record.args()),
            _ if !self.quiet => println!("{}", record.args()),
            _ => (),
        }
    }

    fn flush(&self) {}
}

/// Determines the maximum level for the provided arguments.
fn level(args: &ArgMatches) -> LevelFilter {
    if args.is_present("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Initializes the logger based on the provided subcommand arguments.
///
/// If the `-q` flag was provided, all non-error output is culled; the
/// `-v` flag enables debug output for the fetch progress.
pub fn init(args: &ArgMatches) -> Result<(), SetLoggerError> {
    let logger = Box::new(BasicLogger {
        quiet: args.is_present("quiet"),
    });
    let max = level(args);
    log::set_boxed_logger(logger).map(|_| log::set_max_level(max))
}

#[cfg(test)]
mod tests {
    use logger::{Level, LevelFilter, Log, Metadata};

    #[test]
    fn enabling_only_crate_targets() {
        let logger = super::BasicLogger { quiet: false };

        let own = Metadata::builder()
            .level(Level::Info)
            .target("s3_log_fetch::fetch")
            .build();
        let foreign = Metadata::builder()
            .level(Level::Info)
            .target("rusoto_core::request")
            .build();

        assert!(logger.enabled(&own));
        assert!(!logger.enabled(&foreign));
    }

    #[test]
    fn selecting_level_from_flags() {
        let app = || {
            clap::App::new("test")
                .arg(clap::Arg::with_name("verbose").short("v"))
                .arg(clap::Arg::with_name("quiet").short("q"))
        };

        let plain = app().get_matches_from(vec!["test"]);
        let verbose = app().get_matches_from(vec!["test", "-v"]);

        assert_eq!(super::level(&plain), LevelFilter::Info);
        assert_eq!(super::level(&verbose), LevelFilter::Debug);
    }
}
