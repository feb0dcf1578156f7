use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::{
    EnvFilter, Registry,
    filter::ParseError,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Number of rotated log files kept in the log directory.
const MAX_LOG_FILES: usize = 6;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to build the default log filter"))]
    DefaultFilter { source: ParseError },

    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    InitFileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install the global tracing subscriber"))]
    InstallSubscriber { source: TryInitError },
}

/// Initializes `tracing` logging with options from the environment variable given in the `env`
/// parameter, e.g. `KRKN_LOG=debug`.
///
/// If the environment variable is not set, the maximum log level is INFO.
///
/// Log output can be copied to a file by setting `{env}_DIRECTORY` (e.g. `KRKN_LOG_DIRECTORY`) to
/// a directory path. Files are named after `app_name` and rotated regularly.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_env(env) {
        Ok(env_filter) => env_filter,
        Err(_) => {
            EnvFilter::try_new(tracing::Level::INFO.to_string()).context(DefaultFilterSnafu)?
        }
    };

    let file_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_layer = file_directory
        .as_deref()
        .map(|directory| {
            RollingFileAppender::builder()
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(MAX_LOG_FILES)
                .build(directory)
                .context(InitFileAppenderSnafu { directory })
        })
        .transpose()?
        .map(|appender| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(appender)
        });

    Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    // Only observable once the subscriber is installed
    match file_directory {
        Some(directory) => tracing::info!(directory = %directory.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }

    Ok(())
}
