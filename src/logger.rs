use tracing::Level;
use tracing_subscriber::fmt::SubscriberBuilder;

/// Install the global fmt subscriber. `verbosity` is the `-v` count.
/// A second call is a no-op.
pub fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        3.. => Level::TRACE,
    };
    let _ = SubscriberBuilder::default()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}
