mod application;

mod presentation {
    pub mod cli;
}

use ota_core::error::Result;

fn main() -> Result<()> {
    // logs go to stderr so `list` output stays clean on stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    application::run()
}
