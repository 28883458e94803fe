pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use ota_core::error::Result;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Generate(args) => handlers::handle_generate(args),
        Commands::Extract(args) => handlers::handle_extract(args),
        Commands::Sign(args) => handlers::handle_sign(args),
        Commands::Verify(args) => handlers::handle_verify(args),
        Commands::List {
            records,
            total_regular_size_file,
        } => handlers::handle_list(records, total_regular_size_file),
    }
}
