//! memserve - serve a build directory from memory with live reload.

use clap::Parser;
use memserve_cli::{cli, error, logger, serve, ui};
use miette::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.verbose, args.quiet, args.no_color);
    ui::init_colors(args.no_color);

    serve::execute(args).await.map_err(error::cli_error_to_miette)
}
