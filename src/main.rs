use clap::Parser;
use rebuild_coord::config::{CliArgs, RebuildConfig};
use rebuild_coord::{logging, state::GlobalRebuild};

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();
    logging::init_tracing(cli_args.log_format, &cli_args.log_level);
    tracing::info!(?cli_args, "starting rebuild coordination service");

    let _config = RebuildConfig::from(&cli_args);
    let _grs = GlobalRebuild::instance();

    // The pool-membership transport (§6) is injected by the enclosing
    // object-store process; this binary only proves the service wires up
    // and leaves the request surface to be called by that process.
    tracing::info!("rebuild coordination service ready");
}
