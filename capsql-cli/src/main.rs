use clap::Parser;

use capsql_cli::cli::Cli;
use capsql_cli::orchestrator::Loader;
use capsql_types::log::error;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), capsql_cli::errors::OrchestrationError> {
    let config = cli.load_config()?;
    Loader::new(config).run()
}
