use clap::Parser;
use log::error;

use lostpaw::Opts;
use lostpaw::cli::SubCommandExtend;
use lostpaw::config::SubCommand;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    let result = match &opts.subcmd {
        SubCommand::Describe(config) => config.run(&opts),
        SubCommand::Import(config) => config.run(&opts),
        SubCommand::Merge(config) => config.run(&opts),
        SubCommand::Clean(config) => config.run(&opts),
        SubCommand::Extract(config) => config.run(&opts),
        SubCommand::Sample(config) => config.run(&opts),
    };

    if let Err(e) = result {
        error!("{:?}", e);
        std::process::exit(1);
    }
}
