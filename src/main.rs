use clap::Parser;
use env_logger::Builder;
use log::{error, LevelFilter};
use tgz::{run, Args};

fn main() {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}
