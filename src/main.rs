use clap::Parser;

fn main() {
    capgate::logging::init_tracing();
    let cli = capgate::cli::Cli::parse();
    if let Err(err) = capgate::app::run(cli) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
