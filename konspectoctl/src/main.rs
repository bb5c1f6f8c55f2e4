use clap::Parser;

fn main() {
    let cli = konspectoctl::Cli::parse();
    konspectoctl::init_tracing(cli.log_level.as_deref());
    if let Err(err) = konspectoctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
