use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(args: &chapterdex::cli::Args) {
    let default = if args.verbose {
        "chapterdex=debug"
    } else if args.quiet {
        "chapterdex=error"
    } else {
        "chapterdex=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = chapterdex::cli::Args::parse();
    init_tracing(&args);
    if let Err(e) = chapterdex::cli::run(&args) {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
