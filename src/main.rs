mod simulate;

use anyhow::Result;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("pvlist=info".parse()?),
        )
        .init();

    match simulate::maybe_parse_args()? {
        Some(args) => simulate::run_simulation(args),
        None => {
            eprintln!("{}", simulate::USAGE);
            std::process::exit(2);
        }
    }
}
