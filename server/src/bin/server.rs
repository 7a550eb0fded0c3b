//! SPDY server binary.

use std::path::PathBuf;

use clap::Parser;
use spdy_server::config::Config;

#[derive(Parser)]
#[command(name = "spdy-server")]
#[command(about = "SPDY demo server")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    spdy_server::logging::init(&config.logging);

    if let Err(e) = run(config) {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(spdy_server::run::run(config))
}

fn print_default_config() {
    println!(
        r#"listen = "127.0.0.1:7443"

[protocol]
version = "spdy/3.1"
max_concurrent_streams = 1000
initial_window_size = 65536
max_benign_errors = 10
# read_timeout_ms = 30000
# write_timeout_ms = 30000

[logging]
level = "info"
format = "pretty"
timestamps = true
target = true
thread_names = false"#
    );
}
