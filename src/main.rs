// src/main.rs

use clap::Parser;

use uartlink::cli::Cli;
use uartlink::config::SessionConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    println!("--- uartlink v{} remote serial bridge ---", env!("CARGO_PKG_VERSION"));

    let cfg = match SessionConfig::from_cli(cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("parameter error: {}", e);
            std::process::exit(2);
        }
    };

    if let Some(path) = cfg.log_file.clone() {
        if let Err(e) = uartlink::init_file_logging(&path) {
            eprintln!("{}", e);
        }
    }

    println!("------------------------------------------");

    if let Err(e) = uartlink::run(cfg).await {
        eprintln!("[fatal] {}", e);
        std::process::exit(1);
    }
}
