use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "native-guard-cmd")]
#[command(about = "Exercise the native-guard leak reclaimer")]
#[command(version)]
struct Cli {
    /// Print guard diagnostics as plain lines on stdout instead of logging them
    #[arg(long, global = true)]
    stdout: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk through explicit release, double release, a leaked owner and shutdown
    Demo,

    /// Register many handles from several threads, leak some, release the rest
    Simulate {
        /// Number of handles registered per thread
        #[arg(long, default_value_t = 1000)]
        handles: u64,

        /// Fraction of handles dropped without release (0.0 - 1.0)
        #[arg(long, default_value_t = 0.25)]
        leak_ratio: f64,

        /// Number of registering threads
        #[arg(short, long, default_value_t = 4)]
        threads: u64,

        /// Seed for the random release pattern
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo => commands::demo::run(cli.stdout),
        Commands::Simulate {
            handles,
            leak_ratio,
            threads,
            seed,
        } => commands::simulate::run(
            commands::simulate::Params {
                handles,
                leak_ratio,
                threads,
                seed,
            },
            cli.stdout,
        ),
    }
}
