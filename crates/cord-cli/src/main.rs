//! CORD CLI - thin operational front-end for the governance engine

use clap::Parser;
use cord_core::{CordConfig, CordEngine, Proposal};

#[derive(Parser)]
#[command(name = "cord")]
#[command(about = "CORD - in-process governance for agent proposals")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Evaluate a single proposal text
    Evaluate {
        /// The proposal text
        text: String,
        /// Session id for behavioral memory
        #[arg(short, long, default_value = "cli")]
        session: String,
        /// Skip the patrol pre-scan
        #[arg(long)]
        no_patrol: bool,
    },
    /// Screen untrusted content for indirect injection
    ScanInput {
        /// The untrusted content
        content: String,
        /// Where the content came from
        #[arg(short, long, default_value = "stdin")]
        source: String,
    },
    /// Verify the audit chain end to end
    VerifyChain,
    /// Show engine status
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt::init();

    let mut engine = CordEngine::new(CordConfig::default())?;

    match cli.command {
        Some(Commands::Evaluate { text, session, no_patrol }) => {
            let mut proposal = Proposal::new(text).with_session_id(session);
            if no_patrol {
                proposal = proposal.without_patrol();
            }
            let verdict = engine.evaluate(proposal)?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Some(Commands::ScanInput { content, source }) => {
            let result = engine
                .scan_input(&content, &source)
                .expect("patrol enabled by default");
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Some(Commands::VerifyChain) => match engine.verify_chain() {
            Ok(count) => println!("chain OK: {count} entries verified"),
            Err(e) => {
                eprintln!("chain BROKEN: {e}");
                std::process::exit(1);
            }
        },
        Some(Commands::Status) => {
            println!("audit log: {}", engine.audit_path().display());
            if let Some(stats) = engine.patrol_stats() {
                println!("patrol: {}", serde_json::to_string(&stats)?);
            }
            println!("cache: {}", serde_json::to_string(&engine.cache_stats())?);
        }
        None => {
            println!("CORD v0.1.0 - Use --help for commands");
        }
    }

    Ok(())
}
