//! mongo-cursor - run batched, non-blocking cursor queries from the shell
//!
//! # Usage
//!
//! ```bash
//! mongo-cursor find app.users --filter '{"age": {"$gte": 18}}' --sort age:-1 --limit 20
//! mongo-cursor count app.users --filter '{"active": true}'
//! mongo-cursor distinct app.users city
//! ```

use tracing::Level;

use mongo_cursor::cli::CliInterface;
use mongo_cursor::error::Result;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Parse arguments, load configuration, initialize logging and run the command
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;
    initialize_logging(cli.config().logging.level.to_tracing_level(), cli.config().logging.timestamps);
    cli.run().await
}

/// Initialize logging on stderr so stdout stays machine-readable
fn initialize_logging(level: Level, timestamps: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
