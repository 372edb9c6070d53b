//! ClearSure CLI: turn policy documents into a layered knowledge graph.
//!
//! Documents are partitioned into text, split into sentences and extracted
//! with a language model into statements, entities, rules and topics, then
//! exported as Cypher and optionally pushed to Neo4j.

mod commands;
mod progress;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
