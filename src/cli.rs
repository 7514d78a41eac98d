//! Command-line entrypoint definitions (`spec.md` "Supplemented features":
//! an `ingest` and a `reprocess` subcommand, standing in for the new HTTP
//! routes a typical Flex integration would otherwise grow).

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "flex-ledger")]
#[command(about = "IBKR Flex statement ingestion and ledger maintenance")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trigger a scheduled ingestion run: request, poll, download, persist,
    /// canonical_mapping, snapshot.
    Ingest,

    /// Replay canonical_mapping and snapshot over already-persisted raw
    /// records without contacting the Flex Web Service.
    Reprocess {
        /// Restrict the replay to a single `(fromDate_toDate)` period key;
        /// omit for a full replay across all persisted periods.
        #[arg(long)]
        period_key: Option<String>,

        /// Restrict the replay to a single flex query id; defaults to the
        /// configured `FLEX_QUERY_ID`.
        #[arg(long)]
        flex_query_id: Option<String>,
    },
}
