use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a newline-delimited JSON change-event log through the
    /// in-memory reference connectors.
    Run {
        #[arg(long, help = "Pipeline config file (TOML)")]
        config: String,

        #[arg(long, help = "Newline-delimited JSON file of ChangeEvent values")]
        events: String,

        #[arg(long, help = "Directory backing the sled state store")]
        state_dir: String,
    },
    /// Build and print the MERGE statement a real run would submit for a
    /// batch, without submitting it anywhere.
    DryRun {
        #[arg(long, help = "Pipeline config file (TOML)")]
        config: String,

        #[arg(long, help = "Directory backing the sled state store")]
        state_dir: String,

        #[arg(long, help = "Project")]
        project: String,

        #[arg(long, help = "Dataset")]
        dataset: String,

        #[arg(long, help = "Table")]
        table: String,

        #[arg(long, help = "Batch id to build the MERGE for")]
        batch_id: i64,
    },
    /// Print the sequence counters last recorded for a table.
    Progress {
        #[arg(long, help = "Directory backing the sled state store")]
        state_dir: String,

        #[arg(long, help = "Project")]
        project: String,

        #[arg(long, help = "Dataset")]
        dataset: String,

        #[arg(long, help = "Table")]
        table: String,

        #[arg(long, help = "Print as JSON instead of a table")]
        json: bool,
    },
}
