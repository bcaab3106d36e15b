use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Find film locations by describing them", long_about = None)]
pub struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search locations by free-text description
    Search {
        /// What the location should look or feel like
        query: String,

        /// Maximum number of results
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Drop results with a combined score below this value
        #[clap(long)]
        min_score: Option<f32>,
    },

    /// Start the HTTP API
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:8080
        #[clap(short, long)]
        listen: Option<String>,

        /// Load the location data before accepting requests
        #[clap(long, default_value = "false")]
        eager: bool,
    },

    /// Load the location data and print statistics
    Inspect {},

    /// Write the default config.yaml if it does not exist and print its path
    InitConfig {},
}
