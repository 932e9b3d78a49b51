//! `dctl` command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dctl")]
#[command(about = "Submit, watch, and fetch results from a dist-test job", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Base URL of the master, overriding configuration.
    #[arg(long, global = true)]
    pub master_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Submit a JSON file listing tasks.
    Submit {
        job_json_path: PathBuf,
        /// Job name prefix, mangled with user/timestamp/pid for uniqueness.
        #[arg(short, long, default_value = "")]
        name: String,
        /// Exit immediately after submitting, without waiting for completion.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
        #[arg(short, long, default_value = "dist-test-results")]
        output_dir: PathBuf,
        #[arg(short, long, default_value_t = false)]
        logs: bool,
        #[arg(short, long, default_value_t = false)]
        artifacts: bool,
    },
    /// Watch an already-submitted job id (or the most recently submitted one).
    Watch { job_id: Option<String> },
    /// Cancel a previously submitted job.
    Cancel { job_id: Option<String> },
    /// Fetch test logs and artifacts from a previous job.
    Fetch {
        job_id: Option<String>,
        #[arg(short, long, default_value = "dist-test-results")]
        output_dir: PathBuf,
        #[arg(short, long, default_value_t = false)]
        logs: bool,
        #[arg(short, long, default_value_t = false)]
        artifacts: bool,
        /// Only fetch logs/artifacts from failed tasks.
        #[arg(short, long, default_value_t = false)]
        failed_only: bool,
    },
}
