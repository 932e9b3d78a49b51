//! Entry point for `dctl`: submit, watch, cancel, and fetch dist-test jobs
//! from the command line.

use clap::Parser;

use dist_test::client::{dispatch, Cli};
use dist_test::infrastructure::config::ConfigLoader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // dctl runs against whatever master an operator points it at; a missing
    // or malformed config file just falls back to built-in defaults.
    let config = ConfigLoader::load().unwrap_or_default();

    let master_url = cli.master_url.clone().unwrap_or(config.slave.master_url);
    let last_job_path = last_job_path();

    let exit_code = dispatch(cli, master_url, last_job_path).await?;
    std::process::exit(exit_code);
}

fn last_job_path() -> std::path::PathBuf {
    match std::env::var("HOME") {
        Ok(home) => std::path::PathBuf::from(home).join(".dist-test-last-job"),
        Err(_) => std::path::PathBuf::from(".dist-test-last-job"),
    }
}
