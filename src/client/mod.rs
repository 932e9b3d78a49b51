//! `dctl`: the command-line client for submitting, watching, canceling, and
//! fetching results from dist-test jobs.

pub mod cli;
pub mod commands;

use cli::Command;
pub use cli::Cli;
use commands::Client;

/// Run the parsed CLI against `master_url`, returning the process exit code.
pub async fn dispatch(cli: Cli, master_url: String, last_job_path: std::path::PathBuf) -> anyhow::Result<i32> {
    let client = Client::new(master_url, last_job_path);

    match cli.command {
        Command::Submit {
            job_json_path,
            name,
            no_wait,
            output_dir,
            logs,
            artifacts,
        } => {
            let job_id = client.submit(&job_json_path, &name).await?;
            if no_wait {
                println!("job_id={job_id}");
                return Ok(0);
            }
            let exit_code = client.watch(&job_id).await?;
            if artifacts || logs {
                client.fetch(&job_id, &output_dir, logs, artifacts, false).await?;
            }
            println!("job_id={job_id}");
            Ok(exit_code)
        }
        Command::Watch { job_id } => {
            let job_id = client.resolve_job_id(job_id)?;
            client.watch(&job_id).await
        }
        Command::Cancel { job_id } => {
            let job_id = client.resolve_job_id(job_id)?;
            client.cancel(&job_id).await?;
            Ok(0)
        }
        Command::Fetch {
            job_id,
            output_dir,
            logs,
            artifacts,
            failed_only,
        } => {
            if !logs && !artifacts {
                anyhow::bail!("need to specify either --logs or --artifacts");
            }
            let job_id = client.resolve_job_id(job_id)?;
            client.fetch(&job_id, &output_dir, logs, artifacts, failed_only).await?;
            Ok(0)
        }
    }
}
