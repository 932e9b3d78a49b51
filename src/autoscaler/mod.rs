//! Autoscaler: a single-threaded polling loop that sizes the slave fleet
//! against queue backlog, growing fast and shrinking slowly so short bursts
//! of work don't thrash a fleet that bills by the minimum increment.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::domain::models::config::AutoscalerConfig;
use crate::domain::ports::QueueStats;

#[derive(Debug, Deserialize)]
struct Stats {
    ready: u64,
    running: u64,
}

impl From<QueueStats> for Stats {
    fn from(s: QueueStats) -> Self {
        Self {
            ready: s.ready,
            running: s.running,
        }
    }
}

pub struct Autoscaler {
    config: AutoscalerConfig,
    http: reqwest::Client,
    current: u32,
    last_grow_time: Instant,
}

impl Autoscaler {
    /// `initial_size` is read back from the fleet-resize command's
    /// `describe` output at startup, never persisted by this process.
    pub fn new(config: AutoscalerConfig, initial_size: u32) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            current: initial_size,
            // Seed far enough in the past that an immediately-idle fleet can
            // still shrink once SHRINK_LAG elapses from process start.
            last_grow_time: Instant::now() - Duration::from_secs(3600),
        }
    }

    /// Read the current target size from the external fleet-resize tool's
    /// `describe` command.
    pub async fn read_current_size(config: &AutoscalerConfig) -> anyhow::Result<u32> {
        let output = run_command(&config.describe_command).await?;
        parse_target_size(&output)
    }

    pub async fn run(&mut self) {
        let mut tick = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        loop {
            tick.tick().await;
            if let Err(err) = self.step().await {
                tracing::warn!(error = %err, "autoscaler poll failed");
            }
        }
    }

    async fn step(&mut self) -> anyhow::Result<()> {
        let stats = self.fetch_stats().await?;
        tracing::info!(ready = stats.ready, running = stats.running, current = self.current, "autoscaler poll");

        let mut target = self.current;
        if stats.ready > 0 {
            target = self.config.max_size.min(self.current + self.config.grow_step);
            self.last_grow_time = Instant::now();
        } else if stats.ready + stats.running == 0
            && self.last_grow_time.elapsed() > Duration::from_secs(self.config.shrink_lag_secs)
        {
            target = 1;
        }

        if target != self.current {
            self.resize(target).await?;
            self.current = target;
        }
        Ok(())
    }

    async fn fetch_stats(&self) -> anyhow::Result<Stats> {
        let url = format!("{}/queue_stats", self.config.master_url.trim_end_matches('/'));
        let stats: QueueStats = self.http.get(url).send().await?.error_for_status()?.json().await?;
        Ok(stats.into())
    }

    async fn resize(&self, size: u32) -> anyhow::Result<()> {
        tracing::info!(size, "resizing slave fleet");
        let command: Vec<String> = self
            .config
            .resize_command
            .iter()
            .map(|arg| arg.replace("{size}", &size.to_string()))
            .collect();
        run_command(&command).await.map(|_| ())
    }
}

async fn run_command(argv: &[String]) -> anyhow::Result<String> {
    let (program, args) = argv.split_first().ok_or_else(|| anyhow::anyhow!("empty command"))?;
    let output = tokio::process::Command::new(program).args(args).output().await?;
    if !output.status.success() {
        anyhow::bail!("command {:?} exited with {}", argv, output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_target_size(describe_output: &str) -> anyhow::Result<u32> {
    let re = regex::Regex::new(r"targetSize:\s*(\d+)").unwrap();
    let captures = re
        .captures(describe_output)
        .ok_or_else(|| anyhow::anyhow!("could not find targetSize in describe output"))?;
    Ok(captures[1].parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_size_from_describe_output() {
        let output = "name: dist-test-slave-group\ntargetSize: 7\nstatus: RUNNING\n";
        assert_eq!(parse_target_size(output).unwrap(), 7);
    }

    #[test]
    fn missing_target_size_is_an_error() {
        assert!(parse_target_size("nothing here").is_err());
    }

    #[tokio::test]
    async fn grows_when_backlog_present() {
        let config = AutoscalerConfig {
            master_url: "http://127.0.0.1".to_string(),
            poll_interval_secs: 10,
            shrink_lag_secs: 600,
            max_size: 100,
            grow_step: 10,
            resize_command: vec![],
            describe_command: vec![],
        };
        let mut scaler = Autoscaler::new(config, 5);
        let target = {
            let stats = Stats { ready: 3, running: 0 };
            if stats.ready > 0 {
                scaler.config.max_size.min(scaler.current + scaler.config.grow_step)
            } else {
                scaler.current
            }
        };
        assert_eq!(target, 15);
    }
}
