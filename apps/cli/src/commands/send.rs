//! `chunkferry send`: upload a file in parts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chunkferry_coordinator::{FileTransfer, TransferCoordinator, TransferEvent};
use chunkferry_endpoint::{EndpointOptions, EndpointSpec, HostEndpoint, RemoteEndpoint};
use chunkferry_transfer::{LedgerSnapshot, ProgressTracker};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Interval between progress log lines.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Args)]
pub struct SendArgs {
    /// File to send
    pub source: PathBuf,

    /// Destination key on the endpoint
    pub key: String,

    /// local:<dir>, host:<addr:port> or s3:<base-url>/<bucket>
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Part size in bytes
    #[arg(long)]
    pub part_size: Option<u64>,

    /// Retries after the first attempt of each part
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// First backoff delay in seconds
    #[arg(long)]
    pub backoff_base: Option<f64>,

    /// Longest backoff delay in seconds
    #[arg(long)]
    pub max_backoff: Option<f64>,

    /// Parts uploaded at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Give up after this many seconds (the run can be resumed)
    #[arg(long)]
    pub deadline: Option<f64>,

    /// Token for host: endpoints
    #[arg(long)]
    pub token: Option<String>,

    /// Authorization header value for s3: endpoints
    #[arg(long)]
    pub authorization: Option<String>,

    /// Expected SHA-256 of the source
    #[arg(long)]
    pub sha256: Option<String>,

    /// Do not keep or read a resume journal
    #[arg(long)]
    pub no_journal: bool,
}

impl SendArgs {
    /// Overrides configuration values with the flags that were given.
    fn apply_to(&self, config: &mut Config) {
        if let Some(v) = &self.endpoint {
            config.endpoint = v.clone();
        }
        if let Some(v) = self.part_size {
            config.part_size = v;
        }
        if let Some(v) = self.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = self.backoff_base {
            config.backoff_base_secs = v;
        }
        if let Some(v) = self.max_backoff {
            config.max_backoff_secs = v;
        }
        if let Some(v) = self.concurrency {
            config.concurrency = v;
        }
        if self.deadline.is_some() {
            config.deadline_secs = self.deadline;
        }
        if self.token.is_some() {
            config.token = self.token.clone();
        }
        if self.authorization.is_some() {
            config.authorization = self.authorization.clone();
        }
        if self.no_journal {
            config.journal = false;
        }
    }
}

pub async fn run(args: SendArgs, mut config: Config) -> anyhow::Result<u8> {
    args.apply_to(&mut config);

    let spec: EndpointSpec = config.endpoint.parse()?;
    let cancel = CancellationToken::new();
    let options = EndpointOptions {
        token: config.token.clone(),
        authorization: config.authorization.clone(),
        quota_bytes: config.quota_bytes,
    };
    // Keep a typed handle on host endpoints so the connection can be closed.
    let (endpoint, host): (Arc<dyn RemoteEndpoint>, Option<Arc<HostEndpoint>>) = match &spec {
        EndpointSpec::Host(addr) => {
            let token = options
                .token
                .clone()
                .context("host endpoints need --token (or `token` in the config)")?;
            let host = Arc::new(HostEndpoint::new(addr.clone(), token, cancel.clone())?);
            (Arc::clone(&host) as Arc<dyn RemoteEndpoint>, Some(host))
        }
        _ => (chunkferry_endpoint::open(&spec, &options, cancel.clone())?, None),
    };
    info!(endpoint = endpoint.name(), source = %args.source.display(), key = %args.key, "sending");

    let tracker = Arc::new(ProgressTracker::new(Some(PROGRESS_INTERVAL)));
    tracker.on_progress(Box::new(|snapshot: LedgerSnapshot| {
        info!(
            key = %snapshot.key,
            committed = snapshot.committed_parts,
            parts = snapshot.total_parts,
            percent = %format_args!("{:.1}", snapshot.percentage()),
            in_flight = snapshot.in_flight.len(),
            "progress"
        );
    }));
    tracker.start();

    let mut coordinator = TransferCoordinator::new(endpoint, config.retry_policy()?)
        .with_concurrency(config.concurrency)
        .with_cancel(cancel.clone())
        .with_progress(Arc::clone(&tracker));
    if let Some(deadline) = config.deadline()? {
        coordinator = coordinator.with_deadline(deadline);
    }
    if let Some(mut events) = coordinator.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });
    }
    super::cancel_on_ctrl_c(cancel.clone());

    let request = FileTransfer {
        source: args.source.clone(),
        key: args.key.clone(),
        part_size: config.part_size,
        journal: config.journal,
        expected_sha256: args.sha256.clone(),
    };
    let outcome = coordinator.transfer_file(&request).await;

    tracker.stop();
    if let Some(host) = host {
        host.close().await;
    }
    cancel.cancel();

    let outcome = outcome?;
    let status = outcome.exit_status();
    println!("{}", outcome.summary());
    debug!(%status, resumed = outcome.resumed, "send finished");
    Ok(status.code() as u8)
}

fn log_event(event: &TransferEvent) {
    match event {
        TransferEvent::Started {
            total_parts,
            committed_parts,
            ..
        } if *committed_parts > 0 => {
            info!(committed = committed_parts, parts = total_parts, "resuming transfer");
        }
        TransferEvent::Retrying {
            index,
            attempt,
            delay,
            kind,
            error,
        } => {
            warn!(part = ?index, attempt, ?delay, %kind, %error, "retrying");
        }
        TransferEvent::Progress {
            bytes_per_second,
            eta,
            ..
        } => {
            debug!(bytes_per_second = *bytes_per_second as u64, ?eta, "throughput");
        }
        other => debug!(event = ?other, "transfer event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: SendArgs,
    }

    #[test]
    fn flags_override_config() {
        let wrapper = Wrapper::parse_from([
            "send",
            "in.bin",
            "out/in.bin",
            "--endpoint",
            "host:127.0.0.1:7070",
            "--max-retries",
            "2",
            "--deadline",
            "30",
            "--no-journal",
        ]);
        let mut config = Config::default();
        wrapper.args.apply_to(&mut config);

        assert_eq!(config.endpoint, "host:127.0.0.1:7070");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.deadline_secs, Some(30.0));
        assert!(!config.journal);
        assert_eq!(config.part_size, Config::default().part_size);
    }

    #[tokio::test]
    async fn send_to_local_directory() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let source = src.path().join("payload.bin");
        std::fs::write(&source, vec![3u8; 3000]).unwrap();

        let args = SendArgs {
            source,
            key: "copy.bin".into(),
            endpoint: Some(format!("local:{}", dst.path().display())),
            part_size: Some(1024),
            max_retries: None,
            backoff_base: None,
            max_backoff: None,
            concurrency: None,
            deadline: None,
            token: None,
            authorization: None,
            sha256: None,
            no_journal: false,
        };
        let code = run(args, Config::default()).await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(std::fs::read(dst.path().join("copy.bin")).unwrap().len(), 3000);
    }
}
