//! `chunkferry receive`: accept parts from senders.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use chunkferry_data_channel::{HostReceiver, generate_token, is_well_formed};
use chunkferry_transfer::StagingArea;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;

#[derive(Debug, Args)]
pub struct ReceiveArgs {
    /// Directory that receives the objects
    #[arg(long)]
    pub dir: PathBuf,

    /// Listen address (default from config, 0.0.0.0:7070)
    #[arg(long)]
    pub bind: Option<String>,

    /// Shared token; generated and printed when omitted
    #[arg(long)]
    pub token: Option<String>,

    /// Refuse parts once this many bytes are stored
    #[arg(long)]
    pub quota: Option<u64>,
}

pub async fn run(args: ReceiveArgs, config: &Config) -> anyhow::Result<()> {
    let token = match args.token.or_else(|| config.token.clone()) {
        Some(token) if is_well_formed(&token) => token,
        Some(_) => anyhow::bail!("token must be 32 hex characters"),
        None => {
            let token = generate_token();
            println!("token: {token}");
            token
        }
    };
    let bind = args.bind.as_deref().unwrap_or(&config.bind);
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid listen address {bind}"))?;

    std::fs::create_dir_all(&args.dir)
        .with_context(|| format!("create {}", args.dir.display()))?;
    let staging = StagingArea::new(&args.dir).with_quota(args.quota.or(config.quota_bytes));

    let cancel = CancellationToken::new();
    let receiver = HostReceiver::new(staging, token, cancel.clone());
    let listener = HostReceiver::bind(addr).await?;
    println!("listening on {}", listener.local_addr()?);
    info!(dir = %args.dir.display(), "receiving; press Ctrl-C to stop");

    super::cancel_on_ctrl_c(cancel.clone());
    receiver.serve(listener).await?;
    Ok(())
}
