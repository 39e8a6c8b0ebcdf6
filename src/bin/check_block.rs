//! One-shot block checker: runs the monitor pipeline over specific blocks and
//! prints the summary and every position-close check. No alerts are sent.
//!
//! Usage:
//!   cargo run --bin check_block -- <block> [<block> ...]
//!
//! Pool address and RPC come from marginal-watch.toml or the environment
//! (CONTRACT_ADDRESS_MARGV1_POOL, ETH_WS_URL).

use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use marginal_watch::alert::{AlertDispatcher, Severity};
use marginal_watch::config::Config;
use marginal_watch::onchain::RpcPoolSource;
use marginal_watch::pipeline::BlockPipeline;
use std::path::Path;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let blocks = parse_blocks(std::env::args().skip(1))?;
    if blocks.is_empty() {
        anyhow::bail!("usage: check_block <block> [<block> ...]");
    }

    let config = if Path::new("marginal-watch.toml").exists() {
        Config::load(Path::new("marginal-watch.toml"))?
    } else {
        Config::from_env()?
    };
    let pool_address = config.pool_address()?;

    let provider = ProviderBuilder::new()
        .connect_ws(WsConnect::new(config.rpc.ws_url.as_str()))
        .await?
        .erased();
    let head = provider.get_block_number().await?;
    println!("[+] Connected to {} (head {})", config.rpc.ws_url, head);
    println!("[+] Pool {}", pool_address);
    println!();

    let source = RpcPoolSource::new(
        pool_address,
        provider,
        Duration::from_secs(config.rpc.request_timeout_secs),
    );
    let pipeline = BlockPipeline::new(source, AlertDispatcher::disabled(Severity::Debug), false);

    let mut breaches = 0;
    for block in blocks {
        if block > head {
            println!("  block {} is past the current head, skipping", block);
            continue;
        }
        match pipeline.process_block(block).await {
            Ok(report) => {
                println!("{}", report.summary);
                for check in &report.checks {
                    println!("  {}", check.message());
                }
                breaches += report.breaches();
            }
            Err(e) => println!("  block {} failed: {}", block, e),
        }
    }

    println!();
    println!("Breaches: {}", breaches);
    Ok(())
}

/// Block numbers from the command line, in the order given.
fn parse_blocks(args: impl Iterator<Item = String>) -> anyhow::Result<Vec<u64>> {
    args.map(|arg| {
        arg.replace('_', "")
            .parse::<u64>()
            .map_err(|e| anyhow::anyhow!("invalid block number {:?}: {}", arg, e))
    })
    .collect()
}
