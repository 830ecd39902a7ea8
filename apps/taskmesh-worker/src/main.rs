use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "taskmesh-worker")]
struct Args {
    #[arg(long, default_value = "config/taskmesh.yaml")]
    config: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8001")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    taskmesh_worker::run_worker(args.config, args.listen).await
}
