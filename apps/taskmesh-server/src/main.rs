use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "taskmesh-server")]
struct Args {
    #[arg(long, default_value = "config/taskmesh.yaml")]
    config: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    taskmesh_server::run_server(args.config, args.listen).await
}
