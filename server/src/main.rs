mod trans_server;

use log::{error, info};
use trans_server::{ServerTarget, TransServer};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(target) = ServerTarget::from_env() else {
        error!("Invalid XCHANNEL_TARGET, expected tcp:ADDR, unix:PATH or vsock:CID:PORT");
        std::process::exit(2);
    };

    info!("Starting echo server on {:?}...", target);
    if let Err(e) = TransServer::new(target).run().await {
        error!("Server failed: {}", e);
        std::process::exit(1);
    }
}
