mod trans_client;

use log::{error, info};
use trans_client::{ClientTarget, TransClient};

const DEFAULT_PAYLOAD_KB: usize = 1024; // 1 MB

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(target) = ClientTarget::from_env() else {
        error!("Invalid XCHANNEL_TARGET, expected tcp:ADDR, unix:PATH or vsock:CID:PORT");
        std::process::exit(2);
    };
    let payload_kb = std::env::var("XCHANNEL_PAYLOAD_KB")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PAYLOAD_KB);

    info!("Sending {} KB of data...", payload_kb);
    let data = vec![0xAB; payload_kb * 1024];
    if let Err(e) = TransClient::new(target).echo(&data).await {
        error!("Echo failed: {}", e);
        std::process::exit(1);
    }
}
