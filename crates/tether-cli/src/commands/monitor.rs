//! `tether monitor` — watch a relay's registry.
//!
//! Connects to the monitor endpoint and prints every snapshot the relay
//! pushes, starting with the current state.

use anyhow::Result;
use tether_client::ws;
use tether_core::Message;

pub async fn run(url: &str) -> Result<()> {
    let mut socket = ws::connect(url).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Watching {url} (Ctrl+C to stop)");

    loop {
        tokio::select! {
            incoming = ws::recv_message(&mut socket) => {
                match incoming.map_err(|e| anyhow::anyhow!("{e}"))? {
                    Some(Message::ClientsInfo { data }) => {
                        println!("--- {} client(s) ---", data.len());
                        for row in data {
                            println!(
                                "  {:<20} space={:<12} delay={}ms peers={}",
                                row.id,
                                row.space_id,
                                row.last_ping_delay,
                                row.webrtc_status.len()
                            );
                        }
                    }
                    Some(other) => {
                        println!("(ignoring {} message)", other.kind());
                    }
                    None => {
                        println!("Relay closed the connection");
                        return Ok(());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                return Ok(());
            }
        }
    }
}
