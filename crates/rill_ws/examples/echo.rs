//! Minimal echo service: every frame a client sends comes straight back.
//!
//! Run with `cargo run -p rill_ws --example echo`, then point any
//! WebSocket client at the printed URL.

use anyhow::Result;
use rill_ws::{BridgeRuntime, ListenerConfig, WsServer};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let bridge = BridgeRuntime::start();
    let config = ListenerConfig {
        addr: "127.0.0.1:9000".into(),
        ..ListenerConfig::default()
    };

    let handle = WsServer::new(config)
        .serve(&bridge, |session| {
            let stream = session.incoming();
            tokio::task::spawn_local(async move {
                loop {
                    match stream.next(None).await {
                        Ok(step) if !step.done => {
                            if let Some(value) = step.value {
                                let _ = session.send(value);
                            }
                        }
                        _ => break,
                    }
                }
            });
        })
        .await?;

    println!("echo listening on {}", handle.url());
    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    bridge.shutdown();
    Ok(())
}
