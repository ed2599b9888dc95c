use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::router::Router;

/// Starts the accept loop, plus the periodic re-flood when the router is
/// configured with one.
pub fn spawn(router: Router, listener: TcpListener) -> JoinHandle<()> {
    if let Some(period) = router.options().refresh_interval {
        spawn_refresh(router.clone(), period);
    }
    tokio::spawn(serve(router, listener))
}

/// Accepts connections until the router shuts down. Every connection gets
/// its own worker; the loop itself never waits on protocol work.
pub async fn serve(router: Router, listener: TcpListener) {
    let shutdown = router.shutdown_token();
    match listener.local_addr() {
        Ok(addr) => info!("Router {} listening on {}", router.identity().simulated_address, addr),
        Err(e) => warn!("Listener address unavailable: {}", e),
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Listener shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let router = router.clone();
                    let span = info_span!("conn", id = %Uuid::new_v4(), %peer);
                    tokio::spawn(async move { router.handle_connection(stream).await }.instrument(span));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
        }
    }
}

/// Re-floods the full LSDB to every established neighbour each `period`.
pub fn spawn_refresh(router: Router, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let shutdown = router.shutdown_token();
        let mut ticker = interval(period);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let reached = router.flood(None).await;
                    debug!("Periodic flood reached {} neighbours", reached);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterOptions;
    use crate::types::RouterIdentity;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn listener_stops_on_shutdown() {
        let _ = tracing_subscriber::fmt::try_init();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let router = Router::new(RouterIdentity::new("127.0.0.1", port, Ipv4Addr::new(10, 0, 0, 1)), RouterOptions::default());

        let handle = spawn(router.clone(), listener);
        router.shutdown_token().cancel();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn garbage_connection_leaves_state_untouched() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let router = Router::new(
            RouterIdentity::new("127.0.0.1", port, Ipv4Addr::new(10, 0, 0, 1)),
            RouterOptions {
                exchange_timeout: Duration::from_millis(300),
                refresh_interval: None,
            },
        );
        let handle = spawn(router.clone(), listener);

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(&[7, 0, 0, 0, 2, b'{', b'}']).await.unwrap();
        drop(stream);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = router.state().lock().await;
        assert!(state.neighbors.is_empty());
        assert_eq!(state.lsdb.len(), 1);
        drop(state);

        router.shutdown_token().cancel();
        handle.await.unwrap();
    }
}
