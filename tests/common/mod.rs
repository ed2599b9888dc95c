//! Shared fixtures for the integration tests: real routers on loopback.

use std::net::Ipv4Addr;
use std::time::Duration;

use sospf::algorithms::shortest_path;
use sospf::protocol::listener;
use sospf::types::RouterIdentity;
use sospf::{Router, RouterOptions, RouterState};
use tokio::net::TcpListener;

pub fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

/// Binds an ephemeral loopback port and starts a router with simulated
/// address `10.0.0.<last>` behind it.
pub async fn spawn_router(last: u8) -> Router {
    let _ = tracing_subscriber::fmt::try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let router = Router::new(
        RouterIdentity::new("127.0.0.1", port, addr(last)),
        RouterOptions {
            exchange_timeout: Duration::from_secs(2),
            refresh_interval: None,
        },
    );
    listener::spawn(router.clone(), listener);
    router
}

/// Rendered shortest path from the router's point of view, if any.
pub fn path_to(state: &RouterState, destination: Ipv4Addr) -> Option<String> {
    shortest_path(&state.lsdb, destination).ok().map(|path| path.to_string())
}

/// Polls the router state until `check` holds. Responders commit after
/// their last send, so their side may lag the initiator briefly.
pub async fn wait_until(router: &Router, check: impl Fn(&RouterState) -> bool) {
    for _ in 0..100 {
        if check(&*router.state().lock().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("router {} never reached the expected state", router.identity());
}
