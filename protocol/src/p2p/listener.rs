//! Inbound accept loop.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::connection::{run_connection, ConnectionContext, Role};

/// Accept connections until `shutdown` fires, running each as handshake
/// responder on its own task.
pub async fn serve(listener: TcpListener, ctx: Arc<ConnectionContext>, shutdown: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening for peers");
    }
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        trace!(%remote, error = %e, "TCP_NODELAY not set");
                    }
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        if let Err(e) = run_connection(stream, Role::Responder, ctx, None).await {
                            debug!(%remote, error = %e, "inbound connection ended");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
    debug!("listener stopped");
}
