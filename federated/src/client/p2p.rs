//! C7: the federate's own TCP listener for direct peer-to-peer physical
//! connections (spec §2 `server_port`/`server_ip`, §4.1 `ADDRESS_AD`, §9
//! scheduling model: "one TCP listener for peer-to-peer connections, one
//! handler task per accepted peer"). No payload framing is specified for
//! these connections beyond the RTI/federate wire protocol, so the handler
//! here just keeps the peer's connection open and logs its lifetime; a
//! target integration is expected to layer its own payload atop this.

use tokio::net::{TcpListener, TcpStream};

/// Bind an ephemeral port for peer-to-peer connections, returning the
/// listener and the port it bound (to be advertised to the RTI via
/// `ADDRESS_AD`).
pub async fn bind_ephemeral() -> std::io::Result<(TcpListener, u16)> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Accept peer-to-peer connections for the lifetime of the federate,
/// spawning one handler task per accepted peer.
pub async fn run(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                tracing::info!(?addr, "accepted a peer-to-peer connection");
                tokio::spawn(handle_peer(socket, addr));
            }
            Err(err) => {
                tracing::error!(?err, "failed to accept a peer-to-peer connection");
            }
        }
    }
}

async fn handle_peer(mut socket: TcpStream, addr: std::net::SocketAddr) {
    use tokio::io::AsyncReadExt;
    let mut buf = [0u8; 64];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!(?addr, "peer-to-peer connection closed");
                return;
            }
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(?addr, ?err, "peer-to-peer connection error");
                return;
            }
        }
    }
}
