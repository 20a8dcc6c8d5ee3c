use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::ProxyInputs;
use crate::proxy::httpproxy::HTTPProxy;
use crate::transport::stream::Socket;
use crate::transport::tls;

/// The listen surface: one TLS-wrapped TCP port serving HTTPS and
/// WebSocket-over-TLS.
pub struct Gateway {
	pi: Arc<ProxyInputs>,
}

impl Gateway {
	pub fn new(pi: Arc<ProxyInputs>) -> Gateway {
		Gateway { pi }
	}

	pub async fn run(self) -> anyhow::Result<()> {
		let address = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), self.pi.cfg.port);
		let listener = TcpListener::bind(address).await?;
		let tls = self.pi.certs.server_config();
		info!(%address, "started bind");
		loop {
			let (stream, peer) = match listener.accept().await {
				Ok(accepted) => accepted,
				Err(e) => {
					warn!("accept failed: {e}");
					continue;
				},
			};
			let pi = self.pi.clone();
			let tls = tls.clone();
			tokio::spawn(async move {
				let start = Instant::now();
				debug!(%peer, "connection started");
				if let Err(e) = handle_connection(pi, tls, stream).await {
					debug!(%peer, "connection closed: {e}");
				}
				debug!(%peer, dur = ?start.elapsed(), "connection completed");
			});
		}
	}
}

async fn handle_connection(
	pi: Arc<ProxyInputs>,
	tls: Arc<rustls::ServerConfig>,
	stream: TcpStream,
) -> anyhow::Result<()> {
	let socket = Socket::from_tcp(stream)?;
	// Certificate selection happens inside the handshake, keyed by SNI.
	let stream = tls::accept(socket, tls).await?;
	let connection = Arc::new(stream.get_ext());
	let proxy = HTTPProxy { inputs: pi };
	let server = auto_server();
	server
		.serve_connection_with_upgrades(
			TokioIo::new(stream),
			hyper::service::service_fn(move |req| {
				let proxy = proxy.clone();
				let connection = connection.clone();
				async move { proxy.proxy(connection, req).await }
			}),
		)
		.await
		.map_err(|e| anyhow!("{e}"))
}

pub fn auto_server() -> auto::Builder<TokioExecutor> {
	auto::Builder::new(TokioExecutor::new())
}
