use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context as _, anyhow, bail};
use bytes::Bytes;
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use rand::seq::IndexedRandom;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, copy_bidirectional};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

use crate::ProxyInputs;
use crate::http::authorization;
use crate::http::cors::ReflectedCors;
use crate::http::uri::PathAndQuery;
use crate::http::{
	self, Authority, Body, HeaderMap, HeaderName, HeaderValue, Request, Response, Scheme,
	StatusCode, Uri, header, route,
};
use crate::proxy::ProxyError;
use crate::transport::stream::{Extension, TcpConnectionInfo};
use crate::types::agent::{InvalidTarget, Route, Target, UpstreamTarget};

#[cfg(test)]
#[path = "httpproxy_test.rs"]
mod tests;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

// Hop-by-hop headers. These are removed when sent to the backend.
static HOP_HEADERS: [HeaderName; 9] = [
	header::CONNECTION,
	// non-standard but still sent by libcurl and rejected by e.g. google
	HeaderName::from_static("proxy-connection"),
	HeaderName::from_static("keep-alive"),
	header::PROXY_AUTHENTICATE,
	header::PROXY_AUTHORIZATION,
	header::TE,
	header::TRAILER,
	header::TRANSFER_ENCODING,
	header::UPGRADE,
];

/// Returned when the connection should be torn down without a response.
/// Hyper drops the connection when the service errors, so upgrade failures
/// stay silent on the wire.
#[derive(Debug, thiserror::Error)]
#[error("connection aborted")]
pub struct Abort;

pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

#[derive(Clone)]
pub struct HTTPProxy {
	pub(super) inputs: Arc<ProxyInputs>,
}

impl HTTPProxy {
	pub async fn proxy(
		&self,
		connection: Arc<Extension>,
		req: ::http::Request<Incoming>,
	) -> Result<Response, Abort> {
		let tcp = connection
			.get::<TcpConnectionInfo>()
			.expect("tcp connection info must be set");
		let peer = tcp.peer_addr.ip();
		let mut req = req.map(Body::new);
		if let Err(e) = normalize_uri(&mut req) {
			debug!(%peer, "rejecting unnormalizable request: {e}");
			return Ok(self.inputs.responder.respond(&ProxyError::InvalidRequest));
		}

		if upgrade_type(req.headers()).is_some() {
			// Upgrades skip the rate check and the path allow-list, and
			// failures close the connection without a response.
			return match self.proxy_upgrade(peer, req).await {
				Ok(resp) => Ok(resp),
				Err(e) => {
					debug!(%peer, "upgrade failed: {e:#}");
					Err(Abort)
				},
			};
		}

		Ok(self.proxy_request(peer, req).await.unwrap_or_else(|e| {
			debug!(%peer, "request rejected: {e}");
			self.inputs.responder.respond(&e)
		}))
	}

	/// The regular pipeline: rate limit, path allow-list, route resolution,
	/// CIDR admission, then dispatch on the route's target.
	async fn proxy_request(&self, peer: IpAddr, req: Request) -> Result<Response, ProxyError> {
		let inputs = &self.inputs;

		inputs.ratelimit.check_request()?;
		if !route::allows_path(&inputs.routes, req.uri().path()) {
			return Err(ProxyError::PathNotAllowed);
		}
		let host = http::get_host(&req).unwrap_or_default().to_string();
		let route =
			route::select_for_request(&inputs.routes, &host, &req).ok_or(ProxyError::RouteNotFound)?;
		authorization::authorize(&route, peer, req.headers().get(X_FORWARDED_FOR))?;
		trace!(route = %route.key, %host, path = req.uri().path(), "dispatching");

		match route.target.clone() {
			Target::Handler(handler) => {
				let body = handler.serve(req).await.map_err(ProxyError::HandlerFailed)?;
				direct_response(&route, body)
			},
			Target::File(path) => {
				let bytes = tokio::fs::read(&path)
					.await
					.map_err(ProxyError::FileUnreadable)?;
				direct_response(&route, Bytes::from(bytes))
			},
			Target::Upstream(target) => self.proxy_upstream(&route, target, peer, req).await,
			Target::Pool(pool) => {
				let target = pool
					.choose(&mut rand::rng())
					.ok_or(ProxyError::TargetMisconfigured)?
					.clone();
				self.proxy_upstream(&route, target, peer, req).await
			},
			Target::Invalid(InvalidTarget::Unset) => Err(ProxyError::RouteNotConfigured),
			Target::Invalid(InvalidTarget::Unusable) => Err(ProxyError::TargetMisconfigured),
		}
	}

	/// The HTTP reverse-proxy engine.
	async fn proxy_upstream(
		&self,
		route: &Route,
		target: UpstreamTarget,
		peer: IpAddr,
		req: Request,
	) -> Result<Response, ProxyError> {
		let cors = route
			.enable_cors
			.then(|| ReflectedCors::capture(req.headers()));
		let mut req = prepare_upstream_request(peer, req).map_err(ProxyError::Processing)?;
		// The pooled client dials (and pools by) scheme + authority.
		let uri = forward_uri(&target, &req).map_err(ProxyError::Processing)?;
		*req.uri_mut() = uri;
		if let Some(rw) = &route.rewrite_request {
			rw.apply(&mut req).map_err(ProxyError::Processing)?;
		}

		let call = self.inputs.upstream.request(req);
		let mut resp = tokio::time::timeout(self.inputs.cfg.upstream_timeout, call)
			.await
			.map_err(|_| ProxyError::RequestTimeout)?
			.map_err(|e| ProxyError::UpstreamCallFailed(e.into()))?;

		strip_hop_headers(resp.headers_mut());
		// Reflection lands before the response hook so the hook sees (and
		// may override) it.
		if let Some(cors) = cors {
			cors.apply(resp.headers_mut());
		}
		if let Some(rw) = &route.rewrite_response {
			rw.apply(&mut resp).map_err(ProxyError::Processing)?;
		}
		Ok(resp)
	}

	/// The WebSocket reverse-proxy engine: dedicated HTTP/1.1 handshake with
	/// upgrades, then a bidirectional byte copy. `Sec-WebSocket-*` headers
	/// pass through untouched.
	async fn proxy_upgrade(&self, peer: IpAddr, mut req: Request) -> anyhow::Result<Response> {
		let inputs = &self.inputs;
		let host = http::get_host(&req).unwrap_or_default().to_string();
		let route = route::select_for_request(&inputs.routes, &host, &req)
			.context("no route for upgrade")?;
		authorization::authorize(&route, peer, req.headers().get(X_FORWARDED_FOR))
			.map_err(|e| anyhow!("upgrade admission: {e}"))?;
		if !route.websocket {
			bail!("route {} does not serve upgrades", route.key);
		}
		let target = match &route.target {
			Target::Upstream(t) => t.clone(),
			Target::Pool(pool) => pool
				.choose(&mut rand::rng())
				.context("empty upstream pool")?
				.clone(),
			_ => bail!("upgrade route {} has no upstream target", route.key),
		};

		let upgrade = upgrade_type(req.headers()).context("missing upgrade header")?;
		let downstream_upgrade = req
			.extensions_mut()
			.remove::<OnUpgrade>()
			.context("connection does not support upgrades")?;

		let mut req = prepare_upstream_request(peer, req)?;
		// The handshake goes over a dedicated connection in origin-form.
		let origin_form = Uri::builder()
			.path_and_query(
				req
					.uri()
					.path_and_query()
					.cloned()
					.unwrap_or_else(|| PathAndQuery::from_static("/")),
			)
			.build()?;
		*req.uri_mut() = origin_form;
		req.headers_mut().insert(
			header::HOST,
			HeaderValue::from_str(target.authority.as_str())?,
		);
		// Put back the upgrade intent the hop-by-hop strip removed.
		req
			.headers_mut()
			.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
		req.headers_mut().insert(header::UPGRADE, upgrade.clone());
		if let Some(rw) = &route.rewrite_request {
			rw.apply(&mut req)?;
		}

		let (parts, _body) = req.into_parts();
		let upstream_req = ::http::Request::from_parts(parts, Empty::<Bytes>::new());

		let exchange = async {
			let io = self.connect(&target).await?;
			let (mut sender, conn) =
				hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(TokioIo::new(io)).await?;
			tokio::task::spawn(async move {
				if let Err(e) = conn.with_upgrades().await {
					debug!("upstream upgrade connection failed: {e}");
				}
			});
			Ok::<_, anyhow::Error>(sender.send_request(upstream_req).await?)
		};
		let mut resp = tokio::time::timeout(inputs.cfg.upstream_timeout, exchange)
			.await
			.context("upstream upgrade timed out")??;

		if resp.status() != StatusCode::SWITCHING_PROTOCOLS {
			bail!("upstream refused upgrade: {}", resp.status());
		}
		if upgrade_type(resp.headers()).as_ref() != Some(&upgrade) {
			bail!("upstream switched to a different protocol");
		}
		let upstream_upgrade = resp
			.extensions_mut()
			.remove::<OnUpgrade>()
			.context("upstream offered no upgrade")?;

		tokio::task::spawn(async move {
			let (upstream, downstream) =
				match tokio::try_join!(upstream_upgrade, downstream_upgrade) {
					Ok(both) => both,
					Err(e) => {
						debug!("upgrade handshake join failed: {e}");
						return;
					},
				};
			// Either side closing closes the other.
			if let Err(e) =
				copy_bidirectional(&mut TokioIo::new(downstream), &mut TokioIo::new(upstream)).await
			{
				trace!("upgraded copy ended: {e}");
			}
		});

		let (parts, _body) = resp.into_parts();
		Ok(::http::Response::from_parts(parts, Body::empty()))
	}

	async fn connect(&self, target: &UpstreamTarget) -> anyhow::Result<Box<dyn Stream>> {
		let stream = TcpStream::connect((target.host(), target.port())).await?;
		stream.set_nodelay(true)?;
		if target.tls {
			let name = ServerName::try_from(target.host().to_string())?;
			let tls = TlsConnector::from(self.inputs.upstream.tls_config())
				.connect(name, stream)
				.await?;
			Ok(Box::new(tls))
		} else {
			Ok(Box::new(stream))
		}
	}
}

fn direct_response(route: &Route, body: Bytes) -> Result<Response, ProxyError> {
	::http::Response::builder()
		.status(StatusCode::OK)
		.header(
			header::CONTENT_TYPE,
			route.content_type.as_deref().unwrap_or("text/plain"),
		)
		.body(Body::from(body))
		.map_err(|e| ProxyError::Processing(e.into()))
}

/// Rewrites a downstream request for the upstream hop: hop-by-hop headers
/// go, and the forwarded headers get set, overwriting anything
/// client-supplied. The caller decides the URI form its engine needs.
fn prepare_upstream_request(peer: IpAddr, mut req: Request) -> anyhow::Result<Request> {
	let orig_authority = req.uri().authority().cloned();
	let trailers = wants_trailers(req.headers());
	strip_hop_headers(req.headers_mut());
	if trailers {
		// If the incoming request supports trailers, the upstream one does too
		req
			.headers_mut()
			.insert(header::TE, HeaderValue::from_static("trailers"));
	}
	req
		.headers_mut()
		.insert(X_FORWARDED_FOR, HeaderValue::from_str(&peer.to_string())?);
	if let Some(authority) = &orig_authority {
		req
			.headers_mut()
			.insert(X_FORWARDED_HOST, HeaderValue::from_str(authority.as_str())?);
	}
	Ok(req)
}

fn forward_uri(target: &UpstreamTarget, req: &Request) -> anyhow::Result<Uri> {
	let scheme = if target.tls { Scheme::HTTPS } else { Scheme::HTTP };
	Ok(
		Uri::builder()
			.scheme(scheme)
			.authority(target.authority.clone())
			.path_and_query(
				req
					.uri()
					.path_and_query()
					.cloned()
					.unwrap_or_else(|| PathAndQuery::from_static("/")),
			)
			.build()?,
	)
}

fn strip_hop_headers(headers: &mut HeaderMap) {
	remove_connection_headers(headers);
	for h in HOP_HEADERS.iter() {
		headers.remove(h);
	}
}

fn remove_connection_headers(headers: &mut HeaderMap) {
	let Some(value) = headers.get(header::CONNECTION).cloned() else {
		return;
	};
	let Ok(value) = value.to_str() else {
		return;
	};
	for name in value.split(',') {
		let name = name.trim();
		if !name.is_empty() {
			headers.remove(name);
		}
	}
}

fn wants_trailers(headers: &HeaderMap) -> bool {
	headers
		.get(header::TE)
		.and_then(|v| v.to_str().ok())
		.map(|v| v.split(',').any(|e| e.trim() == "trailers"))
		.unwrap_or(false)
}

fn upgrade_type(headers: &HeaderMap) -> Option<HeaderValue> {
	let connection = headers.get(header::CONNECTION)?.to_str().ok()?;
	if connection
		.split(',')
		.any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
	{
		headers.get(header::UPGRADE).cloned()
	} else {
		None
	}
}

// The http library will not put the authority into req.uri().authority for
// HTTP/1. Normalize so the rest of the pipeline doesn't need to worry about
// it. A request with no host header at all is left alone; only
// hostname-free routes can match it.
fn normalize_uri(req: &mut Request) -> anyhow::Result<()> {
	if let ::http::Version::HTTP_10 | ::http::Version::HTTP_11 = req.version() {
		if req.uri().authority().is_none() {
			let Some(host) = req
				.headers()
				.get(header::HOST)
				.and_then(|h| h.to_str().ok())
				.and_then(|h| h.parse::<Authority>().ok())
			else {
				return Ok(());
			};
			req.headers_mut().remove(header::HOST);
			let mut parts = std::mem::take(req.uri_mut()).into_parts();
			parts.authority = Some(host);
			if parts.path_and_query.is_some() {
				// Downstream is always TLS-terminated here.
				parts.scheme = Some(Scheme::HTTPS);
			}
			*req.uri_mut() = Uri::from_parts(parts)?;
		}
	}
	Ok(())
}
