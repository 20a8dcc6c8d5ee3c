use std::fmt;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use indexmap::IndexMap;
use ipnet::IpNet;
use regex::Regex;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::Item;

use crate::http::Authority;
use crate::http::filters::{Handler, RequestRewrite, ResponseRewrite};

pub type PatternKey = String;

/// A wildcard pattern over request paths. `*` matches any run of characters,
/// everything else is literal. Compiled once, anchored at both ends, so `/`
/// does not match `/x`.
#[derive(Debug, Clone)]
pub struct PathPattern {
	raw: String,
	re: Regex,
}

impl PathPattern {
	pub fn new(pattern: &str) -> Result<PathPattern, regex::Error> {
		let body = pattern
			.split('*')
			.map(|s| regex::escape(s))
			.collect::<Vec<_>>()
			.join(".*");
		let re = Regex::new(&format!("^{body}$"))?;
		Ok(PathPattern {
			raw: pattern.to_string(),
			re,
		})
	}

	pub fn matches(&self, path: &str) -> bool {
		self.re.is_match(path)
	}

	pub fn as_str(&self) -> &str {
		&self.raw
	}
}

/// A single upstream origin: authority plus whether the hop uses TLS.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
	pub authority: Authority,
	pub tls: bool,
}

impl UpstreamTarget {
	/// Accepts `https://host[:port]`, `http://host[:port]` and bare
	/// `host[:port]` forms. A scheme wins over the `secure` flag; anything
	/// past the authority is dropped.
	pub fn parse(raw: &str, secure: bool) -> anyhow::Result<UpstreamTarget> {
		let raw = raw.trim();
		let (tls, rest) = if let Some(r) = raw.strip_prefix("https://") {
			(true, r)
		} else if let Some(r) = raw.strip_prefix("http://") {
			(false, r)
		} else {
			(secure, raw)
		};
		let rest = rest.split('/').next().unwrap_or_default();
		if rest.is_empty() {
			return Err(anyhow!("empty upstream target: {raw:?}"));
		}
		let authority = rest.parse::<Authority>()?;
		Ok(UpstreamTarget { authority, tls })
	}

	pub fn host(&self) -> &str {
		self.authority.host()
	}

	pub fn port(&self) -> u16 {
		self
			.authority
			.port_u16()
			.unwrap_or(if self.tls { 443 } else { 80 })
	}
}

impl fmt::Display for UpstreamTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let scheme = if self.tls { "https" } else { "http" };
		write!(f, "{}://{}", scheme, self.authority)
	}
}

/// Why a route carries no usable target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidTarget {
	/// The route was registered without any target at all.
	Unset,
	/// A target was given but could not be used (bad URL, empty pool).
	Unusable,
}

/// Where a matched request is dispatched.
#[derive(Clone)]
pub enum Target {
	Upstream(UpstreamTarget),
	/// One member is chosen uniformly at random per request.
	Pool(Vec<UpstreamTarget>),
	File(PathBuf),
	Handler(Arc<dyn Handler>),
	Invalid(InvalidTarget),
}

impl fmt::Debug for Target {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Target::Upstream(t) => f.debug_tuple("Upstream").field(t).finish(),
			Target::Pool(p) => f.debug_tuple("Pool").field(p).finish(),
			Target::File(p) => f.debug_tuple("File").field(p).finish(),
			Target::Handler(_) => f.debug_struct("Handler").finish(),
			Target::Invalid(why) => f.debug_tuple("Invalid").field(why).finish(),
		}
	}
}

/// A fully built route table entry.
#[derive(Clone)]
pub struct Route {
	/// The raw pattern string; unique within a `RouteSet`.
	pub key: PatternKey,
	pub pattern: PathPattern,
	/// Lower wins; `None` loses to every explicit priority.
	pub priority: Option<i32>,
	/// Lowercased; empty means any host.
	pub hostnames: Vec<String>,
	pub target: Target,
	/// `None` = unrestricted, `Some(empty)` = deny all.
	pub allowed_nets: Option<Vec<IpNet>>,
	pub ignore_proxied_ip: bool,
	pub content_type: Option<String>,
	pub enable_cors: bool,
	pub websocket: bool,
	pub rewrite_request: Option<Arc<dyn RequestRewrite>>,
	pub rewrite_response: Option<Arc<dyn ResponseRewrite>>,
}

impl Route {
	/// A route with nothing but a pattern and a target; the rest defaults to
	/// the most permissive settings.
	pub fn new(pattern: &str, target: Target) -> anyhow::Result<Route> {
		Ok(Route {
			key: pattern.to_string(),
			pattern: PathPattern::new(pattern)?,
			priority: None,
			hostnames: Vec::new(),
			target,
			allowed_nets: None,
			ignore_proxied_ip: false,
			content_type: None,
			enable_cors: false,
			websocket: false,
			rewrite_request: None,
			rewrite_response: None,
		})
	}
}

impl fmt::Debug for Route {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Route")
			.field("key", &self.key)
			.field("priority", &self.priority)
			.field("hostnames", &self.hostnames)
			.field("target", &self.target)
			.field("websocket", &self.websocket)
			.finish()
	}
}

/// Insertion-ordered route table with unique patterns. Re-registering a
/// pattern replaces the entry but keeps its original position, so lookup
/// order stays stable across overrides.
#[derive(Debug, Default, Clone)]
pub struct RouteSet {
	routes: IndexMap<PatternKey, Arc<Route>>,
}

impl RouteSet {
	pub fn insert(&mut self, route: Route) {
		self.routes.insert(route.key.clone(), Arc::new(route));
	}

	pub fn from_list(routes: Vec<Route>) -> RouteSet {
		let mut rs = RouteSet::default();
		for r in routes {
			rs.insert(r);
		}
		rs
	}

	pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
		self.routes.values()
	}

	pub fn len(&self) -> usize {
		self.routes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.routes.is_empty()
	}
}

pub fn parse_cert(mut cert: &[u8]) -> Result<Vec<CertificateDer<'static>>, anyhow::Error> {
	let mut reader = std::io::BufReader::new(Cursor::new(&mut cert));
	let parsed: Result<Vec<_>, _> = rustls_pemfile::read_all(&mut reader).collect();
	parsed?
		.into_iter()
		.map(|p| {
			let Item::X509Certificate(der) = p else {
				return Err(anyhow!("no certificate"));
			};
			Ok(der)
		})
		.collect::<Result<Vec<_>, _>>()
}

pub fn parse_key(mut key: &[u8]) -> Result<PrivateKeyDer<'static>, anyhow::Error> {
	let mut reader = std::io::BufReader::new(Cursor::new(&mut key));
	let parsed = rustls_pemfile::read_one(&mut reader)?;
	let parsed = parsed.ok_or_else(|| anyhow!("no key"))?;
	match parsed {
		Item::Pkcs8Key(c) => Ok(PrivateKeyDer::Pkcs8(c)),
		Item::Pkcs1Key(c) => Ok(PrivateKeyDer::Pkcs1(c)),
		Item::Sec1Key(c) => Ok(PrivateKeyDer::Sec1(c)),
		_ => Err(anyhow!("unsupported key")),
	}
}
