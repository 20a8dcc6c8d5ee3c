use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;
use ipnet::IpNet;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::Config;
use crate::http::filters::CustomRoutes;
use crate::types::agent::{InvalidTarget, PathPattern, Route, RouteSet, Target, UpstreamTarget};

/// One route spec as it appears in the serialized document; the key it sits
/// under is the pattern. Hooks cannot be expressed here — they come only
/// from code-registered routes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocalRoute {
	#[serde(default)]
	to: Option<LocalTarget>,
	#[serde(default)]
	priority: Option<i32>,
	#[serde(default)]
	hostnames: Vec<String>,
	#[serde(default)]
	secure: bool,
	#[serde(default)]
	websocket: bool,
	#[serde(default)]
	allowed_cidrs: Option<Vec<String>>,
	#[serde(default, rename = "ignoreProxiedIP")]
	ignore_proxied_ip: bool,
	#[serde(default)]
	content_type: Option<String>,
	#[serde(default)]
	enable_cors: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LocalTarget {
	One(String),
	Many(Vec<String>),
}

/// Build the route table: the `PATH_FILE` document first, then every
/// `./paths/*.json` bundle in sorted filename order, then code-registered
/// routes. Later entries override earlier ones on pattern collision while
/// keeping the original table position.
pub fn load_routes(cfg: &Config, custom: CustomRoutes) -> anyhow::Result<RouteSet> {
	let mut table = RouteSet::default();

	if cfg.path_file.exists() {
		merge_document(&mut table, &cfg.path_file)?;
	} else {
		warn!(
			"route document {} not found; starting with an empty table",
			cfg.path_file.display()
		);
	}

	if cfg.paths_dir.is_dir() {
		let mut bundles: Vec<PathBuf> = fs_err::read_dir(&cfg.paths_dir)?
			.collect::<Result<Vec<_>, _>>()?
			.into_iter()
			.map(|e| e.path())
			.filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
			.collect();
		bundles.sort();
		for bundle in bundles {
			merge_document(&mut table, &bundle)?;
		}
	}

	for route in custom.into_routes() {
		table.insert(route);
	}
	Ok(table)
}

fn merge_document(table: &mut RouteSet, path: &Path) -> anyhow::Result<()> {
	let raw = fs_err::read_to_string(path)?;
	let doc: IndexMap<String, LocalRoute> = serde_json::from_str(&raw)
		.with_context(|| format!("parsing route document {}", path.display()))?;
	debug!(routes = doc.len(), "merging {}", path.display());
	for (pattern, spec) in doc {
		table.insert(convert_route(&pattern, spec)?);
	}
	Ok(())
}

fn convert_route(pattern: &str, lr: LocalRoute) -> anyhow::Result<Route> {
	let target = convert_target(pattern, lr.to, lr.secure);
	Ok(Route {
		key: pattern.to_string(),
		pattern: PathPattern::new(pattern)
			.with_context(|| format!("compiling pattern {pattern:?}"))?,
		priority: lr.priority,
		hostnames: lr.hostnames.into_iter().map(|h| h.to_lowercase()).collect(),
		target,
		allowed_nets: lr
			.allowed_cidrs
			.map(|list| {
				list
					.iter()
					.map(|c| parse_cidr(c))
					.collect::<anyhow::Result<Vec<_>>>()
			})
			.transpose()
			.with_context(|| format!("route {pattern:?}"))?,
		ignore_proxied_ip: lr.ignore_proxied_ip,
		content_type: lr.content_type,
		enable_cors: lr.enable_cors,
		websocket: lr.websocket,
		rewrite_request: None,
		rewrite_response: None,
	})
}

/// A bad target is not a load failure: the route stays registered and
/// answers 403 at dispatch, which keeps one typo from taking down the whole
/// table.
fn convert_target(pattern: &str, to: Option<LocalTarget>, secure: bool) -> Target {
	match to {
		None => Target::Invalid(InvalidTarget::Unset),
		Some(LocalTarget::One(s)) if s.starts_with("file:") => {
			let rest = s
				.strip_prefix("file://")
				.unwrap_or_else(|| &s["file:".len()..]);
			Target::File(PathBuf::from(rest))
		},
		Some(LocalTarget::One(s)) => match UpstreamTarget::parse(&s, secure) {
			Ok(t) => Target::Upstream(t),
			Err(e) => {
				warn!("route {pattern:?}: unusable target {s:?}: {e}");
				Target::Invalid(InvalidTarget::Unusable)
			},
		},
		Some(LocalTarget::Many(list)) => {
			let parsed: Result<Vec<_>, _> = list
				.iter()
				.map(|s| UpstreamTarget::parse(s, secure))
				.collect();
			match parsed {
				Ok(pool) if !pool.is_empty() => Target::Pool(pool),
				Ok(_) => {
					warn!("route {pattern:?}: empty target pool");
					Target::Invalid(InvalidTarget::Unusable)
				},
				Err(e) => {
					warn!("route {pattern:?}: unusable target pool: {e}");
					Target::Invalid(InvalidTarget::Unusable)
				},
			}
		},
	}
}

/// A plain address is accepted as a single-address range.
fn parse_cidr(s: &str) -> anyhow::Result<IpNet> {
	if let Ok(net) = s.parse::<IpNet>() {
		return Ok(net);
	}
	s.parse::<std::net::IpAddr>()
		.map(IpNet::from)
		.map_err(|_| anyhow::anyhow!("invalid CIDR {s:?}"))
}
