use std::net::IpAddr;

use ipnet::IpNet;

use crate::http::HeaderValue;
use crate::proxy::ProxyError;
use crate::types::agent::Route;

/// Dual-source IP admission over the route's CIDR list.
///
/// * No list: unrestricted.
/// * Empty list: denies every request.
/// * Otherwise the immediate peer must fall inside at least one range, and —
///   when a forwarded-for header is present and the route does not ignore
///   proxied addresses — so must the forwarded client address. An
///   unparseable forwarded value denies outright.
pub fn authorize(
	route: &Route,
	peer: IpAddr,
	forwarded_for: Option<&HeaderValue>,
) -> Result<(), ProxyError> {
	let Some(nets) = &route.allowed_nets else {
		return Ok(());
	};
	if nets.is_empty() {
		return Err(ProxyError::IpDenied);
	}
	let forwarded = match forwarded_for {
		Some(v) => Some(parse_forwarded(v).ok_or(ProxyError::IpDenied)?),
		None => None,
	};
	if !contained(nets, peer) {
		return Err(ProxyError::IpDenied);
	}
	match forwarded {
		None => Ok(()),
		Some(_) if route.ignore_proxied_ip => Ok(()),
		Some(ip) if contained(nets, ip) => Ok(()),
		Some(_) => Err(ProxyError::IpDenied),
	}
}

fn contained(nets: &[IpNet], ip: IpAddr) -> bool {
	nets.iter().any(|n| n.contains(&ip))
}

/// The leftmost entry is the original client; later hops don't widen access.
fn parse_forwarded(value: &HeaderValue) -> Option<IpAddr> {
	value.to_str().ok()?.split(',').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::agent::{InvalidTarget, Route, Target};

	fn route(cidrs: Option<Vec<&str>>, ignore_proxied_ip: bool) -> Route {
		let mut r = Route::new("/", Target::Invalid(InvalidTarget::Unset)).unwrap();
		r.allowed_nets =
			cidrs.map(|c| c.into_iter().map(|s| s.parse::<IpNet>().unwrap()).collect());
		r.ignore_proxied_ip = ignore_proxied_ip;
		r
	}

	fn peer(s: &str) -> IpAddr {
		s.parse().unwrap()
	}

	#[test]
	fn no_list_allows_everyone() {
		let r = route(None, false);
		assert!(authorize(&r, peer("8.8.8.8"), None).is_ok());
	}

	#[test]
	fn empty_list_denies_everyone() {
		let r = route(Some(vec![]), false);
		assert!(authorize(&r, peer("10.0.0.1"), None).is_err());
	}

	#[test]
	fn peer_must_match() {
		let r = route(Some(vec!["10.0.0.0/8"]), false);
		assert!(authorize(&r, peer("10.1.2.3"), None).is_ok());
		assert!(authorize(&r, peer("192.168.1.1"), None).is_err());
	}

	#[test]
	fn forwarded_must_also_match() {
		let r = route(Some(vec!["10.0.0.0/8"]), false);
		let fwd = HeaderValue::from_static("8.8.8.8");
		assert!(authorize(&r, peer("10.1.2.3"), Some(&fwd)).is_err());

		let fwd_inside = HeaderValue::from_static("10.9.9.9");
		assert!(authorize(&r, peer("10.1.2.3"), Some(&fwd_inside)).is_ok());
	}

	#[test]
	fn ignore_proxied_ip_skips_forwarded_check() {
		let r = route(Some(vec!["10.0.0.0/8"]), true);
		let fwd = HeaderValue::from_static("8.8.8.8");
		assert!(authorize(&r, peer("10.1.2.3"), Some(&fwd)).is_ok());
	}

	#[test]
	fn unparseable_forwarded_denies_even_when_ignored() {
		let r = route(Some(vec!["10.0.0.0/8"]), true);
		let fwd = HeaderValue::from_static("not-an-ip");
		assert!(authorize(&r, peer("10.1.2.3"), Some(&fwd)).is_err());
	}

	#[test]
	fn forwarded_list_uses_leftmost_entry() {
		let r = route(Some(vec!["10.0.0.0/8"]), false);
		let fwd = HeaderValue::from_static("10.2.3.4, 8.8.8.8");
		assert!(authorize(&r, peer("10.1.2.3"), Some(&fwd)).is_ok());

		let fwd = HeaderValue::from_static("8.8.8.8, 10.2.3.4");
		assert!(authorize(&r, peer("10.1.2.3"), Some(&fwd)).is_err());
	}

	#[test]
	fn ipv6_containment() {
		let r = route(Some(vec!["fd00::/8"]), false);
		assert!(authorize(&r, peer("fd12::1"), None).is_ok());
		assert!(authorize(&r, peer("2001:db8::1"), None).is_err());
	}

	#[test]
	fn single_address_range() {
		let r = route(Some(vec!["192.0.2.7/32"]), false);
		assert!(authorize(&r, peer("192.0.2.7"), None).is_ok());
		assert!(authorize(&r, peer("192.0.2.8"), None).is_err());
	}
}
