use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process configuration. Everything comes from the environment; the process
/// surface has no CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
	/// TLS listen port (`PROXY_PORT`).
	pub port: u16,
	/// Global request budget per second (`PROXY_MAX_CALLS_PER_SECOND`).
	pub max_calls_per_second: u64,
	/// The serialized route document (`PATH_FILE`).
	pub path_file: PathBuf,
	/// Directory of additional route bundles, merged over the route document.
	pub paths_dir: PathBuf,
	/// TLS material: default key/certificate plus per-SNI host directories.
	pub ssl_dir: PathBuf,
	/// Static error bodies, keyed by decimal status code.
	pub responses_dir: PathBuf,
	/// Bound on a single upstream exchange; expiry surfaces as 502.
	pub upstream_timeout: Duration,
}

pub fn parse_config() -> anyhow::Result<Config> {
	Ok(Config {
		port: parse_default("PROXY_PORT", 443)?,
		max_calls_per_second: parse_default("PROXY_MAX_CALLS_PER_SECOND", 1000)?,
		path_file: parse_default("PATH_FILE", PathBuf::from("paths.json"))?,
		paths_dir: PathBuf::from("paths"),
		ssl_dir: PathBuf::from("ssl"),
		responses_dir: PathBuf::from("responses"),
		upstream_timeout: Duration::from_secs(parse_default("PROXY_UPSTREAM_TIMEOUT", 15)?),
	})
}

fn parse<T: FromStr>(env: &str) -> anyhow::Result<Option<T>>
where
	<T as FromStr>::Err: ToString,
{
	match env::var(env) {
		Ok(val) => val
			.parse()
			.map(|v| Some(v))
			.map_err(|e: <T as FromStr>::Err| {
				anyhow::anyhow!("invalid env var {}={} ({})", env, val, e.to_string())
			}),
		Err(_) => Ok(None),
	}
}

fn parse_default<T: FromStr>(env: &str, default: T) -> anyhow::Result<T>
where
	<T as FromStr>::Err: ToString,
{
	parse(env).map(|v| v.unwrap_or(default))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		// The suite must not depend on ambient env vars for these keys.
		let cfg = parse_config().expect("default config must parse");
		assert_eq!(cfg.port, 443);
		assert_eq!(cfg.max_calls_per_second, 1000);
		assert_eq!(cfg.path_file, PathBuf::from("paths.json"));
		assert_eq!(cfg.upstream_timeout, Duration::from_secs(15));
	}

	#[test]
	fn parse_rejects_garbage() {
		// SAFETY: test-only env mutation, key is unique to this test
		unsafe { env::set_var("EDGEGATEWAY_TEST_PORT", "not-a-number") };
		let got = parse::<u16>("EDGEGATEWAY_TEST_PORT");
		assert!(got.is_err());
		unsafe { env::remove_var("EDGEGATEWAY_TEST_PORT") };
	}
}
