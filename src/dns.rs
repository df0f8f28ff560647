//! Target resolution and the synthetic-address parameter override.

use std::io;
use std::net::{IpAddr, Ipv4Addr};

use tokio::net::lookup_host;

/// Trace argument selecting a DNS-over-TLS resolver.
pub const DOT_FLAG: &str = "--dot-server";

/// Resolver injected for targets in the synthetic test range.
const DOT_FALLBACK: &str = "google";

/// Resolve a target to its first address. Callers treat failure as
/// non-fatal and fall back to the literal target.
pub async fn resolve_target(target: &str) -> io::Result<String> {
    let mut addrs = lookup_host((target, 0)).await?;
    Ok(addrs
        .next()
        .map_or_else(|| target.to_string(), |addr| addr.ip().to_string()))
}

/// Whether an address sits in the 198.18.0.0/15 benchmarking range used
/// for synthetic test targets.
pub fn is_synthetic(addr: &str) -> bool {
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => in_benchmark_range(v4),
        _ => false,
    }
}

fn in_benchmark_range(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    octets[0] == 198 && (octets[1] & 0xfe) == 18
}

/// Inject the fallback DoT resolver for synthetic targets.
///
/// Returns the synthetic flag and a new parameter sequence; the input is
/// never mutated. An explicit `--dot-server` from the caller suppresses
/// the injection.
pub fn apply_dot_fallback(addr: &str, params: &[String]) -> (bool, Vec<String>) {
    let synthetic = is_synthetic(addr);
    let mut out = params.to_vec();
    if synthetic && !params.iter().any(|p| p == DOT_FLAG) {
        out.push(DOT_FLAG.to_string());
        out.push(DOT_FALLBACK.to_string());
    }
    (synthetic, out)
}
