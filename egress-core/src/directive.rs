//! Forwarding directive rendering for the allowlisting proxy (squid)

use crate::chain::ChainDescriptor;
use std::fmt::Write;

/// Line in the base configuration replaced by the chaining block
pub const CHAIN_MARKER: &str = "# @UPSTREAM_CHAIN@";

/// Render the parent-proxy block for a descriptor.
///
/// Returns an empty string when no chaining is requested. Otherwise the
/// block names the parent with a zero ICP port, `no-query` and `default`,
/// an optional `login=` clause, and `never_direct` so nothing bypasses it.
pub fn render_chain_directive(chain: &ChainDescriptor) -> String {
    if !chain.is_chaining() {
        return String::new();
    }

    let mut out = String::new();
    let _ = write!(
        out,
        "cache_peer {} parent {} 0 no-query default",
        chain.host, chain.port
    );
    if let Some(ref creds) = chain.credentials {
        let _ = write!(out, " login={}:{}", creds.user(), creds.pass());
    }
    out.push('\n');
    out.push_str("never_direct allow all\n");
    out
}

/// Splice the chaining block into a base configuration.
///
/// The block replaces the [`CHAIN_MARKER`] line when present and is
/// appended otherwise. With no chaining the marker line is simply dropped.
pub fn render_proxy_config(template: &str, chain: &ChainDescriptor) -> String {
    let block = render_chain_directive(chain);
    let mut out = String::with_capacity(template.len() + block.len());
    let mut spliced = false;

    for line in template.lines() {
        if line.trim() == CHAIN_MARKER {
            out.push_str(&block);
            spliced = true;
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    if !spliced && !block.is_empty() {
        out.push_str("\n# Upstream proxy chaining\n");
        out.push_str(&block);
    }

    out
}
