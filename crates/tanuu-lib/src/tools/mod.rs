//! Typed wrappers over the two external control planes
//!
//! [`OmniCtl`] drives the fleet manager and [`KubeCtl`] the bootstrap
//! cluster. Both build [`Invocation`]s and hand them to a shared
//! [`CommandRunner`], so tests can swap in a scripted runner.

mod kubectl;
mod omnictl;

pub use kubectl::KubeCtl;
pub use omnictl::OmniCtl;

/// Split jsonpath or `-o name` output into identifiers.
///
/// Values may be separated by newlines or spaces and may be wrapped in
/// single quotes. Empty values are skipped.
pub fn parse_id_list(output: &str) -> Vec<String> {
    output
        .lines()
        .flat_map(|line| line.split_whitespace())
        .map(|token| token.trim_matches('\''))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
