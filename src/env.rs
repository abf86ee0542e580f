//! Configuration read from environment variables.

use log::warn;

/// Interpret a string value such as "1" or "no" as a boolean.
pub fn str_as_bool(s: &str) -> bool {
    match s {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => {
            warn!("Unrecognized boolean value \"{}\"", s);
            false
        }
    }
}

/// Return whether a feature flag controlled by an environment variable is
/// enabled.
pub fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .as_ref()
        .map(|s| str_as_bool(s))
        .unwrap_or(default)
}

/// Options that affect how inference rules behave.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferConfig {
    /// Treat convolution filters as channel-last (`[out, *spatial, in]`)
    /// when the input is channel-last. When false, filters are always
    /// `[out, in, *spatial]`.
    pub filter_channel_last: bool,

    /// Simplify each result's expressions before storing it.
    pub simplify_results: bool,
}

impl InferConfig {
    /// Environment variable controlling [`filter_channel_last`](Self::filter_channel_last).
    pub const FILTER_CHANNEL_LAST_VAR: &str = "SYMSHAPE_FILTER_CHANNEL_LAST";

    /// Environment variable controlling [`simplify_results`](Self::simplify_results).
    pub const SIMPLIFY_VAR: &str = "SYMSHAPE_SIMPLIFY";

    /// Read configuration from environment variables, using defaults for
    /// any that are unset.
    pub fn from_env() -> Self {
        Self {
            filter_channel_last: env_flag(Self::FILTER_CHANNEL_LAST_VAR, false),
            simplify_results: env_flag(Self::SIMPLIFY_VAR, false),
        }
    }
}
