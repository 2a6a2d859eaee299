//! Host features and feature flags.
use crate::exec::{
    EnvFlags, FLAG_ENABLE_BINFMT_MISC, FLAG_ENABLE_CGROUPS, FLAG_ENABLE_CLOSEFDS,
    FLAG_ENABLE_NETDEV, FLAG_ENABLE_NETRESET, FLAG_ENABLE_TUN,
};
use crate::HashMap;
use iota::iota;
use thiserror::Error;

/// Features detected on the host.
pub type Features = u64;

iota! {
    pub const FEATURE_COVERAGE: Features = 1 << (iota);
    ,FEATURE_COMPARISONS
    ,FEATURE_EXTRA_COVERAGE
    ,FEATURE_SANDBOX_SETUID
    ,FEATURE_SANDBOX_NAMESPACE
    ,FEATURE_SANDBOX_ANDROID
    ,FEATURE_FAULT
    ,FEATURE_LEAK
    ,FEATURE_NET_INJECTION
    ,FEATURE_NET_DEVICES
}

pub const FEATURES_NAME: [&str; 10] = [
    "code coverage",
    "comparison tracing",
    "extra coverage",
    "setuid sandbox",
    "namespace sandbox",
    "Android sandbox",
    "fault injection",
    "leak checking",
    "net packet injection",
    "net device setup",
];

/// Flags selectable with `--enable` and `--disable`.
pub const FEATURE_FLAGS: [(&str, &str); 6] = [
    ("tun", "setup and use /dev/tun for packet injection"),
    ("net_dev", "setup more network devices for testing"),
    ("net_reset", "reset network namespace between programs"),
    ("cgroups", "setup cgroups for testing"),
    ("binfmt_misc", "setup binfmt_misc for testing"),
    ("close_fds", "close fds after each program"),
];

lazy_static! {
    pub static ref FEATURES_HELP: String = {
        let mut help = String::from(
            "Features (for --enable/--disable, comma separated, or 'all'; default 'none'):\n",
        );
        for (name, desc) in FEATURE_FLAGS.iter() {
            help.push_str(&format!("    {:<16}{}\n", name, desc));
        }
        help
    };
}

#[derive(Debug, Error)]
pub enum FeaturesError {
    #[error("can't use --enable and --disable flags at the same time")]
    Conflict,
    #[error("unknown feature specified: {0}")]
    Unknown(String),
}

/// State of each feature flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlags(HashMap<&'static str, bool>);

impl FeatureFlags {
    pub fn all(enabled: bool) -> Self {
        Self(
            FEATURE_FLAGS
                .iter()
                .map(|(name, _)| (*name, enabled))
                .collect(),
        )
    }

    #[inline]
    pub fn enabled(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    /// Enabled flags, in declaration order.
    pub fn enabled_names(&self) -> Vec<&'static str> {
        FEATURE_FLAGS
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| self.enabled(name))
            .collect()
    }
}

/// Resolve `--enable`/`--disable` values, `"none"` means the flag was not given.
pub fn parse_features_flags(
    enable: &str,
    disable: &str,
    default: bool,
) -> Result<FeatureFlags, FeaturesError> {
    const NONE: &str = "none";
    const ALL: &str = "all";

    if enable == NONE && disable == NONE {
        return Ok(FeatureFlags::all(default));
    }
    if enable != NONE && disable != NONE {
        return Err(FeaturesError::Conflict);
    }
    if enable == ALL || disable.is_empty() {
        return Ok(FeatureFlags::all(true));
    }
    if disable == ALL || enable.is_empty() {
        return Ok(FeatureFlags::all(false));
    }

    let (items, mut flags) = if enable != NONE {
        (enable, FeatureFlags::all(false))
    } else {
        (disable, FeatureFlags::all(true))
    };
    for item in items.split(',') {
        match flags.0.get_mut(item) {
            Some(v) => *v = !*v,
            None => return Err(FeaturesError::Unknown(item.to_string())),
        }
    }
    Ok(flags)
}

/// Executor env flags for the selected feature flags.
///
/// `tun` and `net_dev` need support of the host, others are always forwarded.
pub fn env_flags(flags: &FeatureFlags, features: Features) -> EnvFlags {
    let mut env = 0;
    if flags.enabled("tun") && features & FEATURE_NET_INJECTION != 0 {
        env |= FLAG_ENABLE_TUN;
    }
    if flags.enabled("net_dev") && features & FEATURE_NET_DEVICES != 0 {
        env |= FLAG_ENABLE_NETDEV;
    }
    if flags.enabled("net_reset") {
        env |= FLAG_ENABLE_NETRESET;
    }
    if flags.enabled("cgroups") {
        env |= FLAG_ENABLE_CGROUPS;
    }
    if flags.enabled("binfmt_misc") {
        env |= FLAG_ENABLE_BINFMT_MISC;
    }
    if flags.enabled("close_fds") {
        env |= FLAG_ENABLE_CLOSEFDS;
    }
    env
}

/// Log enabled host features.
pub fn log_features(features: Features) {
    for (i, feature) in FEATURES_NAME.iter().enumerate() {
        if features & (1 << i) != 0 {
            log::info!("{:<28}: enabled", feature);
        }
    }
}
