//! Version information for machina

/// Current on-disk host record schema version.
///
/// Records written with a lower version are migrated on load; records with a
/// higher version are refused.
pub const CONFIG_VERSION: u32 = 3;

/// Get the current version string
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Get the long version string with build information
///
/// Returns version plus build metadata when available (git commit, build date)
/// and the host record schema version this binary writes.
pub fn get_version_long() -> String {
    let version = get_version();

    // Set by CI or packaging scripts, absent in local builds
    let git_hash = option_env!("MACHINA_GIT_HASH").unwrap_or("unknown");
    let build_date = option_env!("MACHINA_BUILD_DATE").unwrap_or("unknown");

    format!("{version} (git: {git_hash}, built: {build_date}, config schema: v{CONFIG_VERSION})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_version_returns_valid_semver() {
        let version = get_version();
        assert!(!version.is_empty());
        let parts: Vec<&str> = version.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
    }

    #[test]
    fn test_get_version_long_contains_version_and_schema() {
        let long = get_version_long();
        assert!(long.contains(&get_version()));
        assert!(long.contains(&format!("v{CONFIG_VERSION}")));
    }
}
