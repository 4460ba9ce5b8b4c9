use semver::Version;
use tracing::warn;

/// Whether a worker running `worker_version` may execute a command that
/// requires at least `min_worker_version`.
///
/// No requirement means any worker will do. A requirement or worker version
/// that does not parse as semver is treated as incompatible.
pub fn worker_is_compatible(min_worker_version: Option<&str>, worker_version: &str) -> bool {
    let Some(required) = min_worker_version else {
        return true;
    };

    let required = match Version::parse(required.trim()) {
        Ok(v) => v,
        Err(e) => {
            warn!(required = %required, error = %e, "Unparsable min_worker_version");
            return false;
        }
    };
    match Version::parse(worker_version.trim()) {
        Ok(current) => current >= required,
        Err(e) => {
            warn!(worker_version = %worker_version, error = %e, "Unparsable worker version");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_requirement_is_always_compatible() {
        assert!(worker_is_compatible(None, "0.1.0"));
    }

    #[test]
    fn compares_semver_ordering() {
        assert!(worker_is_compatible(Some("0.1.0"), "0.1.0"));
        assert!(worker_is_compatible(Some("0.1.0"), "0.2.3"));
        assert!(!worker_is_compatible(Some("1.0.0"), "0.9.9"));
        assert!(worker_is_compatible(Some("0.10.0"), "0.10.1"));
    }

    #[test]
    fn garbage_requirement_is_incompatible() {
        assert!(!worker_is_compatible(Some("latest"), "0.1.0"));
    }
}
