//! Endpoint path normalization.
//!
//! Shared by endpoint registration and settings validation so both agree on
//! when two paths name the same endpoint.

/// Normalize a registered endpoint path.
///
/// Adds a leading `/`, collapses runs of `/`, removes a trailing `/`, and
/// maps the empty path to `/`.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_leading_slash() {
        assert_eq!(normalize_path("monitor"), "/monitor");
    }

    #[test]
    fn strips_trailing_slash() {
        assert_eq!(normalize_path("/monitor/"), "/monitor");
        assert_eq!(normalize_path("/monitor///"), "/monitor");
    }

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(normalize_path("//signage//monitor"), "/signage/monitor");
    }

    #[test]
    fn empty_and_root() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("///"), "/");
    }

    #[test]
    fn already_normal_is_unchanged() {
        assert_eq!(normalize_path("/a/b"), "/a/b");
    }
}
