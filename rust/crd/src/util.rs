use snafu::{ensure, OptionExt, Snafu};

pub const RELEASE_IMAGE_REPOSITORY: &str = "quay.io/openshift-release-dev/ocp-release";

const MIN_BACKOFF_LIMIT: u32 = 1;
const MAX_BACKOFF_LIMIT: u32 = 100;

#[derive(Snafu, Debug, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("resource path {path:?} must be of the form <namespace>/<name>"))]
    InvalidResourcePath { path: String },
}

/// Splits a `<namespace>/<name>` reference; both parts must be non-empty.
pub fn path_split(path: &str) -> Result<(&str, &str), Error> {
    let (namespace, name) = path
        .split_once('/')
        .context(InvalidResourcePathSnafu { path })?;
    ensure!(
        !namespace.is_empty() && !name.is_empty() && !name.contains('/'),
        InvalidResourcePathSnafu { path }
    );
    Ok((namespace, name))
}

/// Parses the ClusterVersion update retry budget from its annotation value.
///
/// Missing or unparsable values mean a single attempt; anything else is clamped
/// to `[1, 100]`.
pub fn clamp_backoff_limit(value: Option<&str>) -> u32 {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|limit| limit.clamp(MIN_BACKOFF_LIMIT.into(), MAX_BACKOFF_LIMIT.into()) as u32)
        .unwrap_or(MIN_BACKOFF_LIMIT)
}

/// The multi-arch release image for an OpenShift version.
pub fn release_image(version: &str) -> String {
    format!("{RELEASE_IMAGE_REPOSITORY}:{version}-multi")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("")]
    #[case("a")]
    #[case("/b")]
    #[case("a/")]
    #[case("a/b/c")]
    fn path_split_rejects_malformed(#[case] path: &str) {
        assert_eq!(
            path_split(path),
            Err(Error::InvalidResourcePath {
                path: path.to_string()
            })
        );
    }

    #[test]
    fn path_split_accepts_namespace_and_name() {
        assert_eq!(path_split("a/b"), Ok(("a", "b")));
        assert_eq!(path_split("default/aws-creds"), Ok(("default", "aws-creds")));
    }

    #[rstest]
    #[case(Some("0"), 1)]
    #[case(Some("-5"), 1)]
    #[case(Some("101"), 100)]
    #[case(Some("7"), 7)]
    #[case(Some("100"), 100)]
    #[case(Some("garbage"), 1)]
    #[case(None, 1)]
    fn backoff_limit_is_clamped(#[case] value: Option<&str>, #[case] expected: u32) {
        assert_eq!(clamp_backoff_limit(value), expected);
    }

    #[test]
    fn release_image_is_multi_arch() {
        assert_eq!(
            release_image("4.14.0"),
            "quay.io/openshift-release-dev/ocp-release:4.14.0-multi"
        );
    }
}
