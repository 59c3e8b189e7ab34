use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while provisioning manifest files.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Timeout, connection error, non-success status or short body.
    /// Recovered locally by writing the fallback body.
    #[error("fetch of {url} failed: {reason}")]
    Network { url: String, reason: String },

    /// A directory or file under the install root could not be written.
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The install root itself could not be created or cleared.
    #[error("cannot prepare install root {}: {source}", path.display())]
    RootCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub fn network(url: &str, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.to_owned(),
            reason: reason.into(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

/// Problems with a manifest definition.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid relative path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("duplicate manifest path {0}")]
    DuplicatePath(String),

    #[error("failed to read manifest {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_keeps_io_source() {
        use std::error::Error as _;

        let err = ProvisionError::write("/x/a", std::io::Error::other("denied"));
        assert_eq!(err.to_string(), "cannot write /x/a: denied");
        assert!(err.source().is_some());
    }

    #[test]
    fn network_error_names_url() {
        let err = ProvisionError::network("http://bad.invalid/x", "status 404");
        assert_eq!(
            err.to_string(),
            "fetch of http://bad.invalid/x failed: status 404"
        );
    }
}
