//! RPC client and client-side input checks.

use std::fs;
use std::path::{Path, PathBuf};

use lswitch_registry::{LinkerSwitchRequest, LinkerSwitchResponse};
use thiserror::Error;
use tracing::debug;

/// Errors raised before or while talking to lswitchd.
#[derive(Debug, Error)]
pub enum CliError {
    /// The config path does not name a readable file.
    #[error("Not a valid filename: {}", .path.display())]
    InvalidFile {
        /// The path given on the command line.
        path: PathBuf,
    },

    /// The config file is not JSON.
    #[error("Not a valid JSON file: {}: {message}", .path.display())]
    InvalidJson {
        /// The path given on the command line.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The request could not be delivered or the reply decoded.
    #[error("RPC to {url} failed: {source}")]
    Transport {
        /// Endpoint URL.
        url: String,
        /// Underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },
}

/// Reads a program config file and checks it parses as JSON.
///
/// lswitchd validates again on its side; this only catches operator typos
/// before anything goes on the wire.
pub fn read_program_config(path: &Path) -> Result<String, CliError> {
    if !path.is_file() {
        return Err(CliError::InvalidFile {
            path: path.to_path_buf(),
        });
    }

    let text = fs::read_to_string(path).map_err(|_| CliError::InvalidFile {
        path: path.to_path_buf(),
    })?;

    serde_json::from_str::<serde_json::Value>(&text).map_err(|e| CliError::InvalidJson {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(text)
}

/// HTTP client for the lswitchd RPC endpoint.
#[derive(Debug, Clone)]
pub struct LinkerSwitchClient {
    http: reqwest::Client,
    url: String,
}

impl LinkerSwitchClient {
    /// Creates a client for the server at `server` (e.g. `http://127.0.0.1:9091`).
    pub fn new(server: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/rpc", server.trim_end_matches('/')),
        }
    }

    /// Returns the RPC endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends `request` and decodes the reply.
    ///
    /// Non-2xx replies still carry a response body with a status code.
    pub async fn call(
        &self,
        request: &LinkerSwitchRequest,
    ) -> Result<LinkerSwitchResponse, CliError> {
        debug!(method = request.method(), url = %self.url, "Sending request");

        let transport = |source| CliError::Transport {
            url: self.url.clone(),
            source,
        };

        self.http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(transport)?
            .json::<LinkerSwitchResponse>()
            .await
            .map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_program_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"header_types": []}}"#).unwrap();

        assert_eq!(
            read_program_config(file.path()).unwrap(),
            r#"{"header_types": []}"#
        );
    }

    #[test]
    fn test_read_program_config_missing_file() {
        let err = read_program_config(Path::new("/nonexistent/router.json")).unwrap_err();
        assert!(matches!(err, CliError::InvalidFile { .. }));
        assert_eq!(err.to_string(), "Not a valid filename: /nonexistent/router.json");

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_program_config(dir.path()),
            Err(CliError::InvalidFile { .. })
        ));
    }

    #[test]
    fn test_read_program_config_not_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not-json").unwrap();

        assert!(matches!(
            read_program_config(file.path()),
            Err(CliError::InvalidJson { .. })
        ));
    }

    #[test]
    fn test_client_url() {
        assert_eq!(
            LinkerSwitchClient::new("http://127.0.0.1:9091/").url(),
            "http://127.0.0.1:9091/rpc"
        );
        assert_eq!(
            LinkerSwitchClient::new("http://switch:7000").url(),
            "http://switch:7000/rpc"
        );
    }
}
