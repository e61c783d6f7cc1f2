//! Transports backed by an external command-line tool.
//!
//! Arguments are templates. The placeholders `{url}`, `{source_path}`,
//! `{target}`, `{start}`, `{end}` and `{length}` are substituted per request;
//! an argument that expands to nothing is dropped.
//!
//! `credential_args` may also use `{cert}` and `{ca_dir}`, taken from
//! `X509_USER_PROXY` and `X509_CERT_DIR`. The group is passed only when every
//! credential it names is set.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use super::traits::{TransferRequest, Transport};
use crate::{Error, Result};

/// Description of one external transfer command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTransportConfig {
    /// Executable to run.
    pub program: String,
    /// Leading arguments, always passed.
    pub args: Vec<String>,
    /// Passed when resuming (`start > 0`).
    pub resume_args: Vec<String>,
    /// Passed when the request has a known end beyond the start.
    pub range_args: Vec<String>,
    /// Passed when the X.509 credentials they reference are available.
    pub credential_args: Vec<String>,
    /// Passed last, typically source and destination.
    pub trailing_args: Vec<String>,
    /// Whether the tool can continue a partial file.
    pub supports_resume: bool,
}

impl Default for CommandTransportConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            resume_args: Vec::new(),
            range_args: Vec::new(),
            credential_args: Vec::new(),
            trailing_args: vec!["{url}".to_string(), "{target}".to_string()],
            supports_resume: true,
        }
    }
}

/// Environment variable holding the user proxy certificate (and key).
pub const CERT_ENV: &str = "X509_USER_PROXY";
/// Environment variable holding the trusted CA directory.
pub const CA_DIR_ENV: &str = "X509_CERT_DIR";

/// X.509 credentials used by transports that authenticate to data nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub cert: Option<String>,
    pub ca_dir: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v: &String| !v.is_empty());
        Self {
            cert: var(CERT_ENV),
            ca_dir: var(CA_DIR_ENV),
        }
    }

    /// Whether every credential placeholder in `templates` can be filled.
    fn satisfies(&self, templates: &[String]) -> bool {
        let uses = |placeholder| templates.iter().any(|t| t.contains(placeholder));
        (!uses("{cert}") || self.cert.is_some()) && (!uses("{ca_dir}") || self.ca_dir.is_some())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl CommandTransportConfig {
    /// A command with the given program and default trailing arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = strings(args);
        self
    }

    pub fn with_resume_args(mut self, args: &[&str]) -> Self {
        self.resume_args = strings(args);
        self
    }

    pub fn with_range_args(mut self, args: &[&str]) -> Self {
        self.range_args = strings(args);
        self
    }

    pub fn with_trailing_args(mut self, args: &[&str]) -> Self {
        self.trailing_args = strings(args);
        self
    }

    pub fn with_credential_args(mut self, args: &[&str]) -> Self {
        self.credential_args = strings(args);
        self
    }

    pub fn without_resume(mut self) -> Self {
        self.supports_resume = false;
        self
    }

    /// GridFTP copy with partial-file support.
    pub fn globus_url_copy() -> Self {
        Self::new("globus-url-copy")
            .with_args(&["-binary", "-q", "-tcp-bs", "5242880"])
            .with_resume_args(&["-partial-offset", "{start}"])
            .with_range_args(&["-partial-length", "{length}"])
    }

    /// HTTP, HTTPS and FTP fetches through wget. wget cannot stop at an end offset.
    pub fn wget() -> Self {
        Self::new("wget")
            .with_args(&["--progress=dot"])
            .with_credential_args(&[
                "--certificate",
                "{cert}",
                "--private-key",
                "{cert}",
                "--ca-directory",
                "{ca_dir}",
            ])
            .with_resume_args(&["-c"])
            .with_trailing_args(&["{url}", "-O", "{target}"])
    }

    /// SFTP through scp, which always rewrites the whole file.
    pub fn scp() -> Self {
        Self::new("scp").with_args(&["-q"]).without_resume()
    }

    /// Local copy. A partial target cannot be continued.
    pub fn local_copy() -> Self {
        Self::new("cp")
            .with_trailing_args(&["{source_path}", "{target}"])
            .without_resume()
    }

    /// Expand the full argument list for a request.
    pub fn expand_args(&self, request: &TransferRequest, credentials: &Credentials) -> Vec<String> {
        let mut templates: Vec<&String> = self.args.iter().collect();
        if !self.credential_args.is_empty() {
            if credentials.satisfies(&self.credential_args) {
                templates.extend(self.credential_args.iter());
            } else {
                debug!(
                    program = %self.program,
                    "X.509 credentials not set, running without them"
                );
            }
        }
        if request.is_resume() {
            templates.extend(self.resume_args.iter());
        }
        if request.has_range() {
            templates.extend(self.range_args.iter());
        }
        templates.extend(self.trailing_args.iter());

        templates
            .into_iter()
            .map(|template| expand(template, request, credentials))
            .filter(|arg| !arg.is_empty())
            .collect()
    }
}

/// Local path of a source URL: the path of a `file://` URL, the input otherwise.
pub fn source_path(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        if parsed.scheme() == "file" {
            if let Ok(path) = parsed.to_file_path() {
                return path.to_string_lossy().into_owned();
            }
        }
    }
    url.strip_prefix("file://").unwrap_or(url).to_string()
}

fn expand(template: &str, request: &TransferRequest, credentials: &Credentials) -> String {
    let opt = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_default();
    template
        .replace("{cert}", credentials.cert.as_deref().unwrap_or_default())
        .replace("{ca_dir}", credentials.ca_dir.as_deref().unwrap_or_default())
        .replace("{url}", &request.url)
        .replace("{source_path}", &source_path(&request.url))
        .replace("{target}", &request.target_path.to_string_lossy())
        .replace("{start}", &request.start.to_string())
        .replace("{end}", &opt(request.end))
        .replace("{length}", &opt(request.length()))
}

/// A [`Transport`] that runs an external command.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    name: String,
    config: CommandTransportConfig,
}

impl CommandTransport {
    pub fn new(name: impl Into<String>, config: CommandTransportConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn config(&self) -> &CommandTransportConfig {
        &self.config
    }
}

impl Transport for CommandTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn command(&self, request: &TransferRequest) -> Result<Command> {
        if self.config.program.is_empty() {
            return Err(Error::config(format!(
                "transport '{}' has no program configured",
                self.name
            )));
        }
        if request.is_resume() && !self.config.supports_resume {
            return Err(Error::transport(format!(
                "{} cannot resume {} at byte {}",
                self.name,
                request.target_path.display(),
                request.start
            )));
        }

        let mut cmd = process_utils::tokio_command(&self.config.program);
        cmd.args(self.config.expand_args(request, &Credentials::from_env()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_globus_args_fresh_and_resumed() {
        let config = CommandTransportConfig::globus_url_copy();
        let none = Credentials::default();

        let fresh = TransferRequest::new("gsiftp://h:2812/a.nc", "/t/a.nc", 0, Some(1000));
        assert_eq!(
            config.expand_args(&fresh, &none),
            vec![
                "-binary",
                "-q",
                "-tcp-bs",
                "5242880",
                "-partial-length",
                "1000",
                "gsiftp://h:2812/a.nc",
                "/t/a.nc"
            ]
        );

        let resumed = TransferRequest::new("gsiftp://h:2812/a.nc", "/t/a.nc", 400, Some(1000));
        let args = config.expand_args(&resumed, &none);
        assert!(args.windows(2).any(|w| w == ["-partial-offset", "400"]));
        assert!(args.windows(2).any(|w| w == ["-partial-length", "600"]));
    }

    #[test]
    fn test_wget_args() {
        let config = CommandTransportConfig::wget();
        let request = TransferRequest::new("http://h/a.nc", "/t/a.nc", 10, Some(20));
        assert_eq!(
            config.expand_args(&request, &Credentials::default()),
            vec!["--progress=dot", "-c", "http://h/a.nc", "-O", "/t/a.nc"]
        );
    }

    #[test]
    fn test_wget_passes_credentials_when_set() {
        let config = CommandTransportConfig::wget();
        let request = TransferRequest::new("https://h/a.nc", "/t/a.nc", 0, Some(20));
        let credentials = Credentials {
            cert: Some("/tmp/x509up_u1000".to_string()),
            ca_dir: Some("/etc/grid-security/certificates".to_string()),
        };
        assert_eq!(
            config.expand_args(&request, &credentials),
            vec![
                "--progress=dot",
                "--certificate",
                "/tmp/x509up_u1000",
                "--private-key",
                "/tmp/x509up_u1000",
                "--ca-directory",
                "/etc/grid-security/certificates",
                "https://h/a.nc",
                "-O",
                "/t/a.nc"
            ]
        );

        let cert_only = Credentials {
            cert: Some("/tmp/x509up_u1000".to_string()),
            ca_dir: None,
        };
        assert!(
            !config
                .expand_args(&request, &cert_only)
                .contains(&"--certificate".to_string())
        );
    }

    #[test]
    fn test_credential_group_only_needs_referenced_values() {
        let config = CommandTransportConfig::new("tool").with_credential_args(&["--cert={cert}"]);
        let request = TransferRequest::new("http://h/a.nc", "/t/a.nc", 0, None);
        let credentials = Credentials {
            cert: Some("/p".to_string()),
            ca_dir: None,
        };
        assert_eq!(
            config.expand_args(&request, &credentials),
            vec!["--cert=/p", "http://h/a.nc", "/t/a.nc"]
        );
    }

    #[test]
    fn test_empty_expansion_is_dropped() {
        let config = CommandTransportConfig::new("tool").with_args(&["{end}", "--fixed"]);
        let request = TransferRequest::new("http://h/a.nc", "/t/a.nc", 0, None);
        assert_eq!(
            config.expand_args(&request, &Credentials::default()),
            vec!["--fixed", "http://h/a.nc", "/t/a.nc"]
        );
    }

    #[test]
    fn test_source_path() {
        assert_eq!(source_path("file:///data/in/a.nc"), "/data/in/a.nc");
        assert_eq!(source_path("/data/in/a.nc"), "/data/in/a.nc");
    }

    #[test]
    fn test_local_copy_refuses_resume() {
        let transport = CommandTransport::new("file", CommandTransportConfig::local_copy());
        let request = TransferRequest::new("file:///s/a.nc", "/t/a.nc", 5, Some(10));
        assert!(matches!(transport.command(&request), Err(Error::Transport(_))));

        let request = TransferRequest::new("file:///s/a.nc", "/t/a.nc", 0, Some(10));
        assert!(transport.command(&request).is_ok());
    }

    #[test]
    fn test_missing_program_is_config_error() {
        let transport = CommandTransport::new("broken", CommandTransportConfig::default());
        let request = TransferRequest::new("x://h/a", "/t/a", 0, None);
        assert!(matches!(transport.command(&request), Err(Error::Configuration(_))));
    }
}
