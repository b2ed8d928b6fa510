//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Certificate-scope authorization for service-to-service calls
#[derive(Parser, Debug)]
#[command(name = "certauthz")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(long, env = "CERTAUTHZ_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CERTAUTHZ_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CERTAUTHZ_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the authorization server (default)
    Serve(ServeArgs),

    /// Issue credentials into the credentials directory
    #[command(subcommand)]
    Issue(IssueCommand),

    /// Send one authenticated request and print the response
    Request(RequestArgs),
}

/// Server overrides
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(long, env = "CERTAUTHZ_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "CERTAUTHZ_PORT")]
    pub port: Option<u16>,

    /// Serve the mutual-TLS scheme instead of signed-request and token routes
    #[arg(long)]
    pub mtls: bool,
}

/// Credential issuance subcommands
#[derive(Subcommand, Debug)]
pub enum IssueCommand {
    /// Create a certificate authority: key pair plus self-signed certificate
    Ca {
        /// Credentials path
        #[arg(short, long, default_value = "../credentials")]
        path: PathBuf,

        /// CA identifier (directory name)
        #[arg(short, long, default_value = "primary")]
        name: String,

        /// CA common name
        #[arg(short, long, default_value = "Primary CA")]
        common_name: String,

        /// CA organization
        #[arg(short, long, default_value = "RedRad")]
        organization: String,

        /// RSA key size in bits (2048, 3072, 4096)
        #[arg(short, long, default_value_t = 2048)]
        key_size: u32,

        /// Certificate lifetime in hours
        #[arg(short, long, default_value_t = 8760)]
        expiration_hours: u64,

        /// Serial number; defaults to today's date as YYYYMMDD
        #[arg(short, long)]
        serial_number: Option<u64>,
    },

    /// Create a client key pair
    Client {
        /// Credentials path
        #[arg(short, long, default_value = "../credentials")]
        path: PathBuf,

        /// Client name (directory name)
        #[arg(short, long, default_value = "alice")]
        name: String,

        /// RSA key size in bits (2048, 3072, 4096)
        #[arg(short, long, default_value_t = 2048)]
        key_size: u32,
    },

    /// Issue a client certificate carrying scopes, signed by the CA
    Cert {
        /// Credentials path
        #[arg(short, long, default_value = "../credentials")]
        path: PathBuf,

        /// CA identifier
        #[arg(short = 'a', long, default_value = "primary")]
        ca_name: String,

        /// Client name
        #[arg(short, long, default_value = "alice")]
        client_name: String,

        /// Certificate organization
        #[arg(short, long, default_value = "RedRad")]
        org: String,

        /// Client scopes, separated by space
        #[arg(short, long, default_value = "bob.user.read bob.user.write")]
        scopes: String,

        /// Certificate DNS names
        #[arg(short, long, default_values_t = vec!["localhost".to_string()])]
        dns: Vec<String>,

        /// Certificate lifetime in hours
        #[arg(short, long, default_value_t = 8760)]
        expiration_hours: u64,

        /// Serial number; defaults to YYYYMMDD followed by a random 1xx suffix
        #[arg(short = 'n', long)]
        serial_number: Option<u64>,
    },

    /// Issue a bearer token signed by the CA key
    Token {
        /// Credentials path
        #[arg(short, long, default_value = "../credentials")]
        path: PathBuf,

        /// Primary identifier holding the signing key
        #[arg(short = 'a', long, default_value = "primary")]
        primary_name: String,

        /// Client identifier
        #[arg(short, long, default_value = "alice")]
        client_name: String,

        /// Scopes, separated by space
        #[arg(short, long, default_value = "bob.user.read bob.user.write")]
        scopes: String,

        /// Audience client identifier
        #[arg(short = 'd', long, default_value = "bob")]
        audience: String,

        /// Token lifetime in hours
        #[arg(short, long, default_value_t = 864_000)]
        expiration_hours: u64,
    },
}

/// Authentication scheme for `request`
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    /// Signed request with certificate header (`/cert`)
    Cert,
    /// Bearer token (`/token`)
    Token,
    /// Mutual TLS (`/`)
    Mtls,
}

/// Outbound request options
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Authorization method
    #[arg(long, value_enum, default_value = "cert")]
    pub auth_method: AuthMethod,

    /// Server address; use https:// for mtls
    #[arg(long, default_value = "http://localhost:8585")]
    pub server_addr: String,

    /// Primary name holding the CA certificate
    #[arg(long, default_value = "primary")]
    pub primary_name: String,

    /// Client name
    #[arg(long, default_value = "alice")]
    pub client_name: String,

    /// Credentials path
    #[arg(long, default_value = "../credentials")]
    pub path: PathBuf,
}

impl AuthMethod {
    /// Route served for this scheme.
    #[must_use]
    pub fn route(self) -> &'static str {
        match self {
            Self::Cert => "/cert",
            Self::Token => "/token",
            Self::Mtls => "/",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_defaults_to_none() {
        let cli = Cli::parse_from(["certauthz"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn issue_cert_defaults() {
        let cli = Cli::parse_from(["certauthz", "issue", "cert"]);
        let Some(Command::Issue(IssueCommand::Cert {
            ca_name,
            client_name,
            scopes,
            dns,
            expiration_hours,
            ..
        })) = cli.command
        else {
            panic!("expected issue cert");
        };
        assert_eq!(ca_name, "primary");
        assert_eq!(client_name, "alice");
        assert_eq!(scopes, "bob.user.read bob.user.write");
        assert_eq!(dns, vec!["localhost"]);
        assert_eq!(expiration_hours, 8760);
    }

    #[test]
    fn request_parses_auth_method() {
        let cli = Cli::parse_from(["certauthz", "request", "--auth-method", "mtls"]);
        let Some(Command::Request(args)) = cli.command else {
            panic!("expected request");
        };
        assert_eq!(args.auth_method, AuthMethod::Mtls);
        assert_eq!(args.auth_method.route(), "/");
    }

    #[test]
    fn serve_flags() {
        let cli = Cli::parse_from(["certauthz", "serve", "--port", "9000", "--mtls"]);
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, Some(9000));
        assert!(args.mtls);
    }
}
