//! certauthz - certificate-scope authorization for service-to-service calls
//!
//! Serves, issues credentials for, and calls endpoints protected by
//! signed requests, bearer tokens or mutual TLS.

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use certauthz::{
    cert::issuer::{self, CaParams, KeySize, LeafParams},
    cli::{AuthMethod, Cli, Command, IssueCommand, RequestArgs, ServeArgs},
    client::AuthClient,
    config::Config,
    credentials::CredentialDir,
    keys::PrivateKey,
    scope::Scopes,
    server::Server,
    setup_tracing,
    token::TokenIssuer,
};

const HOUR: Duration = Duration::from_secs(3_600);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Issue(cmd)) => match run_issue(cmd) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("❌ {e:#}");
                ExitCode::FAILURE
            }
        },
        Some(Command::Request(args)) => match run_request(args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("❌ {e:#}");
                ExitCode::FAILURE
            }
        },
        Some(Command::Serve(args)) => run_server(cli.config.as_deref(), args).await,
        None => run_server(cli.config.as_deref(), ServeArgs::default()).await,
    }
}

/// Run the authorization server
async fn run_server(config_path: Option<&Path>, args: ServeArgs) -> ExitCode {
    let mut config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.mtls {
        config.server.mtls = true;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mtls = config.server.mtls,
        credentials = %config.credentials.path.display(),
        "Starting certauthz"
    );

    match Server::new(config).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_startup_fatal() => {
            error!("Refusing to start: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Server error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Write credentials for one issuance subcommand
fn run_issue(cmd: IssueCommand) -> anyhow::Result<()> {
    match cmd {
        IssueCommand::Ca {
            path,
            name,
            common_name,
            organization,
            key_size,
            expiration_hours,
            serial_number,
        } => {
            let dir = CredentialDir::new(&path, &name);
            let pair = issuer::generate_key_pair(KeySize::from_bits(key_size)?)?;
            let key = PrivateKey::from_pkcs8_der(pair.private_der())?;
            let der = issuer::issue_ca(
                &key,
                &CaParams {
                    common_name,
                    organization,
                    serial: serial_number.unwrap_or_else(issuer::date_serial),
                    validity: HOUR * u32::try_from(expiration_hours).context("expiration too large")?,
                },
            )?;
            dir.write_private_key(pair.private_der())?;
            dir.write_public_key(pair.public_der())?;
            let cert_path = dir.write_ca_certificate(&der)?;
            println!("✅ CA certificate written to {}", cert_path.display());
        }

        IssueCommand::Client {
            path,
            name,
            key_size,
        } => {
            let dir = CredentialDir::new(&path, &name);
            let pair = issuer::generate_key_pair(KeySize::from_bits(key_size)?)?;
            dir.write_private_key(pair.private_der())?;
            dir.write_public_key(pair.public_der())?;
            println!("✅ Key pair written to {}", dir.path().display());
        }

        IssueCommand::Cert {
            path,
            ca_name,
            client_name,
            org,
            scopes,
            dns,
            expiration_hours,
            serial_number,
        } => {
            let ca = CredentialDir::new(&path, &ca_name);
            let client = CredentialDir::new(&path, &client_name);
            let ca_cert = ca.ca_certificate()?;
            let der = issuer::issue_leaf(
                ca_cert.der(),
                &ca.private_key()?,
                &client.public_key()?,
                &LeafParams {
                    name: client_name.clone(),
                    organization: org,
                    scopes: Scopes::decode(scopes.as_bytes()),
                    dns_names: dns,
                    serial: serial_number.unwrap_or_else(issuer::leaf_serial),
                    validity: HOUR * u32::try_from(expiration_hours).context("expiration too large")?,
                },
            )?;
            let cert_path = client.write_certificate(&der)?;
            println!("✅ Certificate for {client_name} written to {}", cert_path.display());
        }

        IssueCommand::Token {
            path,
            primary_name,
            client_name,
            scopes,
            audience,
            expiration_hours,
        } => {
            let primary = CredentialDir::new(&path, &primary_name);
            let token = TokenIssuer::new(&primary.private_key()?).issue(
                &client_name,
                &audience,
                &Scopes::decode(scopes.as_bytes()),
                HOUR * u32::try_from(expiration_hours).context("expiration too large")?,
            )?;
            let token_path = CredentialDir::new(&path, &client_name).write_token(&token)?;
            println!("✅ Token for {client_name} written to {}", token_path.display());
        }
    }
    Ok(())
}

/// Send one authenticated request and print the response
async fn run_request(args: RequestArgs) -> anyhow::Result<()> {
    let primary = CredentialDir::new(&args.path, &args.primary_name);
    let caller = CredentialDir::new(&args.path, &args.client_name);

    let client = match args.auth_method {
        AuthMethod::Cert => AuthClient::signed(&caller.certificate()?, caller.private_key()?)?,
        AuthMethod::Token => AuthClient::bearer(caller.token()?)?,
        AuthMethod::Mtls => AuthClient::mutual_tls(
            &primary.ca_certificate()?,
            &caller.certificate()?,
            &caller.private_key()?,
        )?,
    };

    let url = format!(
        "{}{}",
        args.server_addr.trim_end_matches('/'),
        args.auth_method.route()
    );
    let reply = client
        .get(&url)
        .await
        .with_context(|| format!("request to {url} failed"))?;
    println!("Response from server ({}): {}", reply.status, reply.body);
    Ok(())
}
