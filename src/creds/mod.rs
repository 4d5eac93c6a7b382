//! Credential bootstrapping for the S3 client.
//!
//! By default the standard AWS provider chain is used. When an MFA device
//! and/or role is configured, temporary credentials are exchanged through
//! STS first and handed to the S3 client directly; nothing is exported to
//! the process environment.
use regex::Regex;
use rusoto_core::credential::{ChainProvider, StaticProvider};
use rusoto_core::{region::Region, HttpClient};
use rusoto_s3::S3Client;
use rusoto_sts::*;

use std::io::{self, BufRead, Write};
use std::time::Duration;

use crate::types::UtilResult;

/// Session name used for role assumption when none is provided.
pub const DEFAULT_SESSION_NAME: &str = "s3-log-fetch";

/// Credential related configuration, gathered once from the CLI.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialConfig {
    /// Serial number (or ARN) of the MFA device.
    pub mfa_serial: Option<String>,
    /// ARN of the role to assume before fetching.
    pub role_arn: Option<String>,
    pub session_name: String,
    /// Lifetime requested for the temporary credentials, in seconds.
    pub duration: Option<i64>,
    /// Code for the session token exchange; prompted when absent.
    pub mfa_code: Option<String>,
    /// Code for the role assumption; prompted when absent.
    pub role_mfa_code: Option<String>,
}

/// Short-lived credentials issued by STS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: String,
}

impl TemporaryCredentials {
    /// Creates a provider which only ever yields these credentials.
    pub fn provider(&self) -> StaticProvider {
        StaticProvider::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            Some(self.session_token.clone()),
            None,
        )
    }
}

impl From<Credentials> for TemporaryCredentials {
    fn from(creds: Credentials) -> Self {
        Self {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: creds.session_token,
            expiration: creds.expiration,
        }
    }
}

/// Constructs the S3 client based on the provided configuration.
pub async fn connect(config: &CredentialConfig) -> UtilResult<S3Client> {
    // region is resolved from the environment
    let region = Region::default();
    let mut temporary = None;

    // exchange an MFA code for session credentials
    if let Some(serial) = &config.mfa_serial {
        let code = code_or_prompt(&config.mfa_code, "MFA code for session token")?;
        temporary = Some(session_token(config, serial, code, region.clone()).await?);
    }

    // assume the role, on top of the session when there is one
    if let Some(role) = &config.role_arn {
        let code = match &config.mfa_serial {
            Some(_) => Some(code_or_prompt(&config.role_mfa_code, "MFA code for role")?),
            None => None,
        };
        temporary = Some(assume_role(config, role, code, temporary.as_ref(), region.clone()).await?);
    }

    // create client options
    let client = HttpClient::new()?;

    // temporary credentials are handed straight to the client
    match temporary {
        Some(creds) => {
            info!("Using temporary credentials valid until {}", creds.expiration);
            Ok(S3Client::new_with(client, creds.provider(), region))
        }
        None => Ok(S3Client::new_with(client, chain(), region)),
    }
}

/// Creates the default provider chain with a short timeout.
fn chain() -> ChainProvider {
    let mut chain = ChainProvider::new();
    chain.set_timeout(Duration::from_millis(500));
    chain
}

/// Exchanges an MFA code for a session token using the default chain.
async fn session_token(
    config: &CredentialConfig,
    serial: &str,
    code: String,
    region: Region,
) -> UtilResult<TemporaryCredentials> {
    debug!("Requesting session token for {}", serial);

    // the session token is always signed with the default chain
    let sts = StsClient::new_with(HttpClient::new()?, chain(), region);
    let request = GetSessionTokenRequest {
        duration_seconds: config.duration,
        serial_number: Some(serial.to_string()),
        token_code: Some(code),
        ..GetSessionTokenRequest::default()
    };

    // execute the request, a response without credentials is useless
    let response = sts.get_session_token(request).await?;

    response
        .credentials
        .map(TemporaryCredentials::from)
        .ok_or_else(|| "STS returned no session credentials".into())
}

/// Assumes a role, signed with session credentials when available.
async fn assume_role(
    config: &CredentialConfig,
    role: &str,
    code: Option<String>,
    session: Option<&TemporaryCredentials>,
    region: Region,
) -> UtilResult<TemporaryCredentials> {
    info!("Assuming role {}...", role);

    // sign with the session credentials if we have them
    let dispatcher = HttpClient::new()?;
    let sts = match session {
        Some(creds) => StsClient::new_with(dispatcher, creds.provider(), region),
        None => StsClient::new_with(dispatcher, chain(), region),
    };

    let request = AssumeRoleRequest {
        role_arn: role.to_string(),
        role_session_name: config.session_name.clone(),
        duration_seconds: config.duration,
        serial_number: code.as_ref().and(config.mfa_serial.clone()),
        token_code: code,
        ..AssumeRoleRequest::default()
    };

    // execute the request and unpack the credentials
    let response = sts.assume_role(request).await?;

    response
        .credentials
        .map(TemporaryCredentials::from)
        .ok_or_else(|| format!("STS returned no credentials for role {}", role).into())
}

/// Returns a provided code, or prompts for one on the terminal.
fn code_or_prompt(code: &Option<String>, label: &str) -> UtilResult<String> {
    match code {
        Some(code) => validate_code(code),
        None => {
            let stdin = io::stdin();
            let stderr = io::stderr();
            read_code(&mut stdin.lock(), &mut stderr.lock(), label)
        }
    }
}

/// Reads a single MFA code from `input`, writing a prompt to `output`.
fn read_code<R, W>(input: &mut R, output: &mut W, label: &str) -> UtilResult<String>
where
    R: BufRead,
    W: Write,
{
    // prompt without a newline, so the code is typed inline
    write!(output, "{}: ", label)?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(format!("No input provided for {}", label).into());
    }

    validate_code(&line)
}

/// Validates that a code is a six digit one time password.
pub fn validate_code(code: &str) -> UtilResult<String> {
    let code = code.trim();
    let pattern = Regex::new(r"^\d{6}$")?;

    if !pattern.is_match(code) {
        return Err(format!("MFA code must be six digits, got '{}'", code).into());
    }

    Ok(code.to_string())
}
