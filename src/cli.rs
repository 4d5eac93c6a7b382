//! CLI bindings for all internal commands and modules.
//!
//! This module focuses on the common CLI bindings required to provide easy
//! APIs and consistency across all other modules. This is where the parent
//! CLI can be found, as well as the conversion of arguments into the range
//! and credential configuration used by the subcommands.
use clap::{App, AppSettings, Arg, ArgMatches};

use crate::creds::{CredentialConfig, DEFAULT_SESSION_NAME};
use crate::range::{self, RangeSpec};
use crate::types::UtilResult;

/// Constructs a new CLI application using Clap.
///
/// This will register all subcommand modules and embed all metadata. All
/// metadata is fetched dynamically from Cargo.
pub fn build<'a, 'b>() -> App<'a, 'b> {
    App::new("")
        .name(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand(crate::customers::cmd())
        .subcommand(crate::fetch::cmd())
        .settings(&[
            AppSettings::ArgRequiredElseHelp,
            AppSettings::DisableHelpSubcommand,
            AppSettings::SubcommandRequiredElseHelp,
            AppSettings::VersionlessSubcommands,
        ])
}

/// Executes a subcommand based on the parsed arguments from the CLI.
pub async fn exec(args: &ArgMatches<'_>) -> UtilResult<()> {
    match args.subcommand() {
        ("customers", Some(subargs)) => crate::customers::exec(subargs).await,
        ("fetch", Some(subargs)) => crate::fetch::exec(subargs).await,
        _ => {
            build().print_help()?;
            Ok(())
        }
    }
}

/// Returns the arguments of the invoked subcommand, if there is one.
pub fn subcommand_args<'a, 'b>(args: &'a ArgMatches<'b>) -> &'a ArgMatches<'b> {
    args.subcommand().1.unwrap_or(args)
}

/// Fetches the bucket name from the common argument set.
///
/// An `s3://` scheme and trailing slashes are accepted and removed.
pub fn get_bucket(args: &ArgMatches<'_>) -> String {
    args.value_of("bucket")
        .unwrap_or_default()
        .trim_start_matches("s3://")
        .trim_end_matches('/')
        .to_string()
}

/// Converts the fetch arguments into a `RangeSpec`.
///
/// Hours are only read when no end date was provided, as they only apply
/// to single-day ranges.
pub fn get_range_spec(args: &ArgMatches<'_>) -> UtilResult<RangeSpec> {
    // customer and start date are required by clap
    let customer = args.value_of("customer").unwrap_or_default();
    let start = range::parse_date(args.value_of("start").unwrap_or_default())?;

    let mut spec = RangeSpec::new(customer, get_bucket(args), start);

    // an end date always fetches full days
    if let Some(end) = args.value_of("end") {
        if args.occurrences_of("start-hour") > 0 || args.occurrences_of("end-hour") > 0 {
            warn!("Ignoring hour range, as an end date was provided");
        }
        spec = spec.until(range::parse_date(end)?);
    } else {
        // single day, so restrict to the hour range
        let start_hour = range::parse_hour(args.value_of("start-hour").unwrap_or("00"))?;
        let end_hour = range::parse_hour(args.value_of("end-hour").unwrap_or("23"))?;
        spec = spec.hours(start_hour, end_hour);
    }

    // override the local root if provided
    if let Some(root) = args.value_of("output") {
        spec = spec.root(root);
    }

    Ok(spec)
}

/// Converts the credential arguments into a `CredentialConfig`.
pub fn get_credential_config(args: &ArgMatches<'_>) -> UtilResult<CredentialConfig> {
    // parse the optional lifetime in seconds
    let duration = match args.value_of("duration") {
        Some(secs) => Some(secs.parse::<i64>()?),
        None => None,
    };

    Ok(CredentialConfig {
        mfa_serial: args.value_of("mfa-serial").map(str::to_string),
        role_arn: args.value_of("role-arn").map(str::to_string),
        session_name: args
            .value_of("session-name")
            .unwrap_or(DEFAULT_SESSION_NAME)
            .to_string(),
        duration,
        mfa_code: args.value_of("mfa-code").map(str::to_string),
        role_mfa_code: args.value_of("role-mfa-code").map(str::to_string),
    })
}

/// Fetches the set of global arguments which should be attached on each command.
pub fn global_args<'a, 'b>() -> [Arg<'a, 'b>; 3] {
    [
        Arg::with_name("quiet")
            .help("Only prints errors during execution")
            .short("q")
            .long("quiet")
            .conflicts_with("verbose"),
        Arg::with_name("verbose")
            .help("Prints debug output during execution")
            .short("v")
            .long("verbose"),
        Arg::with_name("bucket")
            .help("The S3 bucket holding the customer logs")
            .index(1)
            .required(true),
    ]
}

/// Fetches the set of arguments used to bootstrap credentials.
pub fn credential_args<'a, 'b>() -> [Arg<'a, 'b>; 6] {
    [
        Arg::with_name("mfa-serial")
            .help("Serial number or ARN of the MFA device")
            .long("mfa-serial")
            .takes_value(true),
        Arg::with_name("mfa-code")
            .help("MFA code for the session token, prompted if missing")
            .long("mfa-code")
            .takes_value(true)
            .requires("mfa-serial"),
        Arg::with_name("role-arn")
            .help("ARN of a role to assume before fetching")
            .long("role-arn")
            .takes_value(true),
        Arg::with_name("role-mfa-code")
            .help("MFA code for the role assumption, prompted if missing")
            .long("role-mfa-code")
            .takes_value(true)
            .requires_all(&["mfa-serial", "role-arn"]),
        Arg::with_name("session-name")
            .help("Session name used when assuming the role")
            .long("session-name")
            .takes_value(true)
            .requires("role-arn"),
        Arg::with_name("duration")
            .help("Lifetime of the temporary credentials in seconds")
            .long("duration")
            .takes_value(true),
    ]
}

/// Determines if the dry-run switch was provided in this execution.
pub fn is_dry_run(args: &ArgMatches<'_>) -> bool {
    args.is_present("dry")
}
