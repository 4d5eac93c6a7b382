//! Fetch hourly partitioned customer logs from Amazon S3.
//!
//! Logs are expected under `s3://<bucket>/<customer>/<YYYYMMDD>-<HH>/`
//! and are copied into `./customer_logs/<YYYYMMDD>-<HH>/` (or another
//! output root), the layout expected by the log analyzer.
//!
//! Credentials are resolved via the guidelines in the [AWS Documentation]
//! (https://docs.aws.amazon.com/cli/latest/userguide/cli-environment.html),
//! optionally exchanged for temporary MFA credentials and an assumed role.
#[macro_use]
extern crate log as logger;

mod cli;
mod creds;
mod log;
mod range;
mod summary;
mod types;
mod walker;

mod customers;
mod fetch;

#[tokio::main]
async fn main() -> types::UtilResult<()> {
    // build the CLI and grab all arguments
    let args = cli::build().get_matches();

    // initialize logging from the subcommand switches
    log::init(cli::subcommand_args(&args))?;

    // delegate to the cli mod
    cli::exec(&args).await
}
