//! List the customer folders available within a log bucket.
use clap::{App, ArgMatches, SubCommand};

use crate::cli;
use crate::creds;
use crate::types::UtilResult;
use crate::walker::ObjectWalker;

/// Generates an appropriate `SubCommand` for this module.
pub fn cmd<'a, 'b>() -> App<'a, 'b> {
    SubCommand::with_name("customers")
        .about("List the customer folders within a log bucket")
        .args(&cli::global_args())
        .args(&cli::credential_args())
}

/// Executes this subcommand and returns a `UtilResult` to indicate success.
pub async fn exec(args: &ArgMatches<'_>) -> UtilResult<()> {
    let bucket = cli::get_bucket(args);
    let s3 = creds::connect(&cli::get_credential_config(args)?).await?;

    let mut prefixes = Vec::new();
    let mut walker = ObjectWalker::new(&s3, bucket.clone(), None).delimited("/");

    while let Some(prefix) = walker.next_prefix().await? {
        prefixes.push(prefix);
    }

    let customers = customer_names(prefixes);

    if customers.is_empty() {
        warn!("No customer folders found in s3://{}", bucket);
        return Ok(());
    }

    info!("Found {} customer folder(s) in s3://{}", customers.len(), bucket);

    for customer in customers {
        println!("{}", customer);
    }

    Ok(())
}

/// Converts top level prefixes into sorted customer names.
fn customer_names(prefixes: Vec<String>) -> Vec<String> {
    let mut names: Vec<String> = prefixes
        .into_iter()
        .map(|prefix| prefix.trim_end_matches('/').to_string())
        .filter(|name| !name.is_empty())
        .collect();

    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    #[test]
    fn converting_prefixes_to_customers() {
        let prefixes = vec![
            "zeta/".to_string(),
            "acme/".to_string(),
            "/".to_string(),
            "globex/".to_string(),
            "acme/".to_string(),
        ];

        assert_eq!(
            super::customer_names(prefixes),
            vec!["acme", "globex", "zeta"]
        );
    }
}
