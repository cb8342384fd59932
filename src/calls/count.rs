//! Code implementing the "calls count" sub command.

use std::time::Instant;

use anyhow::anyhow;
use clap::{command, Parser};
use thousands::Separable;
use tracing::{error, info};

use crate::{
    calls::loader::CallLoader,
    calls::schema::query::{CallAttribute, GeneCallFilter},
    calls::storage::TsvCallDb,
    calls::thresholds::PValueThresholds,
    common::open_read_maybe_gz,
    conf,
};

/// Command line arguments for `calls count` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Count matches of an expression call query", long_about = None)]
pub struct Args {
    /// Path to the calls database directory.
    #[arg(long, required = true)]
    pub path_db: String,
    /// Path to query JSON file.
    #[arg(long, required = true)]
    pub path_query_json: String,

    /// Disable the database sanity checks.
    #[arg(long, default_value_t = false)]
    pub disable_sanity_checks: bool,
}

/// Main entry point for `calls count` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    if !args.disable_sanity_checks {
        if let Some(error_msgs) = conf::sanity_check_db(&args.path_db)? {
            error!("Found {} errors in your database", error_msgs.len());
            for msg in &error_msgs {
                error!("error: {}", &msg);
            }
            return Err(anyhow!("Errors found in database sanity check"));
        }
    }
    let db_conf = conf::load_db_conf(&args.path_db)?;

    info!("Loading query...");
    let filter: GeneCallFilter =
        serde_json::from_reader(open_read_maybe_gz(&args.path_query_json)?)?;
    info!(
        "... done loading query = {}",
        &serde_json::to_string(&filter)?
    );

    info!("Loading calls database...");
    let db = TsvCallDb::load(&args.path_db)?;

    let max_ranks = db_conf
        .species
        .iter()
        .map(|species| (species.id, species.max_rank))
        .collect();
    // counting materializes nothing, no attributes are requested
    let loader = CallLoader::new(
        &filter,
        indexmap::IndexSet::<CallAttribute>::new(),
        PValueThresholds::default(),
        max_ranks,
        &db,
        &db,
        &db,
    )?;

    let count = loader.load_count()?;
    info!("query matches {} calls", count.separate_with_commas());

    tracing::info!(
        "All of `calls count` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}
