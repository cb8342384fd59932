//! Common functionality.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use byte_unit::Byte;
use clap_verbosity_flag::{InfoLevel, Verbosity};

use clap::Parser;
use flate2::bufread::MultiGzDecoder;
use tracing::{debug, trace};

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    let me = procfs::process::Process::myself().unwrap();
    let page_size = procfs::page_size();
    debug!(
        "RSS now: {}",
        Byte::from_u64(me.stat().unwrap().rss * page_size)
            .get_appropriate_unit(byte_unit::UnitType::Binary)
    );
}

/// Transparently open a file with gzip decoder.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn Read>, anyhow::Error>
where
    P: AsRef<Path>,
{
    if path.as_ref().extension().map(|s| s.to_str()) == Some(Some("gz")) {
        trace!("Opening {:?} as gzip for reading", path.as_ref());
        let file = File::open(path)?;
        let bufreader = BufReader::new(file);
        let decoder = MultiGzDecoder::new(bufreader);
        Ok(Box::new(decoder))
    } else {
        trace!("Opening {:?} as plain text for reading", path.as_ref());
        let file = File::open(path)?;
        Ok(Box::new(file))
    }
}

/// Round `value` to `digits` fractional digits, half up.
///
/// `f64::round` rounds half away from zero, which coincides with half up for
/// the non-negative values handled here.
pub fn round_half_up(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// Maximal number of records in one result page.
pub const MAX_PAGE_SIZE: u32 = 10_000;
