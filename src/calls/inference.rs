//! Inference of summary call type and quality from FDR-corrected p-values.

use std::collections::BTreeSet;

use super::{
    schema::data::FdrPValue,
    schema::query::{DataType, SummaryCallType, SummaryQuality},
    thresholds::PValueThresholds,
};

/// The outcome of a successful call inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SummaryCall {
    /// Whether the gene is expressed or not.
    pub call_type: SummaryCallType,
    /// Confidence tier of the call.
    pub quality: SummaryQuality,
}

/// Supporting code for `infer_summary_call`.
pub(crate) mod summary_call {
    /// Error type for `infer_summary_call`.
    #[derive(thiserror::Error, Debug, Clone, PartialEq)]
    pub enum Error {
        /// Invalid-argument: no data type was requested.
        #[error("cannot infer a call without requested data types")]
        NoDataTypes,
        /// Illegal-state: the p-value for a required data type combination
        /// is missing.
        #[error("missing FDR p-value for data types {0}")]
        MissingPValue(String),
        /// Illegal-state: more than one p-value matches one data type
        /// combination.
        #[error("ambiguous FDR p-values for data types {0}")]
        AmbiguousPValue(String),
        /// Illegal-state: the threshold rules exhausted without producing a
        /// classification.
        #[error("p-values allow no classification (p_all={p_all}, p_trusted={p_trusted:?})")]
        Unclassifiable {
            p_all: f64,
            p_trusted: Option<f64>,
        },
    }
}

/// Infer the summary call type and quality for one call.
///
/// `fdr_p_values` carries the p-values over the condition and its
/// descendants, `best_descendant_p_values` the best values among strict
/// descendants, both per data type combination. The rules are ordered and
/// short-circuiting; in particular a presence call never re-checks the
/// trusted subset, while an absence call requires corroboration from the
/// data types trusted to report true negatives.
pub fn infer_summary_call(
    fdr_p_values: &[FdrPValue],
    best_descendant_p_values: &[FdrPValue],
    requested_data_types: &BTreeSet<DataType>,
    thresholds: &PValueThresholds,
) -> Result<SummaryCall, summary_call::Error> {
    if requested_data_types.is_empty() {
        return Err(summary_call::Error::NoDataTypes);
    }
    let trusted_data_types = DataType::trusted_for_absence(requested_data_types);

    let p_all = find_exact(fdr_p_values, requested_data_types)?
        .ok_or_else(|| summary_call::Error::MissingPValue(join(requested_data_types)))?;
    let p_trusted = if trusted_data_types.is_empty() {
        None
    } else {
        find_exact(fdr_p_values, &trusted_data_types)?
    };
    let best_descendant_p_all = find_exact(best_descendant_p_values, requested_data_types)?;
    let best_descendant_p_trusted = if trusted_data_types.is_empty() {
        None
    } else {
        find_exact(best_descendant_p_values, &trusted_data_types)?
    };

    // presence, in decreasing confidence
    if p_all <= thresholds.present_high {
        return Ok(SummaryCall {
            call_type: SummaryCallType::Expressed,
            quality: SummaryQuality::Gold,
        });
    }
    if p_all <= thresholds.present_low {
        return Ok(SummaryCall {
            call_type: SummaryCallType::Expressed,
            quality: SummaryQuality::Silver,
        });
    }
    if let Some(best_descendant) = best_descendant_p_all {
        if best_descendant <= thresholds.present_low {
            return Ok(SummaryCall {
                call_type: SummaryCallType::Expressed,
                quality: SummaryQuality::Bronze,
            });
        }
    }

    // absence claims need corroboration from trusted data types; a presence
    // signal lurking in a trusted-only descendant analysis caps the tier
    let cannot_exceed_bronze = trusted_data_types.is_empty()
        || p_trusted.is_none()
        || best_descendant_p_trusted
            .map(|p| p <= thresholds.present_low)
            .unwrap_or(false);

    if let Some(p_trusted) = p_trusted {
        if p_all > thresholds.absent_high && p_trusted > thresholds.absent_high {
            return Ok(SummaryCall {
                call_type: SummaryCallType::NotExpressed,
                quality: if cannot_exceed_bronze {
                    SummaryQuality::Bronze
                } else {
                    SummaryQuality::Gold
                },
            });
        }
    }

    if p_all > thresholds.absent_low {
        let quality = match p_trusted {
            Some(p_trusted) if p_trusted > thresholds.absent_low => {
                if cannot_exceed_bronze {
                    SummaryQuality::Bronze
                } else {
                    SummaryQuality::Silver
                }
            }
            _ => SummaryQuality::Bronze,
        };
        return Ok(SummaryCall {
            call_type: SummaryCallType::NotExpressed,
            quality,
        });
    }

    Err(summary_call::Error::Unclassifiable { p_all, p_trusted })
}

/// Find the p-value matching exactly the given data type set.
///
/// Returns `None` when no p-value matches; more than one match is an
/// illegal-state error.
fn find_exact(
    p_values: &[FdrPValue],
    data_types: &BTreeSet<DataType>,
) -> Result<Option<f64>, summary_call::Error> {
    let mut matches = p_values.iter().filter(|p| &p.data_types == data_types);
    let first = matches.next();
    if matches.next().is_some() {
        return Err(summary_call::Error::AmbiguousPValue(join(data_types)));
    }
    Ok(first.map(|p| p.p_value))
}

fn join(data_types: &BTreeSet<DataType>) -> String {
    data_types
        .iter()
        .map(|dt| dt.to_string())
        .collect::<Vec<_>>()
        .join("+")
}
