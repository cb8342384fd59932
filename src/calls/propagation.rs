//! Merging of per-data-type observation provenance.

use super::schema::data::DataPropagation;

/// Supporting code for `merge_data_propagations`.
pub(crate) mod merge {
    /// Error type for `merge_data_propagations`.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// Invalid-argument: merging requires at least one input; a caller
        /// without provenance must not ask for a merged value.
        #[error("cannot merge an empty collection of data propagations")]
        EmptyInput,
    }
}

/// Merge observation provenance across data types by summing the counts
/// per condition parameter combination.
///
/// Merging is associative and commutative; a singleton input merges to an
/// equivalent value. An empty input is an error, not a zero-valued result.
pub fn merge_data_propagations<'a>(
    propagations: impl IntoIterator<Item = &'a DataPropagation>,
) -> Result<DataPropagation, merge::Error> {
    let mut iter = propagations.into_iter();
    let first = iter.next().ok_or(merge::Error::EmptyInput)?;

    let mut result = first.clone();
    for propagation in iter {
        for (combination, count) in &propagation.self_observation_counts {
            *result
                .self_observation_counts
                .entry(combination.clone())
                .or_insert(0) += count;
        }
        for (combination, count) in &propagation.descendant_observation_counts {
            *result
                .descendant_observation_counts
                .entry(combination.clone())
                .or_insert(0) += count;
        }
    }
    Ok(result)
}
