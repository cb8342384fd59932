//! Conversion of user-facing call filters into storage predicates.
//!
//! The produced predicate groups mirror the inference thresholds as range
//! predicates the storage layer can push down: the outer collection is an
//! OR of inner AND groups.

use std::collections::BTreeSet;

use indexmap::IndexSet;
use tracing::warn;

use super::{
    params,
    params::{ConditionParameter, ParamCombination},
    schema::query::{
        gene_call_filter, CallAttribute, DataType, GeneCallFilter, SummaryCallType, SummaryQuality,
    },
    storage::{
        CallPredicateGroup, CallQuery, ConditionPredicate, PValueComparison, PValuePredicate,
        PValueVariant,
    },
    thresholds::PValueThresholds,
};

/// Supporting code for `convert_filter`.
pub(crate) mod convert {
    use crate::calls::params::ConditionParameter;

    /// Error type for `convert_filter`.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// Invalid-argument: the filter violates a documented precondition.
        #[error("invalid filter: {0}")]
        Filter(#[from] super::gene_call_filter::Error),
        /// Invalid-argument: a dimension token set is invalid.
        #[error("invalid condition parameters: {0}")]
        Params(#[from] super::params::param_combination::Error),
        /// Invalid-argument: a condition filter restricts a dimension that
        /// is not part of the queried parameter combination.
        #[error("condition filter restricts inactive dimension {0}")]
        InactiveDimensionFilter(ConditionParameter),
    }
}

/// Convert a call filter into the query handed to storage.
///
/// `attributes` is the explicit set of result attributes the caller wants
/// populated; it travels with the query so storage and assembly agree on
/// what is requested.
pub fn convert_filter(
    filter: &GeneCallFilter,
    attributes: IndexSet<CallAttribute>,
    thresholds: &PValueThresholds,
) -> Result<CallQuery, convert::Error> {
    filter.validate()?;

    let data_types = filter.effective_data_types();
    let parameter_combination =
        params::canonical_combination(Some(filter.condition_parameters.as_slice()))?;
    let observed_parameters = filter
        .observed_data
        .as_deref()
        .map(params::require_combination)
        .transpose()?;

    let provenance_combinations = {
        let mut seen = IndexSet::new();
        for combination in params::non_empty_subsets(&parameter_combination) {
            seen.insert(combination.composed());
        }
        seen.into_iter().collect::<Vec<_>>()
    };

    let mut p_value_predicate_groups = Vec::new();
    for (call_type, min_quality) in filter.effective_summary_qualities() {
        p_value_predicate_groups.extend(predicate_groups_for(
            call_type,
            min_quality,
            &data_types,
            thresholds,
        ));
    }

    let condition_predicates =
        build_condition_predicates(filter, &parameter_combination)?;

    Ok(CallQuery {
        species_id: filter.species_id,
        gene_stable_ids: filter.gene_ids.iter().cloned().collect(),
        condition_predicates,
        p_value_predicate_groups,
        observed_parameters,
        parameter_combination,
        provenance_combinations,
        data_types,
        attributes,
    })
}

/// Build the OR'd predicate groups for one requested call type with a
/// minimal quality.
fn predicate_groups_for(
    call_type: SummaryCallType,
    min_quality: SummaryQuality,
    data_types: &BTreeSet<DataType>,
    thresholds: &PValueThresholds,
) -> Vec<CallPredicateGroup> {
    let all = data_types.clone();
    let trusted = DataType::trusted_for_absence(data_types);

    match call_type {
        SummaryCallType::Expressed => match min_quality {
            SummaryQuality::Gold => vec![group(vec![le(
                all,
                PValueVariant::SelfAndDescendant,
                thresholds.present_high,
            )])],
            SummaryQuality::Silver => vec![group(vec![le(
                all,
                PValueVariant::SelfAndDescendant,
                thresholds.present_low,
            )])],
            SummaryQuality::Bronze => vec![
                group(vec![le(
                    all.clone(),
                    PValueVariant::SelfAndDescendant,
                    thresholds.present_low,
                )]),
                group(vec![le(
                    all,
                    PValueVariant::DescendantOnly,
                    thresholds.present_low,
                )]),
            ],
        },
        SummaryCallType::NotExpressed => match min_quality {
            SummaryQuality::Gold | SummaryQuality::Silver => {
                if trusted.is_empty() {
                    // absence above bronze needs corroboration; without any
                    // trusted data type the request can match nothing
                    warn!(
                        "requested {} absence calls without trusted data types, \
                         no predicate group produced",
                        min_quality
                    );
                    return Vec::new();
                }
                let threshold = if min_quality == SummaryQuality::Gold {
                    thresholds.absent_high
                } else {
                    thresholds.absent_low
                };
                let mut predicates =
                    vec![gt(all.clone(), PValueVariant::SelfAndDescendant, threshold)];
                if trusted != all {
                    predicates.push(gt(trusted, PValueVariant::SelfAndDescendant, threshold));
                }
                vec![group(predicates)]
            }
            SummaryQuality::Bronze => vec![group(vec![gt(
                all,
                PValueVariant::SelfAndDescendant,
                thresholds.absent_low,
            )])],
        },
    }
}

fn build_condition_predicates(
    filter: &GeneCallFilter,
    parameter_combination: &ParamCombination,
) -> Result<Vec<ConditionPredicate>, convert::Error> {
    use strum::IntoEnumIterator;

    // the complement: inactive dimensions are pinned to their root term
    let mut base = ConditionPredicate::default();
    for param in ConditionParameter::iter() {
        if !parameter_combination.contains(param) {
            base.term_ids_mut(param)
                .insert(param.root_term_id().to_string());
        }
    }

    let non_empty_filters = filter
        .conditions
        .iter()
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>();
    if non_empty_filters.is_empty() {
        // no condition selection; still pin inactive dimensions when the
        // combination leaves any
        return if parameter_combination == &ParamCombination::all() {
            Ok(vec![])
        } else {
            Ok(vec![base])
        };
    }

    let mut result = Vec::new();
    for condition_filter in non_empty_filters {
        let mut predicate = base.clone();
        for param in ConditionParameter::iter() {
            let term_ids = condition_filter.term_ids(param);
            if term_ids.is_empty() {
                continue;
            }
            if !parameter_combination.contains(param) {
                return Err(convert::Error::InactiveDimensionFilter(param));
            }
            predicate
                .term_ids_mut(param)
                .extend(term_ids.iter().cloned());
        }
        result.push(predicate);
    }
    Ok(result)
}

fn group(p_value_predicates: Vec<PValuePredicate>) -> CallPredicateGroup {
    CallPredicateGroup { p_value_predicates }
}

fn le(data_types: BTreeSet<DataType>, variant: PValueVariant, threshold: f64) -> PValuePredicate {
    PValuePredicate::new(data_types, variant, PValueComparison::LessOrEqual, threshold)
}

fn gt(data_types: BTreeSet<DataType>, variant: PValueVariant, threshold: f64) -> PValuePredicate {
    PValuePredicate::new(data_types, variant, PValueComparison::Greater, threshold)
}
