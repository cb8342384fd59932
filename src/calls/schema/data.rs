//! Code for representing expression calls internally, corresponds to what
//! the data pipeline precomputes per gene and condition.

use std::collections::{BTreeMap, BTreeSet};

use crate::calls::params::{ConditionParameter, ParamCombination};

use super::query::{DataType, SummaryCallType, SummaryQuality};

/// A gene as loaded from storage.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, derive_new::new,
)]
pub struct Gene {
    /// Internal numeric identifier used by storage rows.
    pub internal_id: u64,
    /// Stable public identifier, e.g., an Ensembl gene ID.
    pub stable_id: String,
    /// Gene symbol or name.
    pub name: String,
    /// Internal numeric species identifier.
    pub species_id: u32,
}

/// A coordinate in the (anatomy x cell type x stage x sex x strain x
/// species) space.
///
/// Absent dimensions mean the call is aggregated at the root of that
/// dimension. Conditions are immutable value objects; equality covers all
/// five term fields plus the species.
#[serde_with::skip_serializing_none]
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    derive_new::new,
)]
pub struct Condition {
    /// Anatomical entity term.
    pub anat_entity_id: Option<String>,
    /// Cell type term.
    pub cell_type_id: Option<String>,
    /// Developmental stage term.
    pub dev_stage_id: Option<String>,
    /// Sex term.
    pub sex_id: Option<String>,
    /// Strain term.
    pub strain_id: Option<String>,
    /// Internal numeric species identifier.
    pub species_id: u32,
}

impl Condition {
    /// The term of the given dimension, if any.
    pub fn term_id(&self, param: ConditionParameter) -> Option<&str> {
        match param {
            ConditionParameter::Anatomy => self.anat_entity_id.as_deref(),
            ConditionParameter::CellType => self.cell_type_id.as_deref(),
            ConditionParameter::DevStage => self.dev_stage_id.as_deref(),
            ConditionParameter::Sex => self.sex_id.as_deref(),
            ConditionParameter::Strain => self.strain_id.as_deref(),
        }
    }

    /// The set of dimensions carrying a term.
    pub fn used_parameters(&self) -> BTreeSet<ConditionParameter> {
        use strum::IntoEnumIterator;
        ConditionParameter::iter()
            .filter(|param| self.term_id(*param).is_some())
            .collect()
    }
}

/// An FDR-corrected p-value obtained from one specific combination of data
/// types.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct FdrPValue {
    /// The FDR-corrected p-value.
    pub p_value: f64,
    /// The data types the p-value was computed from.
    pub data_types: BTreeSet<DataType>,
}

/// Observation counts supporting a call, per condition parameter
/// combination.
///
/// `self_observation_counts` records raw annotations directly in the
/// condition, `descendant_observation_counts` those only supporting it via
/// a descendant condition.
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DataPropagation {
    /// Per-combination count of directly supporting annotations.
    #[serde_as(as = "BTreeMap<serde_with::DisplayFromStr, _>")]
    pub self_observation_counts: BTreeMap<ParamCombination, u64>,
    /// Per-combination count of annotations supporting via descendants only.
    #[serde_as(as = "BTreeMap<serde_with::DisplayFromStr, _>")]
    pub descendant_observation_counts: BTreeMap<ParamCombination, u64>,
}

impl DataPropagation {
    /// Total count of directly supporting annotations.
    pub fn total_self_count(&self) -> u64 {
        self.self_observation_counts.values().sum()
    }

    /// Whether the call is directly observed for the given combination.
    pub fn is_observed(&self, combination: &ParamCombination) -> bool {
        self.self_observation_counts
            .get(&combination.composed())
            .map(|count| *count > 0)
            .unwrap_or(false)
    }
}

/// Evidence of one data type contributing to a call.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallData {
    /// The data type of the evidence.
    pub data_type: DataType,
    /// P-values observed in the condition itself, kept sorted ascending.
    self_p_values: Vec<f64>,
    /// P-values observed in descendant conditions, kept sorted ascending.
    descendant_p_values: Vec<f64>,
    /// FDR p-value over the condition and its descendants.
    pub fdr_p_value: Option<FdrPValue>,
    /// Best FDR p-value among strict descendants.
    pub best_descendant_fdr_p_value: Option<FdrPValue>,
    /// Raw rank of the gene for this data type.
    pub rank: Option<f64>,
    /// Rank normalized across data types.
    pub normalized_rank: Option<f64>,
    /// Weight of this data type in the mean rank.
    pub weight_for_mean_rank: Option<f64>,
    /// Observation provenance for this data type.
    pub data_propagation: Option<DataPropagation>,
}

impl CallData {
    /// Construct new `CallData`; the p-value lists are sorted on the way in.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data_type: DataType,
        self_p_values: Vec<f64>,
        descendant_p_values: Vec<f64>,
        fdr_p_value: Option<FdrPValue>,
        best_descendant_fdr_p_value: Option<FdrPValue>,
        rank: Option<f64>,
        normalized_rank: Option<f64>,
        weight_for_mean_rank: Option<f64>,
        data_propagation: Option<DataPropagation>,
    ) -> Self {
        let mut self_p_values = self_p_values;
        let mut descendant_p_values = descendant_p_values;
        self_p_values.sort_by(|a, b| a.total_cmp(b));
        descendant_p_values.sort_by(|a, b| a.total_cmp(b));
        Self {
            data_type,
            self_p_values,
            descendant_p_values,
            fdr_p_value,
            best_descendant_fdr_p_value,
            rank,
            normalized_rank,
            weight_for_mean_rank,
            data_propagation,
        }
    }

    /// P-values observed in the condition itself, ascending.
    pub fn self_p_values(&self) -> &[f64] {
        &self.self_p_values
    }

    /// P-values observed in descendant conditions, ascending.
    pub fn descendant_p_values(&self) -> &[f64] {
        &self.descendant_p_values
    }

    /// The sorted union of self and descendant p-values.
    pub fn all_p_values(&self) -> Vec<f64> {
        itertools::merge_join_by(
            self.self_p_values.iter().copied(),
            self.descendant_p_values.iter().copied(),
            |a, b| a.total_cmp(b),
        )
        .flat_map(|either| match either {
            itertools::EitherOrBoth::Both(a, b) => vec![a, b],
            itertools::EitherOrBoth::Left(a) => vec![a],
            itertools::EitherOrBoth::Right(b) => vec![b],
        })
        .collect()
    }
}

/// Supporting code for `GeneExpressionCall`.
pub(crate) mod gene_expression_call {
    /// Error type for `GeneExpressionCall::new()`.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// Illegal-state: upstream delivered two p-values for one data type
        /// set within one variant.
        #[error("duplicate FDR p-value for data types {0}")]
        DuplicatePValue(String),
        /// Illegal-state: upstream delivered two evidence records for one
        /// data type.
        #[error("duplicate call data for data type {0}")]
        DuplicateCallData(super::DataType),
    }
}

/// The inferred expression status of a gene in a condition.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeneExpressionCall {
    /// The gene of the call.
    pub gene: Gene,
    /// The condition of the call.
    pub condition: Condition,
    /// Summary call type, when requested and inferred.
    pub summary_call_type: Option<SummaryCallType>,
    /// Summary quality, when requested and inferred.
    pub summary_quality: Option<SummaryQuality>,
    /// FDR p-values over the condition and its descendants, one per data
    /// type combination.
    pub fdr_p_values: Vec<FdrPValue>,
    /// Best FDR p-values among strict descendants, one per data type
    /// combination.
    pub best_descendant_p_values: Vec<FdrPValue>,
    /// Per-data-type evidence.
    pub call_data: Vec<CallData>,
    /// Weighted mean rank across data types.
    pub mean_rank: Option<f64>,
    /// Normalized expression score derived from the mean rank.
    pub expression_score: Option<f64>,
    /// Merged observation provenance across data types.
    pub data_propagation: Option<DataPropagation>,
}

impl GeneExpressionCall {
    /// Construct a new call, validating that each p-value variant carries
    /// at most one entry per distinct data type set.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gene: Gene,
        condition: Condition,
        summary_call_type: Option<SummaryCallType>,
        summary_quality: Option<SummaryQuality>,
        fdr_p_values: Vec<FdrPValue>,
        best_descendant_p_values: Vec<FdrPValue>,
        call_data: Vec<CallData>,
        mean_rank: Option<f64>,
        expression_score: Option<f64>,
        data_propagation: Option<DataPropagation>,
    ) -> Result<Self, gene_expression_call::Error> {
        for p_values in [&fdr_p_values, &best_descendant_p_values] {
            let mut seen = BTreeSet::new();
            for p_value in p_values {
                if !seen.insert(p_value.data_types.clone()) {
                    return Err(gene_expression_call::Error::DuplicatePValue(
                        p_value
                            .data_types
                            .iter()
                            .map(|dt| dt.to_string())
                            .collect::<Vec<_>>()
                            .join("+"),
                    ));
                }
            }
        }
        let mut seen = BTreeSet::new();
        for data in &call_data {
            if !seen.insert(data.data_type) {
                return Err(gene_expression_call::Error::DuplicateCallData(data.data_type));
            }
        }

        Ok(Self {
            gene,
            condition,
            summary_call_type,
            summary_quality,
            fdr_p_values,
            best_descendant_p_values,
            call_data,
            mean_rank,
            expression_score,
            data_propagation,
        })
    }

    /// The self+descendant p-value for exactly the given data type set.
    pub fn fdr_p_value(&self, data_types: &BTreeSet<DataType>) -> Option<&FdrPValue> {
        self.fdr_p_values.iter().find(|p| &p.data_types == data_types)
    }

    /// The best-descendant p-value for exactly the given data type set.
    pub fn best_descendant_p_value(&self, data_types: &BTreeSet<DataType>) -> Option<&FdrPValue> {
        self.best_descendant_p_values
            .iter()
            .find(|p| &p.data_types == data_types)
    }

    /// The evidence of the given data type, if any.
    pub fn call_data_for(&self, data_type: DataType) -> Option<&CallData> {
        self.call_data.iter().find(|d| d.data_type == data_type)
    }
}
