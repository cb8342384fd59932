//! Code for representing query definitions.
//!
//! Queries are stored as JSON and deserialized into the data structures
//! defined here before being converted into storage predicates.

use std::collections::{BTreeMap, BTreeSet};

use strum::IntoEnumIterator;

use crate::calls::params::ConditionParameter;

/// Enumeration of experimental data types contributing evidence to calls.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
    enum_map::Enum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    /// Affymetrix microarray data.
    #[strum(serialize = "AFFYMETRIX")]
    Affymetrix,
    /// Expressed sequence tag data.
    #[strum(serialize = "EST")]
    Est,
    /// In situ hybridization data.
    #[strum(serialize = "IN_SITU")]
    InSitu,
    /// Bulk RNA-Seq data.
    #[strum(serialize = "RNA_SEQ")]
    RnaSeq,
    /// Single-cell RNA-Seq data.
    #[strum(serialize = "SC_RNA_SEQ")]
    ScRnaSeq,
}

impl DataType {
    /// Whether this data type is reliable enough to certify a true negative
    /// (absence) call.
    ///
    /// EST and in situ data only report where a gene was seen, and
    /// single-cell dropout makes missing signal uninformative, so only the
    /// exhaustive assays qualify.
    pub fn is_trusted_for_absence(&self) -> bool {
        matches!(self, DataType::Affymetrix | DataType::RnaSeq)
    }

    /// The set of all data types.
    pub fn all() -> BTreeSet<DataType> {
        DataType::iter().collect()
    }

    /// The trusted-for-absence subset of `data_types`.
    pub fn trusted_for_absence(data_types: &BTreeSet<DataType>) -> BTreeSet<DataType> {
        data_types
            .iter()
            .copied()
            .filter(DataType::is_trusted_for_absence)
            .collect()
    }
}

/// The inferred expression status of a call.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SummaryCallType {
    /// The gene is expressed in the condition.
    #[strum(serialize = "EXPRESSED")]
    Expressed,
    /// The gene is not expressed in the condition.
    #[strum(serialize = "NOT_EXPRESSED")]
    NotExpressed,
}

/// Confidence tier of a call; ordering is `Bronze < Silver < Gold`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SummaryQuality {
    /// Low confidence.
    #[strum(serialize = "BRONZE")]
    Bronze,
    /// Medium confidence.
    #[strum(serialize = "SILVER")]
    Silver,
    /// High confidence.
    #[strum(serialize = "GOLD")]
    Gold,
}

/// Attributes of a call that a query can request.
///
/// The five dimension tokens double as condition parameter selectors; all
/// other tokens select result attributes only.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallAttribute {
    /// The gene of the call.
    #[strum(serialize = "GENE")]
    Gene,
    /// Anatomical entity of the condition.
    #[strum(serialize = "ANAT_ENTITY")]
    AnatEntity,
    /// Cell type of the condition.
    #[strum(serialize = "CELL_TYPE")]
    CellType,
    /// Developmental stage of the condition.
    #[strum(serialize = "DEV_STAGE")]
    DevStage,
    /// Sex of the condition.
    #[strum(serialize = "SEX")]
    Sex,
    /// Strain of the condition.
    #[strum(serialize = "STRAIN")]
    Strain,
    /// The summary call type.
    #[strum(serialize = "CALL_TYPE")]
    CallType,
    /// The summary quality.
    #[strum(serialize = "QUALITY")]
    Quality,
    /// Observation/propagation provenance.
    #[strum(serialize = "OBSERVED_DATA")]
    ObservedData,
    /// The weighted mean rank.
    #[strum(serialize = "MEAN_RANK")]
    MeanRank,
    /// The normalized expression score.
    #[strum(serialize = "EXPRESSION_SCORE")]
    ExpressionScore,
    /// FDR p-values aggregated over all requested data types.
    #[strum(serialize = "P_VALUE_INFO_ALL_DATA_TYPES")]
    PValueInfoAllDataTypes,
    /// FDR p-values per single data type.
    #[strum(serialize = "P_VALUE_INFO_EACH_DATA_TYPE")]
    PValueInfoEachDataType,
}

impl CallAttribute {
    /// The set of all attributes.
    pub fn all() -> indexmap::IndexSet<CallAttribute> {
        CallAttribute::iter().collect()
    }

    /// The condition parameter denoted by this token, if any.
    pub fn condition_parameter(&self) -> Option<ConditionParameter> {
        match self {
            CallAttribute::AnatEntity => Some(ConditionParameter::Anatomy),
            CallAttribute::CellType => Some(ConditionParameter::CellType),
            CallAttribute::DevStage => Some(ConditionParameter::DevStage),
            CallAttribute::Sex => Some(ConditionParameter::Sex),
            CallAttribute::Strain => Some(ConditionParameter::Strain),
            _ => None,
        }
    }
}

/// How calls are propagated along the condition ontology.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropagationMode {
    /// Use the calls precomputed by the data pipeline.
    #[default]
    Precomputed,
    /// Propagate at query time; not supported.
    OnTheFly,
}

/// Category of calls requested by a query.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallCategory {
    /// Presence/absence calls from FDR-corrected p-values.
    #[default]
    Presence,
    /// Differential expression calls; not supported.
    DifferentialExpression,
}

/// Selection of conditions by per-dimension term identifiers.
///
/// Empty identifier lists leave the corresponding dimension unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConditionFilter {
    /// Anatomical entity identifiers.
    #[serde(default)]
    pub anat_entity_ids: Vec<String>,
    /// Cell type identifiers.
    #[serde(default)]
    pub cell_type_ids: Vec<String>,
    /// Developmental stage identifiers.
    #[serde(default)]
    pub dev_stage_ids: Vec<String>,
    /// Sex identifiers.
    #[serde(default)]
    pub sex_ids: Vec<String>,
    /// Strain identifiers.
    #[serde(default)]
    pub strain_ids: Vec<String>,
}

impl ConditionFilter {
    /// Whether the filter restricts no dimension at all.
    pub fn is_empty(&self) -> bool {
        self.anat_entity_ids.is_empty()
            && self.cell_type_ids.is_empty()
            && self.dev_stage_ids.is_empty()
            && self.sex_ids.is_empty()
            && self.strain_ids.is_empty()
    }

    /// The identifier selection for the given dimension.
    pub fn term_ids(&self, param: ConditionParameter) -> &[String] {
        match param {
            ConditionParameter::Anatomy => &self.anat_entity_ids,
            ConditionParameter::CellType => &self.cell_type_ids,
            ConditionParameter::DevStage => &self.dev_stage_ids,
            ConditionParameter::Sex => &self.sex_ids,
            ConditionParameter::Strain => &self.strain_ids,
        }
    }
}

/// Supporting code for `GeneCallFilter`.
pub(crate) mod gene_call_filter {
    /// Error type for `GeneCallFilter::validate()`.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// Invalid-argument: neither genes nor conditions are selected.
        #[error("filter must select at least one gene or one condition")]
        UnboundedFilter,
        /// Invalid-argument: the differential expression category is not
        /// implemented.
        #[error("differential expression calls are not supported")]
        UnsupportedCallCategory,
        /// Invalid-argument: on-the-fly propagation is not implemented.
        #[error("on-the-fly propagation is not supported")]
        UnsupportedPropagationMode,
    }
}

/// User-facing filter selecting the expression calls of interest.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeneCallFilter {
    /// Species to restrict the query to.
    pub species_id: Option<u32>,
    /// Stable identifiers of the genes to restrict to.
    #[serde(default)]
    pub gene_ids: Vec<String>,
    /// Condition selections, OR'd together.
    #[serde(default)]
    pub conditions: Vec<ConditionFilter>,
    /// Data types to consider; empty means all.
    #[serde(default)]
    pub data_types: BTreeSet<DataType>,
    /// Requested call type mapped to the minimal acceptable quality.
    ///
    /// An empty mapping requests both call types at `Bronze` or better.
    #[serde(default)]
    pub summary_qualities: BTreeMap<SummaryCallType, SummaryQuality>,
    /// Require the call to be directly observed for these dimension tokens.
    pub observed_data: Option<Vec<CallAttribute>>,
    /// Dimension tokens defining the condition grouping; empty means all
    /// five dimensions.
    #[serde(default)]
    pub condition_parameters: Vec<CallAttribute>,
    /// Propagation mode; only `Precomputed` is supported.
    #[serde(default)]
    pub propagation_mode: PropagationMode,
    /// Call category; only `Presence` is supported.
    #[serde(default)]
    pub call_category: CallCategory,
}

impl GeneCallFilter {
    /// Validate filter-level preconditions.
    ///
    /// Dimension token validation happens in the predicate converter via
    /// the combination engine; this checks what can be checked without it.
    pub fn validate(&self) -> Result<(), gene_call_filter::Error> {
        if self.gene_ids.is_empty() && self.conditions.iter().all(|c| c.is_empty()) {
            return Err(gene_call_filter::Error::UnboundedFilter);
        }
        if self.call_category != CallCategory::Presence {
            return Err(gene_call_filter::Error::UnsupportedCallCategory);
        }
        if self.propagation_mode != PropagationMode::Precomputed {
            return Err(gene_call_filter::Error::UnsupportedPropagationMode);
        }
        Ok(())
    }

    /// The data types to consider, defaulting to all.
    pub fn effective_data_types(&self) -> BTreeSet<DataType> {
        if self.data_types.is_empty() {
            DataType::all()
        } else {
            self.data_types.clone()
        }
    }

    /// The requested call types with minimal qualities, defaulting to both
    /// call types at `Bronze`.
    pub fn effective_summary_qualities(&self) -> BTreeMap<SummaryCallType, SummaryQuality> {
        if self.summary_qualities.is_empty() {
            [
                (SummaryCallType::Expressed, SummaryQuality::Bronze),
                (SummaryCallType::NotExpressed, SummaryQuality::Bronze),
            ]
            .into_iter()
            .collect()
        } else {
            self.summary_qualities.clone()
        }
    }
}
