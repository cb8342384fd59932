//! Storage-facing predicate and row model, and the TSV-backed store.
//!
//! The core never issues SQL; it shapes the predicate objects defined here
//! and hands them to a `CallStorage` implementation for push-down
//! evaluation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use indexmap::IndexSet;
use tracing::warn;

use crate::{
    calls::params::{ConditionParameter, ParamCombination},
    calls::schema::data::{Condition, Gene},
    calls::schema::query::{CallAttribute, DataType},
    common::open_read_maybe_gz,
    conf::resolve_db_file,
};

/// Which p-value variant a predicate applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PValueVariant {
    /// The value aggregated over the condition and its descendants.
    SelfAndDescendant,
    /// The best value among strict descendants.
    DescendantOnly,
}

/// Comparison direction of a p-value predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PValueComparison {
    /// The stored value must be at most the threshold.
    LessOrEqual,
    /// The stored value must be strictly above the threshold.
    Greater,
}

/// A range predicate on one stored p-value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct PValuePredicate {
    /// The data type combination whose p-value is compared.
    pub data_types: BTreeSet<DataType>,
    /// The p-value variant compared.
    pub variant: PValueVariant,
    /// Comparison direction.
    pub comparison: PValueComparison,
    /// The threshold compared against.
    pub threshold: f64,
}

impl PValuePredicate {
    /// Whether the predicate holds for the given stored value.
    ///
    /// A missing value never satisfies a predicate; absence thresholds must
    /// not match rows that carry no evidence at all.
    pub fn holds(&self, value: Option<f64>) -> bool {
        match (value, self.comparison) {
            (Some(value), PValueComparison::LessOrEqual) => value <= self.threshold,
            (Some(value), PValueComparison::Greater) => value > self.threshold,
            (None, _) => false,
        }
    }
}

/// A conjunction of p-value predicates; groups are OR'd together.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallPredicateGroup {
    /// The AND'd predicates of this group.
    pub p_value_predicates: Vec<PValuePredicate>,
}

/// Per-dimension identifier selection for conditions.
///
/// An empty identifier set leaves the dimension unrestricted; inactive
/// dimensions carry their root sentinel so only root-aggregated rows match.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConditionPredicate {
    /// Anatomical entity identifiers.
    pub anat_entity_ids: IndexSet<String>,
    /// Cell type identifiers.
    pub cell_type_ids: IndexSet<String>,
    /// Developmental stage identifiers.
    pub dev_stage_ids: IndexSet<String>,
    /// Sex identifiers.
    pub sex_ids: IndexSet<String>,
    /// Strain identifiers.
    pub strain_ids: IndexSet<String>,
}

impl ConditionPredicate {
    /// The identifier selection of the given dimension.
    pub fn term_ids(&self, param: ConditionParameter) -> &IndexSet<String> {
        match param {
            ConditionParameter::Anatomy => &self.anat_entity_ids,
            ConditionParameter::CellType => &self.cell_type_ids,
            ConditionParameter::DevStage => &self.dev_stage_ids,
            ConditionParameter::Sex => &self.sex_ids,
            ConditionParameter::Strain => &self.strain_ids,
        }
    }

    /// Mutable identifier selection of the given dimension.
    pub fn term_ids_mut(&mut self, param: ConditionParameter) -> &mut IndexSet<String> {
        match param {
            ConditionParameter::Anatomy => &mut self.anat_entity_ids,
            ConditionParameter::CellType => &mut self.cell_type_ids,
            ConditionParameter::DevStage => &mut self.dev_stage_ids,
            ConditionParameter::Sex => &mut self.sex_ids,
            ConditionParameter::Strain => &mut self.strain_ids,
        }
    }

    /// Whether the condition matches the predicate.
    ///
    /// A condition field left absent counts as the dimension's root; strain
    /// identifiers compare case-insensitively.
    pub fn matches(&self, condition: &Condition) -> bool {
        use strum::IntoEnumIterator;
        ConditionParameter::iter().all(|param| {
            let ids = self.term_ids(param);
            if ids.is_empty() {
                return true;
            }
            let term_id = condition.term_id(param).unwrap_or(param.root_term_id());
            if param.lenient_term_match() {
                ids.iter().any(|id| id.eq_ignore_ascii_case(term_id))
            } else {
                ids.contains(term_id)
            }
        })
    }
}

/// The complete query handed to a `CallStorage`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallQuery {
    /// Species restriction, if any.
    pub species_id: Option<u32>,
    /// Stable gene identifiers to restrict to; empty means unrestricted.
    pub gene_stable_ids: IndexSet<String>,
    /// Condition predicates, OR'd; empty means unrestricted.
    pub condition_predicates: Vec<ConditionPredicate>,
    /// P-value predicate groups, an OR of AND groups; empty means
    /// unrestricted.
    pub p_value_predicate_groups: Vec<CallPredicateGroup>,
    /// Require direct observation for this combination, if any.
    pub observed_parameters: Option<ParamCombination>,
    /// The dimensions the queried calls are grouped by.
    pub parameter_combination: ParamCombination,
    /// Sub-combinations for which observation provenance is requested.
    pub provenance_combinations: Vec<ParamCombination>,
    /// The data types considered by the query.
    pub data_types: BTreeSet<DataType>,
    /// The attributes to populate on the results.
    pub attributes: IndexSet<CallAttribute>,
}

/// One stored p-value pair of a call row.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct RawPValue {
    /// The data type combination the values were computed from.
    pub data_types: BTreeSet<DataType>,
    /// FDR p-value over the condition and its descendants.
    pub fdr_p_value: Option<f64>,
    /// Best FDR p-value among strict descendants.
    pub best_descendant_fdr_p_value: Option<f64>,
}

/// Per-data-type evidence of a call row.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct RawDataTypeEvidence {
    /// The data type of the evidence.
    pub data_type: DataType,
    /// P-values observed in the condition itself.
    pub self_p_values: Vec<f64>,
    /// P-values observed in descendant conditions.
    pub descendant_p_values: Vec<f64>,
    /// Raw rank for this data type.
    pub rank: Option<f64>,
    /// Normalized rank for this data type.
    pub normalized_rank: Option<f64>,
    /// Weight of this data type in the mean rank.
    pub weight_for_mean_rank: Option<f64>,
    /// Direct observation counts per parameter combination.
    pub self_observation_counts: BTreeMap<ParamCombination, u64>,
    /// Descendant-only observation counts per parameter combination.
    pub descendant_observation_counts: BTreeMap<ParamCombination, u64>,
}

/// One storage row: a (gene, condition) cell with aggregated evidence.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawCallRow {
    /// Internal numeric gene identifier.
    pub gene_internal_id: u64,
    /// Internal numeric condition identifier.
    pub condition_internal_id: u64,
    /// Stored p-values, one entry per data type combination.
    pub p_values: Vec<RawPValue>,
    /// Per-data-type evidence.
    pub evidence: Vec<RawDataTypeEvidence>,
}

impl RawCallRow {
    /// The stored p-value for exactly the given data type set and variant.
    pub fn p_value(&self, data_types: &BTreeSet<DataType>, variant: PValueVariant) -> Option<f64> {
        self.p_values
            .iter()
            .find(|p| &p.data_types == data_types)
            .and_then(|p| match variant {
                PValueVariant::SelfAndDescendant => p.fdr_p_value,
                PValueVariant::DescendantOnly => p.best_descendant_fdr_p_value,
            })
    }
}

/// Storage collaborator evaluating pushed-down call queries.
pub trait CallStorage {
    /// Load the rows matching `query`, in stable (gene, condition) order,
    /// windowed by `offset` and `limit`.
    fn load_rows(
        &self,
        query: &CallQuery,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<RawCallRow>, anyhow::Error>;

    /// Count the rows matching `query` without materializing them.
    fn count_rows(&self, query: &CallQuery) -> Result<u64, anyhow::Error>;
}

/// Lookup collaborator resolving internal gene identifiers.
pub trait GeneStore {
    /// Return the genes for the given internal identifiers; missing
    /// identifiers are simply absent from the result.
    fn genes_by_internal_ids(&self, ids: &[u64]) -> Result<HashMap<u64, Gene>, anyhow::Error>;
}

/// Lookup collaborator resolving internal condition identifiers.
pub trait ConditionStore {
    /// Return the conditions for the given internal identifiers; missing
    /// identifiers are simply absent from the result.
    fn conditions_by_internal_ids(
        &self,
        ids: &[u64],
    ) -> Result<HashMap<u64, Condition>, anyhow::Error>;
}

/// Code for reading the TSV files of a calls database.
pub mod tsv {
    use super::*;

    /// Record of the `genes.tsv` file.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct GeneRecord {
        /// Internal numeric gene identifier.
        pub internal_id: u64,
        /// Stable public identifier.
        pub stable_id: String,
        /// Gene symbol or name.
        pub name: String,
        /// Internal numeric species identifier.
        pub species_id: u32,
    }

    /// Record of the `conditions.tsv` file.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct ConditionRecord {
        /// Internal numeric condition identifier.
        pub internal_id: u64,
        /// Internal numeric species identifier.
        pub species_id: u32,
        /// Anatomical entity term, empty for root-aggregated.
        pub anat_entity_id: Option<String>,
        /// Cell type term, empty for root-aggregated.
        pub cell_type_id: Option<String>,
        /// Developmental stage term, empty for root-aggregated.
        pub dev_stage_id: Option<String>,
        /// Sex term, empty for root-aggregated.
        pub sex_id: Option<String>,
        /// Strain term, empty for root-aggregated.
        pub strain_id: Option<String>,
    }

    /// Record of the `calls.tsv` file.
    ///
    /// Rows with a single data type carry the per-data-type detail
    /// columns; rows with a combination of data types carry the combined
    /// p-values only.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct CallRecord {
        /// Internal numeric gene identifier.
        pub gene_internal_id: u64,
        /// Internal numeric condition identifier.
        pub condition_internal_id: u64,
        /// Comma-separated data types the row aggregates.
        pub data_types: String,
        /// FDR p-value over the condition and its descendants.
        pub fdr_p_value: Option<f64>,
        /// Best FDR p-value among strict descendants.
        pub best_descendant_fdr_p_value: Option<f64>,
        /// Raw rank.
        pub rank: Option<f64>,
        /// Normalized rank.
        pub normalized_rank: Option<f64>,
        /// Weight for the mean rank.
        pub weight_for_mean_rank: Option<f64>,
        /// Comma-separated p-values observed in the condition itself.
        pub self_p_values: Option<String>,
        /// Comma-separated p-values observed in descendant conditions.
        pub descendant_p_values: Option<String>,
        /// Semicolon-separated `COMBINATION:count` pairs of direct
        /// observations.
        pub self_observation_counts: Option<String>,
        /// Semicolon-separated `COMBINATION:count` pairs of descendant-only
        /// observations.
        pub descendant_observation_counts: Option<String>,
    }

    /// Read one of the TSV files using the `csv` crate via serde.
    ///
    /// # Errors
    ///
    /// In the case that the file could not be read.
    pub fn load_records<T, P>(path: &P) -> Result<Vec<T>, anyhow::Error>
    where
        T: serde::de::DeserializeOwned,
        P: AsRef<std::path::Path>,
    {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(open_read_maybe_gz(path)?);
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: T = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Parse a comma-separated list of data types.
    pub fn parse_data_types(value: &str) -> Result<BTreeSet<DataType>, anyhow::Error> {
        value
            .split(',')
            .filter(|token| !token.is_empty())
            .map(|token| {
                token
                    .parse::<DataType>()
                    .map_err(|_| anyhow::anyhow!("unknown data type: {:?}", token))
            })
            .collect()
    }

    /// Parse a comma-separated list of p-values.
    pub fn parse_p_values(value: Option<&str>) -> Result<Vec<f64>, anyhow::Error> {
        value
            .unwrap_or("")
            .split(',')
            .filter(|token| !token.is_empty())
            .map(|token| {
                token
                    .parse::<f64>()
                    .map_err(|e| anyhow::anyhow!("invalid p-value {:?}: {}", token, e))
            })
            .collect()
    }

    /// Parse semicolon-separated `COMBINATION:count` observation counts.
    pub fn parse_observation_counts(
        value: Option<&str>,
    ) -> Result<BTreeMap<ParamCombination, u64>, anyhow::Error> {
        let mut result = BTreeMap::new();
        for token in value.unwrap_or("").split(';').filter(|t| !t.is_empty()) {
            let (combination, count) = token
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("invalid observation count: {:?}", token))?;
            let combination = combination
                .parse::<ParamCombination>()
                .map_err(|e| anyhow::anyhow!("invalid combination {:?}: {}", combination, e))?;
            let count = count
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("invalid count {:?}: {}", count, e))?;
            result.insert(combination, count);
        }
        Ok(result)
    }
}

/// A calls database loaded from TSV files into memory.
#[derive(Debug, Clone, Default)]
pub struct TsvCallDb {
    /// Genes by internal identifier.
    genes: HashMap<u64, Gene>,
    /// Conditions by internal identifier.
    conditions: HashMap<u64, Condition>,
    /// Call rows, sorted by (gene, condition) identifier.
    rows: Vec<RawCallRow>,
}

impl TsvCallDb {
    /// Load the database files from the directory at `path_db`.
    pub fn load<P: AsRef<std::path::Path>>(path_db: P) -> Result<Self, anyhow::Error> {
        let genes = tsv::load_records::<tsv::GeneRecord, _>(&resolve_db_file(&path_db, "genes.tsv"))?
            .into_iter()
            .map(|record| {
                (
                    record.internal_id,
                    Gene::new(
                        record.internal_id,
                        record.stable_id,
                        record.name,
                        record.species_id,
                    ),
                )
            })
            .collect::<HashMap<_, _>>();

        let conditions = tsv::load_records::<tsv::ConditionRecord, _>(&resolve_db_file(
            &path_db,
            "conditions.tsv",
        ))?
        .into_iter()
        .map(|record| {
            (
                record.internal_id,
                Condition::new(
                    record.anat_entity_id,
                    record.cell_type_id,
                    record.dev_stage_id,
                    record.sex_id,
                    record.strain_id,
                    record.species_id,
                ),
            )
        })
        .collect::<HashMap<_, _>>();

        let records =
            tsv::load_records::<tsv::CallRecord, _>(&resolve_db_file(&path_db, "calls.tsv"))?;
        let mut grouped: BTreeMap<(u64, u64), RawCallRow> = BTreeMap::new();
        for record in records {
            let key = (record.gene_internal_id, record.condition_internal_id);
            let row = grouped.entry(key).or_insert_with(|| RawCallRow {
                gene_internal_id: record.gene_internal_id,
                condition_internal_id: record.condition_internal_id,
                ..Default::default()
            });

            let data_types = tsv::parse_data_types(&record.data_types)?;
            if record.fdr_p_value.is_some() || record.best_descendant_fdr_p_value.is_some() {
                row.p_values.push(RawPValue::new(
                    data_types.clone(),
                    record.fdr_p_value,
                    record.best_descendant_fdr_p_value,
                ));
            }
            if data_types.len() == 1 {
                let data_type = *data_types.iter().next().expect("length checked");
                row.evidence.push(RawDataTypeEvidence::new(
                    data_type,
                    tsv::parse_p_values(record.self_p_values.as_deref())?,
                    tsv::parse_p_values(record.descendant_p_values.as_deref())?,
                    record.rank,
                    record.normalized_rank,
                    record.weight_for_mean_rank,
                    tsv::parse_observation_counts(record.self_observation_counts.as_deref())?,
                    tsv::parse_observation_counts(
                        record.descendant_observation_counts.as_deref(),
                    )?,
                ));
            }
        }

        Ok(Self {
            genes,
            conditions,
            rows: grouped.into_values().collect(),
        })
    }

    /// Construct directly from in-memory parts (used by tests).
    pub fn from_parts(
        genes: HashMap<u64, Gene>,
        conditions: HashMap<u64, Condition>,
        mut rows: Vec<RawCallRow>,
    ) -> Self {
        rows.sort_by_key(|row| (row.gene_internal_id, row.condition_internal_id));
        Self {
            genes,
            conditions,
            rows,
        }
    }

    fn matches(&self, query: &CallQuery, row: &RawCallRow) -> bool {
        let (gene, condition) =
            match (self.genes.get(&row.gene_internal_id), self.conditions.get(&row.condition_internal_id)) {
                (Some(gene), Some(condition)) => (gene, condition),
                _ => {
                    warn!(
                        "row references unknown gene {} or condition {}",
                        row.gene_internal_id, row.condition_internal_id
                    );
                    return false;
                }
            };

        if let Some(species_id) = query.species_id {
            if gene.species_id != species_id || condition.species_id != species_id {
                return false;
            }
        }
        if !query.gene_stable_ids.is_empty() && !query.gene_stable_ids.contains(&gene.stable_id) {
            return false;
        }
        if !query.condition_predicates.is_empty()
            && !query
                .condition_predicates
                .iter()
                .any(|predicate| predicate.matches(condition))
        {
            return false;
        }
        if !query.p_value_predicate_groups.is_empty()
            && !query.p_value_predicate_groups.iter().any(|group| {
                group.p_value_predicates.iter().all(|predicate| {
                    predicate.holds(row.p_value(&predicate.data_types, predicate.variant))
                })
            })
        {
            return false;
        }
        if let Some(observed) = &query.observed_parameters {
            let key = observed.composed();
            let observed_count: u64 = row
                .evidence
                .iter()
                .filter(|evidence| query.data_types.contains(&evidence.data_type))
                .filter_map(|evidence| evidence.self_observation_counts.get(&key))
                .sum();
            if observed_count == 0 {
                return false;
            }
        }
        true
    }
}

impl CallStorage for TsvCallDb {
    fn load_rows(
        &self,
        query: &CallQuery,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<RawCallRow>, anyhow::Error> {
        Ok(self
            .rows
            .iter()
            .filter(|row| self.matches(query, row))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    fn count_rows(&self, query: &CallQuery) -> Result<u64, anyhow::Error> {
        Ok(self.rows.iter().filter(|row| self.matches(query, row)).count() as u64)
    }
}

impl GeneStore for TsvCallDb {
    fn genes_by_internal_ids(&self, ids: &[u64]) -> Result<HashMap<u64, Gene>, anyhow::Error> {
        Ok(ids
            .iter()
            .filter_map(|id| self.genes.get(id).map(|gene| (*id, gene.clone())))
            .collect())
    }
}

impl ConditionStore for TsvCallDb {
    fn conditions_by_internal_ids(
        &self,
        ids: &[u64],
    ) -> Result<HashMap<u64, Condition>, anyhow::Error> {
        Ok(ids
            .iter()
            .filter_map(|id| self.conditions.get(id).map(|cond| (*id, cond.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::calls::params::ConditionParameter::*;

    fn data_types(types: &[DataType]) -> BTreeSet<DataType> {
        types.iter().copied().collect()
    }

    #[test]
    fn p_value_predicate_holds() {
        let predicate = PValuePredicate::new(
            data_types(&[DataType::RnaSeq]),
            PValueVariant::SelfAndDescendant,
            PValueComparison::LessOrEqual,
            0.05,
        );

        assert!(predicate.holds(Some(0.05)));
        assert!(predicate.holds(Some(0.01)));
        assert!(!predicate.holds(Some(0.0500001)));
        assert!(!predicate.holds(None));

        let predicate = PValuePredicate::new(
            data_types(&[DataType::RnaSeq]),
            PValueVariant::SelfAndDescendant,
            PValueComparison::Greater,
            0.1,
        );

        assert!(predicate.holds(Some(0.2)));
        assert!(!predicate.holds(Some(0.1)));
        assert!(!predicate.holds(None));
    }

    #[test]
    fn condition_predicate_matches() {
        let mut predicate = ConditionPredicate::default();
        predicate
            .anat_entity_ids
            .insert("UBERON:0002107".to_string());
        predicate
            .dev_stage_ids
            .insert(ConditionParameter::DevStage.root_term_id().to_string());

        // absent stage counts as the root
        let condition = Condition::new(
            Some("UBERON:0002107".to_string()),
            None,
            None,
            None,
            None,
            10090,
        );
        assert!(predicate.matches(&condition));

        let condition = Condition::new(
            Some("UBERON:0000062".to_string()),
            None,
            None,
            None,
            None,
            10090,
        );
        assert!(!predicate.matches(&condition));
    }

    #[test]
    fn condition_predicate_matches_strain_case_insensitively() {
        let mut predicate = ConditionPredicate::default();
        predicate.strain_ids.insert("C57BL/6J".to_string());

        let condition = Condition::new(None, None, None, None, Some("c57bl/6j".to_string()), 10090);
        assert!(predicate.matches(&condition));
    }

    #[test]
    fn raw_call_row_p_value_lookup() {
        let row = RawCallRow {
            gene_internal_id: 1,
            condition_internal_id: 2,
            p_values: vec![RawPValue::new(
                data_types(&[DataType::RnaSeq]),
                Some(0.01),
                None,
            )],
            evidence: vec![],
        };

        assert_eq!(
            row.p_value(&data_types(&[DataType::RnaSeq]), PValueVariant::SelfAndDescendant),
            Some(0.01)
        );
        assert_eq!(
            row.p_value(&data_types(&[DataType::RnaSeq]), PValueVariant::DescendantOnly),
            None
        );
        assert_eq!(
            row.p_value(&data_types(&[DataType::Est]), PValueVariant::SelfAndDescendant),
            None
        );
    }

    #[test]
    fn parse_helpers() -> Result<(), anyhow::Error> {
        assert_eq!(
            tsv::parse_data_types("AFFYMETRIX,RNA_SEQ")?,
            data_types(&[DataType::Affymetrix, DataType::RnaSeq])
        );
        assert!(tsv::parse_data_types("AFFYMETRIX,BOGUS").is_err());

        assert_eq!(tsv::parse_p_values(Some("0.5,0.01"))?, vec![0.5, 0.01]);
        assert_eq!(tsv::parse_p_values(None)?, Vec::<f64>::new());

        let counts = tsv::parse_observation_counts(Some("ANATOMY:2;ANATOMY+DEV_STAGE:1"))?;
        assert_eq!(
            counts.get(&ParamCombination::new([Anatomy]).unwrap()),
            Some(&2)
        );
        assert_eq!(
            counts.get(&ParamCombination::new([Anatomy, DevStage]).unwrap()),
            Some(&1)
        );
        assert!(tsv::parse_observation_counts(Some("ANATOMY")).is_err());

        Ok(())
    }

    fn example_db() -> TsvCallDb {
        let genes = [
            (1, Gene::new(1, "ENSMUSG00000041147".to_string(), "Brca2".to_string(), 10090)),
            (2, Gene::new(2, "ENSMUSG00000017146".to_string(), "Brca1".to_string(), 10090)),
        ]
        .into_iter()
        .collect();
        let conditions = [
            (
                10,
                Condition::new(
                    Some("UBERON:0002107".to_string()),
                    None,
                    None,
                    None,
                    None,
                    10090,
                ),
            ),
            (
                11,
                Condition::new(
                    Some("UBERON:0000062".to_string()),
                    None,
                    None,
                    None,
                    None,
                    10090,
                ),
            ),
        ]
        .into_iter()
        .collect();
        let rows = vec![
            RawCallRow {
                gene_internal_id: 1,
                condition_internal_id: 10,
                p_values: vec![RawPValue::new(
                    data_types(&[DataType::RnaSeq]),
                    Some(0.001),
                    Some(0.0005),
                )],
                evidence: vec![RawDataTypeEvidence::new(
                    DataType::RnaSeq,
                    vec![0.001],
                    vec![0.0005],
                    Some(5.0),
                    None,
                    Some(1.0),
                    [(ParamCombination::new([Anatomy]).unwrap(), 2)]
                        .into_iter()
                        .collect(),
                    BTreeMap::new(),
                )],
            },
            RawCallRow {
                gene_internal_id: 2,
                condition_internal_id: 11,
                p_values: vec![RawPValue::new(
                    data_types(&[DataType::RnaSeq]),
                    Some(0.5),
                    None,
                )],
                evidence: vec![RawDataTypeEvidence::new(
                    DataType::RnaSeq,
                    vec![0.5],
                    vec![],
                    None,
                    None,
                    None,
                    BTreeMap::new(),
                    BTreeMap::new(),
                )],
            },
        ];
        TsvCallDb::from_parts(genes, conditions, rows)
    }

    fn unrestricted_query() -> CallQuery {
        CallQuery {
            species_id: Some(10090),
            gene_stable_ids: IndexSet::new(),
            condition_predicates: vec![],
            p_value_predicate_groups: vec![],
            observed_parameters: None,
            parameter_combination: ParamCombination::all(),
            provenance_combinations: vec![],
            data_types: DataType::all(),
            attributes: IndexSet::new(),
        }
    }

    #[test]
    fn load_rows_applies_p_value_groups() -> Result<(), anyhow::Error> {
        let db = example_db();
        let mut query = unrestricted_query();
        query.p_value_predicate_groups = vec![CallPredicateGroup {
            p_value_predicates: vec![PValuePredicate::new(
                data_types(&[DataType::RnaSeq]),
                PValueVariant::SelfAndDescendant,
                PValueComparison::LessOrEqual,
                0.05,
            )],
        }];

        let rows = db.load_rows(&query, 0, 100)?;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].gene_internal_id, 1);
        assert_eq!(db.count_rows(&query)?, 1);

        Ok(())
    }

    #[test]
    fn load_rows_applies_observed_constraint() -> Result<(), anyhow::Error> {
        let db = example_db();
        let mut query = unrestricted_query();
        query.observed_parameters = Some(ParamCombination::new([Anatomy]).unwrap());

        let rows = db.load_rows(&query, 0, 100)?;

        // only the first row carries a direct observation for ANATOMY
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].gene_internal_id, 1);

        Ok(())
    }

    #[test]
    fn load_rows_pages_deterministically() -> Result<(), anyhow::Error> {
        let db = example_db();
        let query = unrestricted_query();

        assert_eq!(db.count_rows(&query)?, 2);
        let page_one = db.load_rows(&query, 0, 1)?;
        let page_two = db.load_rows(&query, 1, 1)?;

        assert_eq!(page_one.len(), 1);
        assert_eq!(page_two.len(), 1);
        assert_eq!(page_one[0].gene_internal_id, 1);
        assert_eq!(page_two[0].gene_internal_id, 2);

        Ok(())
    }

    #[test]
    fn load_from_tsv_files() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        std::fs::write(
            tmp_dir.path().join("genes.tsv"),
            "internal_id\tstable_id\tname\tspecies_id\n\
             1\tENSMUSG00000041147\tBrca2\t10090\n",
        )?;
        std::fs::write(
            tmp_dir.path().join("conditions.tsv"),
            "internal_id\tspecies_id\tanat_entity_id\tcell_type_id\tdev_stage_id\tsex_id\tstrain_id\n\
             10\t10090\tUBERON:0002107\t\t\t\t\n",
        )?;
        std::fs::write(
            tmp_dir.path().join("calls.tsv"),
            "gene_internal_id\tcondition_internal_id\tdata_types\tfdr_p_value\tbest_descendant_fdr_p_value\trank\tnormalized_rank\tweight_for_mean_rank\tself_p_values\tdescendant_p_values\tself_observation_counts\tdescendant_observation_counts\n\
             1\t10\tRNA_SEQ\t0.001\t0.0005\t5.0\t\t1.0\t0.001\t0.0005\tANATOMY:2\t\n\
             1\t10\tAFFYMETRIX,RNA_SEQ\t0.002\t\t\t\t\t\t\t\t\n",
        )?;

        let db = TsvCallDb::load(tmp_dir.path())?;

        let rows = db.load_rows(&unrestricted_query(), 0, 10)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].p_values.len(), 2);
        assert_eq!(rows[0].evidence.len(), 1);
        assert_eq!(
            rows[0].p_value(
                &data_types(&[DataType::Affymetrix, DataType::RnaSeq]),
                PValueVariant::SelfAndDescendant
            ),
            Some(0.002)
        );

        let genes = db.genes_by_internal_ids(&[1, 999])?;
        assert_eq!(genes.len(), 1);
        let conditions = db.conditions_by_internal_ids(&[10])?;
        assert_eq!(
            conditions.get(&10).and_then(|c| c.anat_entity_id.clone()),
            Some("UBERON:0002107".to_string())
        );

        Ok(())
    }
}
