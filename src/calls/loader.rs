//! Paging loader assembling expression calls from storage rows.

use std::collections::{BTreeSet, HashMap, HashSet};

use indexmap::IndexSet;
use tracing::trace;

use crate::common::MAX_PAGE_SIZE;

use super::{
    inference::{infer_summary_call, summary_call},
    predicates::{self, convert},
    propagation::{self, merge_data_propagations},
    schema::data::{
        gene_expression_call, CallData, Condition, DataPropagation, FdrPValue, Gene,
        GeneExpressionCall,
    },
    schema::query::{CallAttribute, DataType, GeneCallFilter},
    score::expression_score,
    storage::{CallQuery, CallStorage, ConditionStore, GeneStore, RawCallRow, RawPValue},
    thresholds::PValueThresholds,
};

/// Supporting code for `CallLoader`.
pub(crate) mod call_loader {
    /// Error type for loading calls.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        /// Invalid-argument: the page size is out of bounds.
        #[error("limit must be in 1..=10000, got {limit}")]
        InvalidLimit { limit: u32 },
        /// Invalid-argument: the filter could not be converted.
        #[error("invalid filter: {0}")]
        Convert(#[from] super::convert::Error),
        /// The storage collaborator failed.
        #[error("storage error: {0}")]
        Storage(String),
        /// Illegal-state: a row references a gene the store cannot resolve.
        #[error("cannot resolve gene with internal id {0}")]
        UnresolvedGene(u64),
        /// Illegal-state: a row references a condition the store cannot
        /// resolve.
        #[error("cannot resolve condition with internal id {0}")]
        UnresolvedCondition(u64),
        /// Illegal-state: call inference failed for a row.
        #[error("call inference failed for gene {gene_internal_id}: {source}")]
        Inference {
            gene_internal_id: u64,
            #[source]
            source: super::summary_call::Error,
        },
        /// Illegal-state: a row violates a call invariant.
        #[error("invalid call row for gene {gene_internal_id}: {source}")]
        InvalidRow {
            gene_internal_id: u64,
            #[source]
            source: super::gene_expression_call::Error,
        },
        /// Illegal-state: observation provenance was requested but a
        /// contributing data type carries none.
        #[error("missing data propagation for gene {gene_internal_id}")]
        MissingPropagation { gene_internal_id: u64 },
        /// Illegal-state: merging the per-data-type provenance failed.
        #[error("cannot merge data propagation for gene {gene_internal_id}: {source}")]
        Merge {
            gene_internal_id: u64,
            #[source]
            source: super::propagation::merge::Error,
        },
        /// Illegal-state: the species maximal rank is not configured.
        #[error("no max rank configured for species {0}")]
        MissingMaxRank(u32),
        /// Invalid-argument or illegal-state from score computation.
        #[error("expression score failed: {0}")]
        Score(#[from] super::expression_score::Error),
    }

    impl From<anyhow::Error> for Error {
        fn from(e: anyhow::Error) -> Self {
            Error::Storage(format!("{:#}", e))
        }
    }
}

/// A bounded lookup cache retaining at most roughly `capacity` entries.
///
/// When the cache exceeds its capacity after serving a batch, only the keys
/// of the current batch are retained. Owned by a single loader; never
/// shared.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
}

impl<K, V> BoundedCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache bounded to roughly `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
        }
    }

    /// Look up a cached value.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Insert a value.
    pub fn insert(&mut self, key: K, value: V) {
        self.map.insert(key, value);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Evict entries not belonging to the current batch if the cache grew
    /// beyond its capacity.
    pub fn retain_batch(&mut self, batch: &HashSet<K>) {
        if self.map.len() > self.capacity {
            self.map.retain(|key, _| batch.contains(key));
        }
    }
}

/// Default capacity of the per-loader lookup caches.
const CACHE_CAPACITY: usize = 100_000;

/// Loads pages of expression calls for one converted filter.
///
/// One loader serves one logical cursor; its caches avoid redundant store
/// round trips across successive pages and must not be shared between
/// cursors.
pub struct CallLoader<'a, S, G, C>
where
    S: CallStorage,
    G: GeneStore,
    C: ConditionStore,
{
    storage: &'a S,
    gene_store: &'a G,
    condition_store: &'a C,
    query: CallQuery,
    thresholds: PValueThresholds,
    /// Maximal rank per species, denominator of the expression score.
    max_ranks: HashMap<u32, f64>,
    gene_cache: BoundedCache<u64, Gene>,
    condition_cache: BoundedCache<u64, Condition>,
}

impl<'a, S, G, C> CallLoader<'a, S, G, C>
where
    S: CallStorage,
    G: GeneStore,
    C: ConditionStore,
{
    /// Create a loader for the given filter and requested attributes.
    pub fn new(
        filter: &GeneCallFilter,
        attributes: IndexSet<CallAttribute>,
        thresholds: PValueThresholds,
        max_ranks: HashMap<u32, f64>,
        storage: &'a S,
        gene_store: &'a G,
        condition_store: &'a C,
    ) -> Result<Self, call_loader::Error> {
        let query = predicates::convert_filter(filter, attributes, &thresholds)?;
        Ok(Self {
            storage,
            gene_store,
            condition_store,
            query,
            thresholds,
            max_ranks,
            gene_cache: BoundedCache::with_capacity(CACHE_CAPACITY),
            condition_cache: BoundedCache::with_capacity(CACHE_CAPACITY),
        })
    }

    /// The converted query handed to storage.
    pub fn query(&self) -> &CallQuery {
        &self.query
    }

    /// Load one page of calls.
    ///
    /// `offset` defaults to 0 and `limit` to the maximal page size; a limit
    /// of 0 or above the maximum is an error.
    pub fn load(
        &mut self,
        offset: Option<u64>,
        limit: Option<u32>,
    ) -> Result<Vec<GeneExpressionCall>, call_loader::Error> {
        let offset = offset.unwrap_or(0);
        let limit = limit.unwrap_or(MAX_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(call_loader::Error::InvalidLimit { limit });
        }

        let rows = self.storage.load_rows(&self.query, offset, limit)?;
        trace!("loaded {} raw rows at offset {}", rows.len(), offset);

        let genes = self.resolve_genes(&rows)?;
        let conditions = self.resolve_conditions(&rows)?;

        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let gene = match genes.get(&row.gene_internal_id) {
                Some(gene) => gene.clone(),
                None if self.query.attributes.contains(&CallAttribute::Gene) => {
                    return Err(call_loader::Error::UnresolvedGene(row.gene_internal_id));
                }
                None => Gene {
                    internal_id: row.gene_internal_id,
                    ..Default::default()
                },
            };
            let condition = match conditions.get(&row.condition_internal_id) {
                Some(condition) => condition.clone(),
                None if self.condition_requested() => {
                    return Err(call_loader::Error::UnresolvedCondition(
                        row.condition_internal_id,
                    ));
                }
                None => Condition::default(),
            };
            result.push(self.assemble(row, gene, condition)?);
        }
        Ok(result)
    }

    /// Count the calls the filter matches without materializing them.
    pub fn load_count(&self) -> Result<u64, call_loader::Error> {
        Ok(self.storage.count_rows(&self.query)?)
    }

    fn condition_requested(&self) -> bool {
        self.query
            .attributes
            .iter()
            .any(|attr| attr.condition_parameter().is_some())
    }

    fn resolve_genes(
        &mut self,
        rows: &[RawCallRow],
    ) -> Result<HashMap<u64, Gene>, call_loader::Error> {
        let batch: HashSet<u64> = rows.iter().map(|row| row.gene_internal_id).collect();
        let mut resolved = HashMap::new();
        let mut missing = Vec::new();
        for id in &batch {
            match self.gene_cache.get(id) {
                Some(gene) => {
                    resolved.insert(*id, gene.clone());
                }
                None => missing.push(*id),
            }
        }
        if !missing.is_empty() {
            for (id, gene) in self.gene_store.genes_by_internal_ids(&missing)? {
                self.gene_cache.insert(id, gene.clone());
                resolved.insert(id, gene);
            }
        }
        self.gene_cache.retain_batch(&batch);
        Ok(resolved)
    }

    fn resolve_conditions(
        &mut self,
        rows: &[RawCallRow],
    ) -> Result<HashMap<u64, Condition>, call_loader::Error> {
        let batch: HashSet<u64> = rows.iter().map(|row| row.condition_internal_id).collect();
        let mut resolved = HashMap::new();
        let mut missing = Vec::new();
        for id in &batch {
            match self.condition_cache.get(id) {
                Some(condition) => {
                    resolved.insert(*id, condition.clone());
                }
                None => missing.push(*id),
            }
        }
        if !missing.is_empty() {
            for (id, condition) in self.condition_store.conditions_by_internal_ids(&missing)? {
                self.condition_cache.insert(id, condition.clone());
                resolved.insert(id, condition);
            }
        }
        self.condition_cache.retain_batch(&batch);
        Ok(resolved)
    }

    /// Assemble one call from a raw row, populating only the requested
    /// attributes.
    fn assemble(
        &self,
        row: &RawCallRow,
        gene: Gene,
        condition: Condition,
    ) -> Result<GeneExpressionCall, call_loader::Error> {
        let attributes = &self.query.attributes;
        let requested_data_types = &self.query.data_types;

        let evidence = row
            .evidence
            .iter()
            .filter(|e| requested_data_types.contains(&e.data_type))
            .collect::<Vec<_>>();

        let fdr_p_values = collect_p_values(row, requested_data_types, |p| p.fdr_p_value);
        let best_descendant_p_values =
            collect_p_values(row, requested_data_types, |p| p.best_descendant_fdr_p_value);

        let (summary_call_type, summary_quality) = if attributes.contains(&CallAttribute::CallType)
            || attributes.contains(&CallAttribute::Quality)
        {
            let summary = infer_summary_call(
                &fdr_p_values,
                &best_descendant_p_values,
                requested_data_types,
                &self.thresholds,
            )
            .map_err(|source| call_loader::Error::Inference {
                gene_internal_id: row.gene_internal_id,
                source,
            })?;
            (Some(summary.call_type), Some(summary.quality))
        } else {
            (None, None)
        };

        let observed_requested = attributes.contains(&CallAttribute::ObservedData);
        let data_propagation = if observed_requested {
            let per_data_type = evidence
                .iter()
                .map(|&e| {
                    let propagation = evidence_propagation(e);
                    if propagation.self_observation_counts.is_empty()
                        && propagation.descendant_observation_counts.is_empty()
                    {
                        Err(call_loader::Error::MissingPropagation {
                            gene_internal_id: row.gene_internal_id,
                        })
                    } else {
                        Ok(propagation)
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Some(
                merge_data_propagations(per_data_type.iter()).map_err(|source| {
                    call_loader::Error::Merge {
                        gene_internal_id: row.gene_internal_id,
                        source,
                    }
                })?,
            )
        } else {
            None
        };

        let rank_requested = attributes.contains(&CallAttribute::MeanRank)
            || attributes.contains(&CallAttribute::ExpressionScore);
        let mean_rank = if rank_requested {
            weighted_mean_rank(&evidence)
        } else {
            None
        };
        let expression_score_value = if attributes.contains(&CallAttribute::ExpressionScore) {
            let max_rank = self
                .max_ranks
                .get(&condition.species_id)
                .copied()
                .ok_or(call_loader::Error::MissingMaxRank(condition.species_id))?;
            expression_score(mean_rank, max_rank)?
        } else {
            None
        };

        let call_data = if attributes.contains(&CallAttribute::PValueInfoEachDataType) {
            evidence
                .iter()
                .map(|&e| {
                    let single: BTreeSet<DataType> = [e.data_type].into_iter().collect();
                    CallData::new(
                        e.data_type,
                        e.self_p_values.clone(),
                        e.descendant_p_values.clone(),
                        fdr_p_values
                            .iter()
                            .find(|p| p.data_types == single)
                            .cloned(),
                        best_descendant_p_values
                            .iter()
                            .find(|p| p.data_types == single)
                            .cloned(),
                        e.rank,
                        e.normalized_rank,
                        e.weight_for_mean_rank,
                        observed_requested.then(|| evidence_propagation(e)),
                    )
                })
                .collect()
        } else {
            Vec::new()
        };

        let p_value_info_requested = attributes.contains(&CallAttribute::PValueInfoAllDataTypes);
        GeneExpressionCall::new(
            gene,
            condition,
            summary_call_type,
            summary_quality,
            if p_value_info_requested {
                fdr_p_values
            } else {
                Vec::new()
            },
            if p_value_info_requested {
                best_descendant_p_values
            } else {
                Vec::new()
            },
            call_data,
            if rank_requested { mean_rank } else { None },
            expression_score_value,
            data_propagation,
        )
        .map_err(|source| call_loader::Error::InvalidRow {
            gene_internal_id: row.gene_internal_id,
            source,
        })
    }
}

/// Collect one p-value variant of a row, restricted to the requested data
/// types.
fn collect_p_values<F>(
    row: &RawCallRow,
    requested_data_types: &BTreeSet<DataType>,
    value_of: F,
) -> Vec<FdrPValue>
where
    F: Fn(&RawPValue) -> Option<f64>,
{
    row.p_values
        .iter()
        .filter(|p| p.data_types.is_subset(requested_data_types))
        .filter_map(|p| value_of(p).map(|value| FdrPValue::new(value, p.data_types.clone())))
        .collect()
}

/// Build the provenance value of one evidence entry.
fn evidence_propagation(evidence: &super::storage::RawDataTypeEvidence) -> DataPropagation {
    DataPropagation {
        self_observation_counts: evidence.self_observation_counts.clone(),
        descendant_observation_counts: evidence.descendant_observation_counts.clone(),
    }
}

/// The weighted mean of the per-data-type ranks.
///
/// Evidence without a rank is skipped; a missing weight counts as 1.
fn weighted_mean_rank(evidence: &[&super::storage::RawDataTypeEvidence]) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;
    for e in evidence {
        if let Some(rank) = e.rank {
            let weight = e.weight_for_mean_rank.unwrap_or(1.0);
            weighted_sum += rank * weight;
            weight_sum += weight;
        }
    }
    if weight_sum > 0.0 {
        Some(weighted_sum / weight_sum)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap, HashSet};

    use pretty_assertions::assert_eq;

    use super::{call_loader, BoundedCache, CallLoader};
    use crate::calls::{
        params::{ConditionParameter::*, ParamCombination},
        schema::data::{Condition, Gene},
        schema::query::{
            CallAttribute, DataType, GeneCallFilter, SummaryCallType, SummaryQuality,
        },
        storage::{
            CallQuery, CallStorage, RawCallRow, RawDataTypeEvidence, RawPValue, TsvCallDb,
        },
        thresholds::PValueThresholds,
    };

    fn data_types(types: &[DataType]) -> std::collections::BTreeSet<DataType> {
        types.iter().copied().collect()
    }

    fn example_db() -> TsvCallDb {
        let genes = [(
            1,
            Gene::new(1, "ENSMUSG00000041147".to_string(), "Brca2".to_string(), 10090),
        )]
        .into_iter()
        .collect();
        let conditions = [(
            10,
            Condition::new(
                Some("UBERON:0002107".to_string()),
                None,
                None,
                None,
                None,
                10090,
            ),
        )]
        .into_iter()
        .collect();
        let requested = data_types(&[DataType::Affymetrix, DataType::RnaSeq]);
        let rows = vec![RawCallRow {
            gene_internal_id: 1,
            condition_internal_id: 10,
            p_values: vec![
                RawPValue::new(requested, Some(0.001), Some(0.0005)),
                RawPValue::new(data_types(&[DataType::RnaSeq]), Some(0.002), None),
                RawPValue::new(data_types(&[DataType::Affymetrix]), Some(0.03), None),
            ],
            evidence: vec![
                RawDataTypeEvidence::new(
                    DataType::RnaSeq,
                    vec![0.002],
                    vec![0.0005],
                    Some(10.0),
                    Some(12.0),
                    Some(2.0),
                    [(ParamCombination::new([Anatomy]).unwrap(), 2)]
                        .into_iter()
                        .collect(),
                    BTreeMap::new(),
                ),
                RawDataTypeEvidence::new(
                    DataType::Affymetrix,
                    vec![0.03],
                    vec![],
                    Some(40.0),
                    None,
                    Some(1.0),
                    [(ParamCombination::new([Anatomy]).unwrap(), 1)]
                        .into_iter()
                        .collect(),
                    [(ParamCombination::new([Anatomy]).unwrap(), 3)]
                        .into_iter()
                        .collect(),
                ),
            ],
        }];
        TsvCallDb::from_parts(genes, conditions, rows)
    }

    fn example_filter() -> GeneCallFilter {
        GeneCallFilter {
            species_id: Some(10090),
            gene_ids: vec!["ENSMUSG00000041147".to_string()],
            data_types: data_types(&[DataType::Affymetrix, DataType::RnaSeq]),
            ..Default::default()
        }
    }

    fn max_ranks() -> HashMap<u32, f64> {
        [(10090, 100.0)].into_iter().collect()
    }

    #[test]
    fn bounded_cache_retains_current_batch() {
        let mut cache = BoundedCache::with_capacity(2);
        cache.insert(1u64, "one");
        cache.insert(2u64, "two");
        cache.insert(3u64, "three");

        let batch: HashSet<u64> = [2, 3].into_iter().collect();
        cache.retain_batch(&batch);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&1).is_none());
        assert!(cache.get(&2).is_some());
        assert!(cache.get(&3).is_some());

        // under capacity nothing is evicted
        let batch: HashSet<u64> = [2].into_iter().collect();
        cache.retain_batch(&batch);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn load_rejects_invalid_limits() -> Result<(), call_loader::Error> {
        let db = example_db();
        let mut loader = CallLoader::new(
            &example_filter(),
            CallAttribute::all(),
            PValueThresholds::default(),
            max_ranks(),
            &db,
            &db,
            &db,
        )?;

        assert!(matches!(
            loader.load(None, Some(0)),
            Err(call_loader::Error::InvalidLimit { limit: 0 })
        ));
        assert!(matches!(
            loader.load(None, Some(10_001)),
            Err(call_loader::Error::InvalidLimit { limit: 10_001 })
        ));

        Ok(())
    }

    #[test]
    fn load_assembles_full_call() -> Result<(), call_loader::Error> {
        let db = example_db();
        let mut loader = CallLoader::new(
            &example_filter(),
            CallAttribute::all(),
            PValueThresholds::default(),
            max_ranks(),
            &db,
            &db,
            &db,
        )?;

        let calls = loader.load(None, None)?;
        assert_eq!(calls.len(), 1);
        let call = &calls[0];

        assert_eq!(call.gene.stable_id, "ENSMUSG00000041147");
        assert_eq!(
            call.condition.anat_entity_id.as_deref(),
            Some("UBERON:0002107")
        );
        // P_all = 0.001 <= 0.01
        assert_eq!(call.summary_call_type, Some(SummaryCallType::Expressed));
        assert_eq!(call.summary_quality, Some(SummaryQuality::Gold));
        // weighted mean rank: (10 * 2 + 40 * 1) / 3 = 20
        assert_eq!(call.mean_rank, Some(20.0));
        // score: (100 + 1 - 20) * 100 / 100 = 81
        assert_eq!(call.expression_score, Some(81.0));
        // propagation merged across the two data types
        let propagation = call.data_propagation.as_ref().expect("propagation");
        assert_eq!(
            propagation
                .self_observation_counts
                .get(&ParamCombination::new([Anatomy]).unwrap()),
            Some(&3)
        );
        assert_eq!(
            propagation
                .descendant_observation_counts
                .get(&ParamCombination::new([Anatomy]).unwrap()),
            Some(&3)
        );
        // per-data-type detail present and sorted
        assert_eq!(call.call_data.len(), 2);
        let rna = call.call_data_for(DataType::RnaSeq).expect("rna data");
        assert_eq!(rna.fdr_p_value.as_ref().map(|p| p.p_value), Some(0.002));

        assert_eq!(loader.load_count()?, 1);

        Ok(())
    }

    #[test]
    fn load_skips_unrequested_attributes() -> Result<(), call_loader::Error> {
        let db = example_db();
        let attributes = [CallAttribute::Gene, CallAttribute::CallType]
            .into_iter()
            .collect();
        let mut loader = CallLoader::new(
            &example_filter(),
            attributes,
            PValueThresholds::default(),
            max_ranks(),
            &db,
            &db,
            &db,
        )?;

        let calls = loader.load(None, None)?;
        let call = &calls[0];

        assert_eq!(call.summary_call_type, Some(SummaryCallType::Expressed));
        assert_eq!(call.mean_rank, None);
        assert_eq!(call.expression_score, None);
        assert_eq!(call.data_propagation, None);
        assert!(call.call_data.is_empty());
        assert!(call.fdr_p_values.is_empty());

        Ok(())
    }

    #[test]
    fn missing_max_rank_is_an_error() -> Result<(), call_loader::Error> {
        let db = example_db();
        let mut loader = CallLoader::new(
            &example_filter(),
            CallAttribute::all(),
            PValueThresholds::default(),
            HashMap::new(),
            &db,
            &db,
            &db,
        )?;

        assert!(matches!(
            loader.load(None, None),
            Err(call_loader::Error::MissingMaxRank(10090))
        ));

        Ok(())
    }

    /// Storage stub returning rows that reference unknown identifiers.
    struct OrphanStorage;

    impl CallStorage for OrphanStorage {
        fn load_rows(
            &self,
            _query: &CallQuery,
            _offset: u64,
            _limit: u32,
        ) -> Result<Vec<RawCallRow>, anyhow::Error> {
            Ok(vec![RawCallRow {
                gene_internal_id: 42,
                condition_internal_id: 43,
                p_values: vec![RawPValue::new(DataType::all(), Some(0.001), None)],
                evidence: vec![],
            }])
        }

        fn count_rows(&self, _query: &CallQuery) -> Result<u64, anyhow::Error> {
            Ok(1)
        }
    }

    struct EmptyStores;

    impl crate::calls::storage::GeneStore for EmptyStores {
        fn genes_by_internal_ids(
            &self,
            _ids: &[u64],
        ) -> Result<HashMap<u64, Gene>, anyhow::Error> {
            Ok(HashMap::new())
        }
    }

    impl crate::calls::storage::ConditionStore for EmptyStores {
        fn conditions_by_internal_ids(
            &self,
            _ids: &[u64],
        ) -> Result<HashMap<u64, Condition>, anyhow::Error> {
            Ok(HashMap::new())
        }
    }

    #[test]
    fn unresolved_gene_is_fatal_when_requested() -> Result<(), call_loader::Error> {
        let storage = OrphanStorage;
        let stores = EmptyStores;
        let filter = GeneCallFilter {
            species_id: None,
            ..example_filter()
        };
        let mut loader = CallLoader::new(
            &filter,
            [CallAttribute::Gene].into_iter().collect(),
            PValueThresholds::default(),
            max_ranks(),
            &storage,
            &stores,
            &stores,
        )?;

        assert!(matches!(
            loader.load(None, None),
            Err(call_loader::Error::UnresolvedGene(42))
        ));

        Ok(())
    }

    #[test]
    fn unresolved_gene_is_tolerated_when_not_requested() -> Result<(), call_loader::Error> {
        let storage = OrphanStorage;
        let stores = EmptyStores;
        let filter = GeneCallFilter {
            species_id: None,
            data_types: Default::default(),
            ..example_filter()
        };
        let mut loader = CallLoader::new(
            &filter,
            [CallAttribute::CallType].into_iter().collect(),
            PValueThresholds::default(),
            max_ranks(),
            &storage,
            &stores,
            &stores,
        )?;

        let calls = loader.load(None, None)?;

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].gene.internal_id, 42);
        assert_eq!(calls[0].gene.stable_id, "");
        assert_eq!(calls[0].summary_call_type, Some(SummaryCallType::Expressed));

        Ok(())
    }

    #[test]
    fn missing_propagation_is_fatal_when_observed_data_requested(
    ) -> Result<(), call_loader::Error> {
        let genes = [(1, Gene::new(1, "G1".to_string(), "g1".to_string(), 10090))]
            .into_iter()
            .collect();
        let conditions = [(10, Condition::new(None, None, None, None, None, 10090))]
            .into_iter()
            .collect();
        let rows = vec![RawCallRow {
            gene_internal_id: 1,
            condition_internal_id: 10,
            p_values: vec![RawPValue::new(
                data_types(&[DataType::RnaSeq]),
                Some(0.001),
                None,
            )],
            evidence: vec![RawDataTypeEvidence::new(
                DataType::RnaSeq,
                vec![0.001],
                vec![],
                None,
                None,
                None,
                BTreeMap::new(),
                BTreeMap::new(),
            )],
        }];
        let db = TsvCallDb::from_parts(genes, conditions, rows);
        let filter = GeneCallFilter {
            species_id: Some(10090),
            gene_ids: vec!["G1".to_string()],
            data_types: data_types(&[DataType::RnaSeq]),
            ..Default::default()
        };
        let mut loader = CallLoader::new(
            &filter,
            [CallAttribute::ObservedData].into_iter().collect(),
            PValueThresholds::default(),
            max_ranks(),
            &db,
            &db,
            &db,
        )?;

        assert!(matches!(
            loader.load(None, None),
            Err(call_loader::Error::MissingPropagation { gene_internal_id: 1 })
        ));

        Ok(())
    }
}
