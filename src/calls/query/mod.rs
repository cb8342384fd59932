//! Code implementing the "calls query" sub command.

use std::{collections::BTreeMap, time::Instant};

use anyhow::anyhow;
use clap::{command, Parser};
use indexmap::{IndexMap, IndexSet};
use thousands::Separable;
use tracing::{error, info};

use crate::{
    calls::graph::{ConditionGraph, ConditionGraphOntologies},
    calls::loader::CallLoader,
    calls::params::ConditionParameter,
    calls::schema::data::{Condition, GeneExpressionCall},
    calls::schema::query::{CallAttribute, GeneCallFilter, SummaryCallType},
    calls::sorting::ByGeneAndPrecision,
    calls::storage::TsvCallDb,
    calls::thresholds::PValueThresholds,
    common::{open_read_maybe_gz, trace_rss_now, MAX_PAGE_SIZE},
    conf::{self, resolve_db_file},
    ontology::{Ontology, OntologyBundle},
};

/// Command line arguments for `calls query` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Run query for expression calls", long_about = None)]
pub struct Args {
    /// Path to the calls database directory.
    #[arg(long, required = true)]
    pub path_db: String,
    /// Path to query JSON file.
    #[arg(long, required = true)]
    pub path_query_json: String,
    /// Path to the output TSV file.
    #[arg(long, required = true)]
    pub path_output: String,

    /// Optional maximal number of total records to write out.
    #[arg(long)]
    pub max_results: Option<usize>,
    /// Remove calls whose condition is an ancestor of another result
    /// condition of the same gene.
    #[arg(long, default_value_t = false)]
    pub filter_redundant: bool,
    /// Disable the database sanity checks.
    #[arg(long, default_value_t = false)]
    pub disable_sanity_checks: bool,
}

/// Utility struct to store statistics about counts.
#[derive(Debug, Default)]
struct QueryStats {
    pub count_total: usize,
    pub count_written: usize,
    pub by_call_type: BTreeMap<SummaryCallType, usize>,
    pub by_data_type: enum_map::EnumMap<crate::calls::schema::query::DataType, usize>,
}

/// One line of the output TSV file.
#[derive(Debug, serde::Serialize)]
struct OutputRecord {
    gene_id: String,
    gene_name: String,
    species_id: u32,
    anat_entity_id: Option<String>,
    cell_type_id: Option<String>,
    dev_stage_id: Option<String>,
    sex_id: Option<String>,
    strain_id: Option<String>,
    call_type: Option<SummaryCallType>,
    quality: Option<crate::calls::schema::query::SummaryQuality>,
    fdr_p_value: Option<f64>,
    best_descendant_fdr_p_value: Option<f64>,
    mean_rank: Option<f64>,
    expression_score: Option<f64>,
    observed: bool,
}

impl OutputRecord {
    fn from_call(call: &GeneExpressionCall, filter: &GeneCallFilter) -> Self {
        let data_types = filter.effective_data_types();
        Self {
            gene_id: call.gene.stable_id.clone(),
            gene_name: call.gene.name.clone(),
            species_id: call.condition.species_id,
            anat_entity_id: call.condition.anat_entity_id.clone(),
            cell_type_id: call.condition.cell_type_id.clone(),
            dev_stage_id: call.condition.dev_stage_id.clone(),
            sex_id: call.condition.sex_id.clone(),
            strain_id: call.condition.strain_id.clone(),
            call_type: call.summary_call_type,
            quality: call.summary_quality,
            fdr_p_value: call.fdr_p_value(&data_types).map(|p| p.p_value),
            best_descendant_fdr_p_value: call
                .best_descendant_p_value(&data_types)
                .map(|p| p.p_value),
            mean_rank: call.mean_rank,
            expression_score: call.expression_score,
            observed: call
                .data_propagation
                .as_ref()
                .map(|p| p.total_self_count() > 0)
                .unwrap_or(false),
        }
    }
}

/// Build the graph ontologies for one species, backfilling flat ontologies
/// for dimensions the bundle does not cover (sex and strain usually ship
/// without a curated ontology).
fn ontologies_for(
    bundle: &OntologyBundle,
    species_id: u32,
    conditions: &IndexSet<Condition>,
) -> Result<ConditionGraphOntologies, anyhow::Error> {
    use strum::IntoEnumIterator;

    let mut ontologies = ConditionGraphOntologies::from_bundle(bundle, species_id);
    for param in ConditionParameter::iter() {
        if ontologies.get(param).is_some() {
            continue;
        }
        let terms = conditions
            .iter()
            .filter_map(|c| c.term_id(param))
            .map(|term| (term.to_string(), term.to_string()))
            .collect::<IndexMap<_, _>>();
        if terms.is_empty() {
            continue;
        }
        let flat = Ontology::new(terms, [])?;
        match param {
            ConditionParameter::Anatomy => ontologies.anat_entity = Some(flat),
            ConditionParameter::CellType => ontologies.cell_type = Some(flat),
            ConditionParameter::DevStage => ontologies.dev_stage = Some(flat),
            ConditionParameter::Sex => ontologies.sex = Some(flat),
            ConditionParameter::Strain => ontologies.strain = Some(flat),
        }
    }
    Ok(ontologies)
}

/// Remove calls whose condition is an ancestor of another result condition
/// of the same gene; the more precise call carries the information.
fn filter_redundant_calls(
    calls: Vec<GeneExpressionCall>,
    graph: &ConditionGraph,
) -> Result<Vec<GeneExpressionCall>, anyhow::Error> {
    let mut by_gene: IndexMap<String, IndexSet<Condition>> = IndexMap::new();
    for call in &calls {
        by_gene
            .entry(call.gene.stable_id.clone())
            .or_default()
            .insert(call.condition.clone());
    }

    let mut result = Vec::with_capacity(calls.len());
    for call in calls {
        let descendants = graph.descendants(&call.condition, false)?;
        let gene_conditions = by_gene
            .get(&call.gene.stable_id)
            .expect("gene was indexed above");
        let redundant = descendants
            .iter()
            .any(|descendant| gene_conditions.contains(descendant));
        if !redundant {
            result.push(call);
        }
    }
    Ok(result)
}

/// Order the calls by gene and condition precision, optionally removing
/// redundant ancestors, per species.
fn order_calls(
    calls: Vec<GeneExpressionCall>,
    bundle: &OntologyBundle,
    filter_redundant: bool,
) -> Result<Vec<GeneExpressionCall>, anyhow::Error> {
    let mut by_species: IndexMap<u32, Vec<GeneExpressionCall>> = IndexMap::new();
    for call in calls {
        by_species
            .entry(call.condition.species_id)
            .or_default()
            .push(call);
    }

    let mut result = Vec::new();
    for (species_id, species_calls) in by_species {
        let conditions = species_calls
            .iter()
            .map(|call| call.condition.clone())
            .collect::<IndexSet<_>>();
        let ontologies = ontologies_for(bundle, species_id, &conditions)?;
        let graph = ConditionGraph::new(conditions, ontologies)?;

        let kept = if filter_redundant {
            filter_redundant_calls(species_calls, &graph)?
        } else {
            species_calls
        };

        let mut wrapped = kept
            .into_iter()
            .map(|call| ByGeneAndPrecision::new(call, &graph))
            .collect::<Result<Vec<_>, _>>()?;
        wrapped.sort();
        result.extend(wrapped.into_iter().map(|wrapper| wrapper.call));
    }
    Ok(result)
}

/// Page through the loader until the result set is exhausted.
fn run_query<S, G, C>(
    loader: &mut CallLoader<'_, S, G, C>,
    max_results: Option<usize>,
) -> Result<Vec<GeneExpressionCall>, anyhow::Error>
where
    S: crate::calls::storage::CallStorage,
    G: crate::calls::storage::GeneStore,
    C: crate::calls::storage::ConditionStore,
{
    let mut calls = Vec::new();
    let mut offset = 0u64;
    loop {
        let page = loader.load(Some(offset), Some(MAX_PAGE_SIZE))?;
        let page_len = page.len();
        calls.extend(page);
        if let Some(max_results) = max_results {
            if calls.len() >= max_results {
                calls.truncate(max_results);
                break;
            }
        }
        if (page_len as u32) < MAX_PAGE_SIZE {
            break;
        }
        offset += page_len as u64;
    }
    Ok(calls)
}

/// Main entry point for `calls query` sub command.
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
    let before_loading = Instant::now();
    let db = TsvCallDb::load(&args.path_db)?;
    let bundle = OntologyBundle::load(&resolve_db_file(&args.path_db, "ontology.tsv"))?;
    info!(
        "...done loading database in {:?}",
        before_loading.elapsed()
    );
    trace_rss_now();

    let max_ranks = db_conf
        .species
        .iter()
        .map(|species| (species.id, species.max_rank))
        .collect();
    let mut loader = CallLoader::new(
        &filter,
        CallAttribute::all(),
        PValueThresholds::default(),
        max_ranks,
        &db,
        &db,
        &db,
    )?;

    info!("Running query...");
    let before_query = Instant::now();
    let calls = run_query(&mut loader, args.max_results)?;
    let mut stats = QueryStats {
        count_total: calls.len(),
        ..Default::default()
    };
    for call in &calls {
        if let Some(call_type) = call.summary_call_type {
            *stats.by_call_type.entry(call_type).or_default() += 1;
        }
        for data in &call.call_data {
            stats.by_data_type[data.data_type] += 1;
        }
    }

    let calls = order_calls(calls, &bundle, args.filter_redundant)?;
    stats.count_written = calls.len();

    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .from_path(&args.path_output)?;
    for call in &calls {
        csv_writer.serialize(OutputRecord::from_call(call, &filter))?;
    }
    csv_writer.flush()?;
    info!("... done running query in {:?}", before_query.elapsed());

    info!(
        "summary: {} records written out of {}",
        stats.count_written.separate_with_commas(),
        stats.count_total.separate_with_commas()
    );
    info!("records by call type");
    for (call_type, count) in stats.by_call_type.iter() {
        info!("{} -- {}", call_type, count.separate_with_commas());
    }
    info!("supporting evidence by data type");
    for (data_type, count) in stats.by_data_type.iter() {
        if *count > 0 {
            info!("{} -- {}", data_type, count.separate_with_commas());
        }
    }

    trace_rss_now();

    tracing::info!(
        "All of `calls query` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}
