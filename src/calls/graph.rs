//! The condition ontology graph.
//!
//! A read-only graph over the conditions of one species, backed by up to
//! five per-dimension term ontologies. Only annotated conditions are
//! materialized, so the graph is typically disconnected; direct-relation
//! queries reconnect it via `direct_relatives`.

use indexmap::IndexSet;
use itertools::Itertools;
use strum::IntoEnumIterator;

use crate::{
    calls::params::ConditionParameter,
    calls::schema::data::Condition,
    ontology::{Ontology, OntologyBundle},
};

/// Supporting code for `ConditionGraph`.
pub(crate) mod condition_graph {
    use crate::calls::params::ConditionParameter;

    /// Error type for graph construction and queries.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// Invalid-argument: a graph needs at least one condition.
        #[error("cannot build a condition graph without conditions")]
        NoConditions,
        /// Invalid-argument: all conditions must belong to one species.
        #[error("conditions belong to multiple species: {0:?}")]
        MultipleSpecies(Vec<u32>),
        /// Invalid-argument: a used dimension has no ontology.
        #[error("dimension {0} is used by a condition but has no ontology")]
        MissingOntology(ConditionParameter),
        /// Invalid-argument: a condition references a term its ontology does
        /// not contain.
        #[error("term {term_id:?} of dimension {param} not found in ontology")]
        UnknownTerm {
            param: ConditionParameter,
            term_id: String,
        },
        /// Invalid-argument: the condition is not part of the graph.
        #[error("condition is not registered in the graph: {0}")]
        UnregisteredCondition(String),
    }
}

/// The per-dimension ontologies backing a `ConditionGraph`.
#[derive(Debug, Clone, Default)]
pub struct ConditionGraphOntologies {
    /// Ontology of anatomical entities.
    pub anat_entity: Option<Ontology>,
    /// Ontology of cell types.
    pub cell_type: Option<Ontology>,
    /// Ontology of developmental stages.
    pub dev_stage: Option<Ontology>,
    /// Ontology of sexes.
    pub sex: Option<Ontology>,
    /// Ontology of strains.
    pub strain: Option<Ontology>,
}

impl ConditionGraphOntologies {
    /// Collect the ontologies of one species from a bundle.
    pub fn from_bundle(bundle: &OntologyBundle, species_id: u32) -> Self {
        Self {
            anat_entity: bundle.get(species_id, ConditionParameter::Anatomy).cloned(),
            cell_type: bundle.get(species_id, ConditionParameter::CellType).cloned(),
            dev_stage: bundle.get(species_id, ConditionParameter::DevStage).cloned(),
            sex: bundle.get(species_id, ConditionParameter::Sex).cloned(),
            strain: bundle.get(species_id, ConditionParameter::Strain).cloned(),
        }
    }

    /// The ontology of the given dimension, if any.
    pub fn get(&self, param: ConditionParameter) -> Option<&Ontology> {
        match param {
            ConditionParameter::Anatomy => self.anat_entity.as_ref(),
            ConditionParameter::CellType => self.cell_type.as_ref(),
            ConditionParameter::DevStage => self.dev_stage.as_ref(),
            ConditionParameter::Sex => self.sex.as_ref(),
            ConditionParameter::Strain => self.strain.as_ref(),
        }
    }
}

/// A read-only graph over the registered conditions of one species.
#[derive(Debug, Clone)]
pub struct ConditionGraph {
    /// The registered conditions.
    conditions: IndexSet<Condition>,
    /// The backing ontologies.
    ontologies: ConditionGraphOntologies,
    /// The single species of all registered conditions.
    species_id: u32,
}

impl ConditionGraph {
    /// Construct a graph over the given conditions.
    ///
    /// All conditions must belong to one species; every dimension used by
    /// any condition must have an ontology containing the referenced term.
    /// Strain identifiers are matched case-insensitively, all other
    /// dimensions exactly.
    pub fn new(
        conditions: impl IntoIterator<Item = Condition>,
        ontologies: ConditionGraphOntologies,
    ) -> Result<Self, condition_graph::Error> {
        let conditions: IndexSet<Condition> = conditions.into_iter().collect();
        if conditions.is_empty() {
            return Err(condition_graph::Error::NoConditions);
        }

        let species_ids = conditions
            .iter()
            .map(|c| c.species_id)
            .collect::<IndexSet<_>>();
        if species_ids.len() > 1 {
            return Err(condition_graph::Error::MultipleSpecies(
                species_ids.into_iter().collect(),
            ));
        }
        let species_id = conditions[0].species_id;

        for condition in &conditions {
            for param in ConditionParameter::iter() {
                if let Some(term_id) = condition.term_id(param) {
                    let ontology = ontologies
                        .get(param)
                        .ok_or(condition_graph::Error::MissingOntology(param))?;
                    let resolved = if param.lenient_term_match() {
                        ontology.resolve_lenient(term_id)
                    } else {
                        ontology.resolve_exact(term_id)
                    };
                    if resolved.is_none() {
                        return Err(condition_graph::Error::UnknownTerm {
                            param,
                            term_id: term_id.to_string(),
                        });
                    }
                }
            }
        }

        Ok(Self {
            conditions,
            ontologies,
            species_id,
        })
    }

    /// Construct a graph and expand the registered set with inferred
    /// relatives.
    ///
    /// For every input condition the cartesian product of each dimension's
    /// relatives (the term itself plus its ancestors and/or descendants,
    /// according to the flags) is synthesized and registered; the original
    /// condition is excluded from its own synthesized set.
    pub fn with_inference(
        conditions: impl IntoIterator<Item = Condition>,
        ontologies: ConditionGraphOntologies,
        infer_ancestors: bool,
        infer_descendants: bool,
    ) -> Result<Self, condition_graph::Error> {
        let base = Self::new(conditions, ontologies)?;
        if !infer_ancestors && !infer_descendants {
            return Ok(base);
        }

        let mut expanded = base.conditions.clone();
        for condition in &base.conditions {
            let per_dim = ConditionParameter::iter()
                .map(|param| match base.canonical_term(condition, param) {
                    None => vec![None],
                    Some(term_id) => {
                        let ontology = base
                            .ontologies
                            .get(param)
                            .expect("term presence was validated at construction");
                        let mut variants = vec![Some(term_id.to_string())];
                        if infer_ancestors {
                            variants.extend(
                                ontology
                                    .ancestors_of(term_id)
                                    .expect("term was validated at construction")
                                    .iter()
                                    .map(|t| Some(t.to_string())),
                            );
                        }
                        if infer_descendants {
                            variants.extend(
                                ontology
                                    .descendants_of(term_id)
                                    .expect("term was validated at construction")
                                    .iter()
                                    .map(|t| Some(t.to_string())),
                            );
                        }
                        variants
                    }
                })
                .collect::<Vec<_>>();

            for combo in per_dim.into_iter().multi_cartesian_product() {
                let candidate = Condition::new(
                    combo[0].clone(),
                    combo[1].clone(),
                    combo[2].clone(),
                    combo[3].clone(),
                    combo[4].clone(),
                    base.species_id,
                );
                if &candidate != condition {
                    expanded.insert(candidate);
                }
            }
        }

        Ok(Self {
            conditions: expanded,
            ontologies: base.ontologies,
            species_id: base.species_id,
        })
    }

    /// The registered conditions.
    pub fn conditions(&self) -> &IndexSet<Condition> {
        &self.conditions
    }

    /// The species of all registered conditions.
    pub fn species_id(&self) -> u32 {
        self.species_id
    }

    /// Whether `b` is strictly more precise than `a`.
    ///
    /// True iff `b` differs from `a` only by using, for every dimension, a
    /// term that is `a`'s term or a descendant of it. Reflexive inputs
    /// return false. Both conditions must be registered.
    pub fn is_more_precise(
        &self,
        a: &Condition,
        b: &Condition,
    ) -> Result<bool, condition_graph::Error> {
        self.check_registered(a)?;
        self.check_registered(b)?;
        if a == b {
            return Ok(false);
        }
        Ok(self.more_precise_unchecked(a, b))
    }

    /// Ancestors of `condition` within the registered set.
    ///
    /// With `direct_only`, the disconnected graph is reconnected via
    /// `direct_relatives`.
    pub fn ancestors(
        &self,
        condition: &Condition,
        direct_only: bool,
    ) -> Result<IndexSet<Condition>, condition_graph::Error> {
        self.check_registered(condition)?;
        let full: IndexSet<Condition> = self
            .conditions
            .iter()
            .filter(|c| *c != condition && self.more_precise_unchecked(c, condition))
            .cloned()
            .collect();
        if !direct_only {
            return Ok(full);
        }
        // candidate is beyond `via` when it is an ancestor of `via`
        Ok(direct_relatives(&full, |candidate, via| {
            self.more_precise_unchecked(candidate, via)
        }))
    }

    /// Descendants of `condition` within the registered set.
    ///
    /// With `direct_only`, the disconnected graph is reconnected via
    /// `direct_relatives`.
    pub fn descendants(
        &self,
        condition: &Condition,
        direct_only: bool,
    ) -> Result<IndexSet<Condition>, condition_graph::Error> {
        self.check_registered(condition)?;
        let full: IndexSet<Condition> = self
            .conditions
            .iter()
            .filter(|c| *c != condition && self.more_precise_unchecked(condition, c))
            .cloned()
            .collect();
        if !direct_only {
            return Ok(full);
        }
        // candidate is beyond `via` when it is a descendant of `via`
        Ok(direct_relatives(&full, |candidate, via| {
            self.more_precise_unchecked(via, candidate)
        }))
    }

    fn check_registered(&self, condition: &Condition) -> Result<(), condition_graph::Error> {
        if self.conditions.contains(condition) {
            Ok(())
        } else {
            Err(condition_graph::Error::UnregisteredCondition(format!(
                "{:?}",
                condition
            )))
        }
    }

    /// Precision check without registration validation.
    ///
    /// Dimensions where both conditions carry no term pass through as
    /// equal; a term present on only one side makes the conditions
    /// incomparable.
    fn more_precise_unchecked(&self, a: &Condition, b: &Condition) -> bool {
        ConditionParameter::iter().all(|param| {
            match (self.canonical_term(a, param), self.canonical_term(b, param)) {
                (None, None) => true,
                (Some(term_a), Some(term_b)) => {
                    term_a == term_b
                        || self
                            .ontologies
                            .get(param)
                            .map(|ontology| {
                                ontology.is_descendant_of(term_b, term_a).unwrap_or(false)
                            })
                            .unwrap_or(false)
                }
                _ => false,
            }
        })
    }

    /// The canonical form of the condition's term of the given dimension.
    ///
    /// Strain identifiers resolve case-insensitively to the spelling used
    /// by the ontology, so that precision queries are insensitive to the
    /// case of the annotated identifier.
    fn canonical_term<'b>(
        &'b self,
        condition: &'b Condition,
        param: ConditionParameter,
    ) -> Option<&'b str> {
        let term_id = condition.term_id(param)?;
        match self.ontologies.get(param) {
            Some(ontology) if param.lenient_term_match() => ontology.resolve_lenient(term_id),
            Some(ontology) => ontology.resolve_exact(term_id),
            None => Some(term_id),
        }
    }
}

/// Restrict a full ancestor or descendant set to the direct relatives of
/// the seed condition.
///
/// `farther(candidate, via)` must return true when `candidate` lies beyond
/// `via` as seen from the seed, i.e. `via` sits between the seed and
/// `candidate`. A candidate with such an intermediate is dropped; dropped
/// candidates that are not reachable through any retained candidate are
/// then reinstated (checked against the pre-fallback retained set, so
/// mutually-between pairs come back symmetrically). This keeps isolated
/// relatives connected to the seed by a fallback direct edge instead of
/// losing them, at the price of occasionally reinstating both members of a
/// cycle.
pub fn direct_relatives<F>(candidates: &IndexSet<Condition>, farther: F) -> IndexSet<Condition>
where
    F: Fn(&Condition, &Condition) -> bool,
{
    let retained: IndexSet<Condition> = candidates
        .iter()
        .filter(|candidate| {
            !candidates
                .iter()
                .any(|via| via != *candidate && farther(candidate, via))
        })
        .cloned()
        .collect();

    let mut result = retained.clone();
    for candidate in candidates {
        if !result.contains(candidate) {
            let reachable = retained.iter().any(|via| farther(candidate, via));
            if !reachable {
                result.insert(candidate.clone());
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use indexmap::IndexSet;
    use pretty_assertions::assert_eq;

    use super::{condition_graph, direct_relatives, ConditionGraph, ConditionGraphOntologies};
    use crate::{calls::schema::data::Condition, ontology::Ontology};

    const ORGAN: &str = "UBERON:0000062";
    const LIVER: &str = "UBERON:0002107";
    const HEPATOCYTE: &str = "CL:0000182";
    const LIFE: &str = "UBERON:0000104";
    const ADULT: &str = "UBERON:0000113";

    /// Anatomy with cell types composed in: organ > liver > hepatocyte.
    fn anatomy() -> Ontology {
        Ontology::new(
            [
                (ORGAN.to_string(), "organ".to_string()),
                (LIVER.to_string(), "liver".to_string()),
                (HEPATOCYTE.to_string(), "hepatocyte".to_string()),
            ],
            [
                (LIVER.to_string(), ORGAN.to_string()),
                (HEPATOCYTE.to_string(), LIVER.to_string()),
            ],
        )
        .unwrap()
    }

    fn stages() -> Ontology {
        Ontology::new(
            [
                (LIFE.to_string(), "life cycle".to_string()),
                (ADULT.to_string(), "post-juvenile".to_string()),
            ],
            [(ADULT.to_string(), LIFE.to_string())],
        )
        .unwrap()
    }

    fn ontologies() -> ConditionGraphOntologies {
        ConditionGraphOntologies {
            anat_entity: Some(anatomy()),
            dev_stage: Some(stages()),
            ..Default::default()
        }
    }

    fn cond(anat: &str, stage: &str) -> Condition {
        Condition::new(
            Some(anat.to_string()),
            None,
            Some(stage.to_string()),
            None,
            None,
            10090,
        )
    }

    #[test]
    fn new_rejects_empty() {
        assert_eq!(
            ConditionGraph::new([], ontologies()).err(),
            Some(condition_graph::Error::NoConditions)
        );
    }

    #[test]
    fn new_rejects_multiple_species() {
        let mut other = cond(LIVER, ADULT);
        other.species_id = 9606;

        assert_eq!(
            ConditionGraph::new([cond(LIVER, ADULT), other], ontologies()).err(),
            Some(condition_graph::Error::MultipleSpecies(vec![10090, 9606]))
        );
    }

    #[test]
    fn new_rejects_missing_ontology() {
        let no_stages = ConditionGraphOntologies {
            anat_entity: Some(anatomy()),
            ..Default::default()
        };

        assert_eq!(
            ConditionGraph::new([cond(LIVER, ADULT)], no_stages).err(),
            Some(condition_graph::Error::MissingOntology(
                crate::calls::params::ConditionParameter::DevStage
            ))
        );
    }

    #[test]
    fn new_rejects_unknown_term() {
        assert_eq!(
            ConditionGraph::new([cond("UBERON:9999999", ADULT)], ontologies()).err(),
            Some(condition_graph::Error::UnknownTerm {
                param: crate::calls::params::ConditionParameter::Anatomy,
                term_id: "UBERON:9999999".to_string(),
            })
        );
    }

    #[test]
    fn new_matches_strains_case_insensitively() -> Result<(), condition_graph::Error> {
        let ontologies = ConditionGraphOntologies {
            strain: Some(
                Ontology::new(
                    [("wild-type".to_string(), "wild-type".to_string())],
                    [],
                )
                .unwrap(),
            ),
            ..Default::default()
        };
        let condition = Condition::new(None, None, None, None, Some("Wild-Type".to_string()), 10090);

        ConditionGraph::new([condition], ontologies)?;

        Ok(())
    }

    #[test]
    fn is_more_precise_on_composed_anatomy() -> Result<(), condition_graph::Error> {
        let a = cond(LIVER, ADULT);
        let b = cond(HEPATOCYTE, ADULT);
        let graph = ConditionGraph::new([a.clone(), b.clone()], ontologies())?;

        assert!(graph.is_more_precise(&a, &b)?);
        assert!(!graph.is_more_precise(&b, &a)?);
        // irreflexive
        assert!(!graph.is_more_precise(&a, &a)?);

        assert!(graph.ancestors(&b, false)?.contains(&a));
        assert!(graph.descendants(&a, false)?.contains(&b));

        Ok(())
    }

    #[test]
    fn is_more_precise_requires_registration() -> Result<(), condition_graph::Error> {
        let a = cond(LIVER, ADULT);
        let graph = ConditionGraph::new([a.clone()], ontologies())?;
        let unregistered = cond(ORGAN, ADULT);

        assert!(matches!(
            graph.is_more_precise(&a, &unregistered),
            Err(condition_graph::Error::UnregisteredCondition(_))
        ));

        Ok(())
    }

    #[test]
    fn is_more_precise_needs_all_dimensions_compatible() -> Result<(), condition_graph::Error> {
        // b refines anatomy but generalizes the stage, so neither direction
        // holds
        let a = cond(LIVER, ADULT);
        let b = cond(HEPATOCYTE, LIFE);
        let graph = ConditionGraph::new([a.clone(), b.clone()], ontologies())?;

        assert!(!graph.is_more_precise(&a, &b)?);
        assert!(!graph.is_more_precise(&b, &a)?);

        Ok(())
    }

    #[test]
    fn ancestors_direct_skips_intermediates() -> Result<(), condition_graph::Error> {
        let bottom = cond(HEPATOCYTE, ADULT);
        let middle = cond(LIVER, ADULT);
        let top = cond(ORGAN, ADULT);
        let graph = ConditionGraph::new(
            [bottom.clone(), middle.clone(), top.clone()],
            ontologies(),
        )?;

        let full = graph.ancestors(&bottom, false)?;
        assert_eq!(
            full,
            [middle.clone(), top.clone()].into_iter().collect::<IndexSet<_>>()
        );

        let direct = graph.ancestors(&bottom, true)?;
        assert_eq!(direct, [middle.clone()].into_iter().collect::<IndexSet<_>>());

        let direct_desc = graph.descendants(&top, true)?;
        assert_eq!(direct_desc, [middle].into_iter().collect::<IndexSet<_>>());

        Ok(())
    }

    #[test]
    fn ancestors_direct_keeps_sole_relative() -> Result<(), condition_graph::Error> {
        // only the far ancestor is annotated, the fallback keeps the edge
        let bottom = cond(HEPATOCYTE, ADULT);
        let top = cond(ORGAN, ADULT);
        let graph = ConditionGraph::new([bottom.clone(), top.clone()], ontologies())?;

        assert_eq!(
            graph.ancestors(&bottom, true)?,
            [top].into_iter().collect::<IndexSet<_>>()
        );

        Ok(())
    }

    #[test]
    fn direct_relatives_reinstates_mutually_between_pair() {
        // two candidates each beyond the other would both be dropped;
        // the fallback brings both back
        let c1 = cond(LIVER, ADULT);
        let c2 = cond(ORGAN, ADULT);
        let candidates: IndexSet<Condition> = [c1.clone(), c2.clone()].into_iter().collect();

        let result = direct_relatives(&candidates, |_, _| true);

        assert_eq!(result, candidates);
    }

    #[test]
    fn with_inference_of_ancestors() -> Result<(), condition_graph::Error> {
        let seed = cond(LIVER, ADULT);
        let graph =
            ConditionGraph::with_inference([seed.clone()], ontologies(), true, false)?;

        // 2 anatomy variants above liver x 2 stage variants, minus nothing:
        // (liver, adult) is the seed itself and stays registered
        let expected: IndexSet<Condition> = [
            seed.clone(),
            cond(ORGAN, ADULT),
            cond(LIVER, LIFE),
            cond(ORGAN, LIFE),
        ]
        .into_iter()
        .collect();
        assert_eq!(graph.conditions(), &expected);

        assert_eq!(graph.ancestors(&seed, false)?.len(), 3);

        Ok(())
    }

    #[test]
    fn with_inference_of_descendants() -> Result<(), condition_graph::Error> {
        let seed = cond(LIVER, ADULT);
        let graph =
            ConditionGraph::with_inference([seed.clone()], ontologies(), false, true)?;

        let expected: IndexSet<Condition> = [seed.clone(), cond(HEPATOCYTE, ADULT)]
            .into_iter()
            .collect();
        assert_eq!(graph.conditions(), &expected);

        Ok(())
    }
}
