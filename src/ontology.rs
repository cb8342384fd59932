//! Directed acyclic ontologies of terms, one per condition dimension and
//! species.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::calls::params::ConditionParameter;

/// Supporting code for `Ontology`.
pub(crate) mod ontology {
    /// Error type for ontology construction and queries.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// Invalid-argument: the term is not part of the ontology.
        #[error("unknown term: {0}")]
        UnknownTerm(String),
        /// Invalid-argument: an edge references a term that was never added.
        #[error("edge references unknown term: {child} -> {parent}")]
        UnknownEdgeTerm { child: String, parent: String },
    }
}

/// A read-only directed acyclic graph of ontology terms.
///
/// Edges point from child (more specific) to parent (more general) terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ontology {
    /// Term identifier mapped to its display name.
    terms: IndexMap<String, String>,
    /// Direct parents per term.
    parents: HashMap<String, IndexSet<String>>,
    /// Direct children per term.
    children: HashMap<String, IndexSet<String>>,
}

impl Ontology {
    /// Construct from `(term_id, name)` pairs and `(child, parent)` edges.
    pub fn new(
        terms: impl IntoIterator<Item = (String, String)>,
        edges: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ontology::Error> {
        let terms: IndexMap<String, String> = terms.into_iter().collect();
        let mut parents: HashMap<String, IndexSet<String>> = HashMap::new();
        let mut children: HashMap<String, IndexSet<String>> = HashMap::new();
        for (child, parent) in edges {
            if !terms.contains_key(&child) || !terms.contains_key(&parent) {
                return Err(ontology::Error::UnknownEdgeTerm { child, parent });
            }
            parents.entry(child.clone()).or_default().insert(parent.clone());
            children.entry(parent).or_default().insert(child);
        }
        Ok(Self {
            terms,
            parents,
            children,
        })
    }

    /// Whether the ontology contains the term with the given identifier.
    pub fn contains(&self, term_id: &str) -> bool {
        self.terms.contains_key(term_id)
    }

    /// Resolve a term identifier to its canonical form, exact match.
    pub fn resolve_exact(&self, term_id: &str) -> Option<&str> {
        self.terms.get_key_value(term_id).map(|(id, _)| id.as_str())
    }

    /// Resolve a term identifier to its canonical form, ignoring ASCII case.
    pub fn resolve_lenient(&self, term_id: &str) -> Option<&str> {
        self.resolve_exact(term_id).or_else(|| {
            self.terms
                .keys()
                .find(|id| id.eq_ignore_ascii_case(term_id))
                .map(|id| id.as_str())
        })
    }

    /// The display name of the given term.
    pub fn term_name(&self, term_id: &str) -> Option<&str> {
        self.terms.get(term_id).map(|name| name.as_str())
    }

    /// Direct parents of the given term.
    pub fn parents_of(&self, term_id: &str) -> Result<IndexSet<&str>, ontology::Error> {
        if !self.contains(term_id) {
            return Err(ontology::Error::UnknownTerm(term_id.to_string()));
        }
        Ok(self
            .parents
            .get(term_id)
            .map(|set| set.iter().map(|id| id.as_str()).collect())
            .unwrap_or_default())
    }

    /// Direct children of the given term.
    pub fn children_of(&self, term_id: &str) -> Result<IndexSet<&str>, ontology::Error> {
        if !self.contains(term_id) {
            return Err(ontology::Error::UnknownTerm(term_id.to_string()));
        }
        Ok(self
            .children
            .get(term_id)
            .map(|set| set.iter().map(|id| id.as_str()).collect())
            .unwrap_or_default())
    }

    /// All strict ancestors of the given term.
    pub fn ancestors_of(&self, term_id: &str) -> Result<IndexSet<&str>, ontology::Error> {
        self.closure_of(term_id, &self.parents)
    }

    /// All strict descendants of the given term.
    pub fn descendants_of(&self, term_id: &str) -> Result<IndexSet<&str>, ontology::Error> {
        self.closure_of(term_id, &self.children)
    }

    /// Whether `descendant` is a strict descendant of `ancestor`.
    pub fn is_descendant_of(
        &self,
        descendant: &str,
        ancestor: &str,
    ) -> Result<bool, ontology::Error> {
        if !self.contains(ancestor) {
            return Err(ontology::Error::UnknownTerm(ancestor.to_string()));
        }
        Ok(self.ancestors_of(descendant)?.contains(ancestor))
    }

    /// Transitive closure over the given edge map, excluding the seed term.
    ///
    /// A visited set guards the traversal so malformed inputs with cycles
    /// terminate instead of recursing forever.
    fn closure_of<'a>(
        &'a self,
        term_id: &str,
        edges: &'a HashMap<String, IndexSet<String>>,
    ) -> Result<IndexSet<&'a str>, ontology::Error> {
        if !self.contains(term_id) {
            return Err(ontology::Error::UnknownTerm(term_id.to_string()));
        }
        let mut result = IndexSet::new();
        let mut stack = edges
            .get(term_id)
            .map(|set| set.iter().map(|id| id.as_str()).collect::<Vec<_>>())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if result.insert(current) {
                if let Some(next) = edges.get(current) {
                    stack.extend(next.iter().map(|id| id.as_str()));
                }
            }
        }
        result.shift_remove(term_id);
        Ok(result)
    }
}

/// Code for accessing the `ontology.tsv` file.
pub mod tsv {
    use super::*;

    /// Data structure for representing an entry of the table.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct Entry {
        /// The dimension the term belongs to.
        pub dimension: ConditionParameter,
        /// Internal numeric species identifier.
        pub species_id: u32,
        /// Term identifier.
        pub term_id: String,
        /// Term display name.
        pub name: String,
        /// Comma-separated identifiers of the direct parents.
        pub parent_ids: Option<String>,
    }

    /// Read the `ontology.tsv` file using the `csv` crate via serde.
    ///
    /// # Errors
    ///
    /// In the case that the file could not be read.
    pub fn load_entries<P: AsRef<std::path::Path>>(path: &P) -> Result<Vec<Entry>, anyhow::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(crate::common::open_read_maybe_gz(path)?);
        let mut entries = Vec::new();
        for result in rdr.deserialize() {
            let entry: Entry = result?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// All ontologies of one database, keyed by species and dimension.
#[derive(Debug, Clone, Default)]
pub struct OntologyBundle {
    ontologies: IndexMap<(u32, ConditionParameter), Ontology>,
}

impl OntologyBundle {
    /// Load the bundle from the `ontology.tsv` file at `path`.
    pub fn load<P: AsRef<std::path::Path>>(path: &P) -> Result<Self, anyhow::Error> {
        let entries = tsv::load_entries(path)?;

        let mut terms: IndexMap<(u32, ConditionParameter), Vec<(String, String)>> = IndexMap::new();
        let mut edges: IndexMap<(u32, ConditionParameter), Vec<(String, String)>> = IndexMap::new();
        for entry in entries {
            let key = (entry.species_id, entry.dimension);
            terms
                .entry(key)
                .or_default()
                .push((entry.term_id.clone(), entry.name));
            if let Some(parent_ids) = &entry.parent_ids {
                for parent_id in parent_ids.split(',').filter(|s| !s.is_empty()) {
                    edges
                        .entry(key)
                        .or_default()
                        .push((entry.term_id.clone(), parent_id.to_string()));
                }
            }
        }

        let mut ontologies = IndexMap::new();
        for (key, key_terms) in terms {
            let key_edges = edges.swap_remove(&key).unwrap_or_default();
            let ontology = Ontology::new(key_terms, key_edges).map_err(|e| {
                anyhow::anyhow!(
                    "invalid ontology for species {} dimension {}: {}",
                    key.0,
                    key.1,
                    e
                )
            })?;
            ontologies.insert(key, ontology);
        }

        Ok(Self { ontologies })
    }

    /// The ontology of the given species and dimension, if loaded.
    pub fn get(&self, species_id: u32, dimension: ConditionParameter) -> Option<&Ontology> {
        self.ontologies.get(&(species_id, dimension))
    }

    /// Number of loaded ontologies.
    pub fn len(&self) -> usize {
        self.ontologies.len()
    }

    /// Whether no ontology was loaded.
    pub fn is_empty(&self) -> bool {
        self.ontologies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// liver -> digestive organ -> organ, hepatocyte -> liver (sibling path)
    pub(super) fn example_ontology() -> Ontology {
        Ontology::new(
            [
                ("UBERON:0000062".to_string(), "organ".to_string()),
                ("UBERON:0001007".to_string(), "digestive organ".to_string()),
                ("UBERON:0002107".to_string(), "liver".to_string()),
                ("UBERON:0002106".to_string(), "spleen".to_string()),
            ],
            [
                ("UBERON:0001007".to_string(), "UBERON:0000062".to_string()),
                ("UBERON:0002107".to_string(), "UBERON:0001007".to_string()),
                ("UBERON:0002106".to_string(), "UBERON:0000062".to_string()),
            ],
        )
        .expect("example ontology is well-formed")
    }

    #[test]
    fn construction_rejects_unknown_edge_terms() {
        let result = Ontology::new(
            [("A".to_string(), "a".to_string())],
            [("A".to_string(), "B".to_string())],
        );

        assert_eq!(
            result,
            Err(ontology::Error::UnknownEdgeTerm {
                child: "A".to_string(),
                parent: "B".to_string()
            })
        );
    }

    #[test]
    fn ancestors_and_descendants() -> Result<(), ontology::Error> {
        let ontology = example_ontology();

        assert_eq!(
            ontology.ancestors_of("UBERON:0002107")?,
            ["UBERON:0001007", "UBERON:0000062"]
                .into_iter()
                .collect::<IndexSet<_>>()
        );
        assert_eq!(
            ontology.descendants_of("UBERON:0000062")?,
            ["UBERON:0001007", "UBERON:0002107", "UBERON:0002106"]
                .into_iter()
                .collect::<IndexSet<_>>()
        );
        assert!(ontology.ancestors_of("UBERON:0000062")?.is_empty());
        assert!(ontology.is_descendant_of("UBERON:0002107", "UBERON:0000062")?);
        assert!(!ontology.is_descendant_of("UBERON:0000062", "UBERON:0002107")?);
        // strict: a term is not its own descendant
        assert!(!ontology.is_descendant_of("UBERON:0002107", "UBERON:0002107")?);

        Ok(())
    }

    #[test]
    fn direct_parents_and_children() -> Result<(), ontology::Error> {
        let ontology = example_ontology();

        assert_eq!(
            ontology.parents_of("UBERON:0002107")?,
            ["UBERON:0001007"].into_iter().collect::<IndexSet<_>>()
        );
        assert_eq!(
            ontology.children_of("UBERON:0000062")?,
            ["UBERON:0001007", "UBERON:0002106"]
                .into_iter()
                .collect::<IndexSet<_>>()
        );
        assert!(ontology.parents_of("UBERON:0000062")?.is_empty());
        assert_eq!(ontology.term_name("UBERON:0002107"), Some("liver"));
        assert_eq!(ontology.term_name("UBERON:9999999"), None);

        Ok(())
    }

    #[test]
    fn unknown_term_is_an_error() {
        let ontology = example_ontology();

        assert_eq!(
            ontology.ancestors_of("UBERON:9999999"),
            Err(ontology::Error::UnknownTerm("UBERON:9999999".to_string()))
        );
    }

    #[test]
    fn lenient_resolution() {
        let ontology = Ontology::new(
            [("wild-type".to_string(), "wild-type".to_string())],
            [],
        )
        .unwrap();

        assert_eq!(ontology.resolve_exact("Wild-Type"), None);
        assert_eq!(ontology.resolve_lenient("Wild-Type"), Some("wild-type"));
        assert_eq!(ontology.resolve_lenient("wild-type"), Some("wild-type"));
        assert_eq!(ontology.resolve_lenient("mutant"), None);
    }

    #[test]
    fn cyclic_input_terminates() -> Result<(), ontology::Error> {
        // malformed but must not hang
        let ontology = Ontology::new(
            [
                ("A".to_string(), "a".to_string()),
                ("B".to_string(), "b".to_string()),
            ],
            [
                ("A".to_string(), "B".to_string()),
                ("B".to_string(), "A".to_string()),
            ],
        )?;

        assert_eq!(
            ontology.ancestors_of("A")?,
            ["B"].into_iter().collect::<IndexSet<_>>()
        );

        Ok(())
    }

    #[test]
    fn bundle_load() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("ontology.tsv");
        std::fs::write(
            &path,
            "dimension\tspecies_id\tterm_id\tname\tparent_ids\n\
             ANATOMY\t10090\tUBERON:0000062\torgan\t\n\
             ANATOMY\t10090\tUBERON:0002107\tliver\tUBERON:0000062\n\
             STRAIN\t10090\twild-type\twild-type\t\n",
        )?;

        let bundle = OntologyBundle::load(&path)?;

        assert_eq!(bundle.len(), 2);
        let anatomy = bundle
            .get(10090, ConditionParameter::Anatomy)
            .expect("anatomy ontology loaded");
        assert!(anatomy.is_descendant_of("UBERON:0002107", "UBERON:0000062")?);
        assert!(bundle.get(10090, ConditionParameter::Strain).is_some());
        assert!(bundle.get(9606, ConditionParameter::Anatomy).is_none());

        Ok(())
    }
}
