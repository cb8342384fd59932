//! Code for sorting `GeneExpressionCall` records by gene and condition
//! precision.

use super::{
    graph::{condition_graph, ConditionGraph},
    schema::data::{Condition, GeneExpressionCall},
};

/// Helper wrapper that allows to sort `GeneExpressionCall` by gene and
/// condition precision.
///
/// General conditions sort before their more precise relatives; ties break
/// on the condition itself for a stable, deterministic order.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ByGeneAndPrecision {
    pub key: (String, usize, Condition),
    pub call: GeneExpressionCall,
}

impl ByGeneAndPrecision {
    /// Wrap a call, deriving the precision key from the graph.
    pub fn new(
        call: GeneExpressionCall,
        graph: &ConditionGraph,
    ) -> Result<Self, condition_graph::Error> {
        let ancestor_count = graph.ancestors(&call.condition, false)?.len();
        Ok(Self {
            key: (
                call.gene.stable_id.clone(),
                ancestor_count,
                call.condition.clone(),
            ),
            call,
        })
    }
}

impl PartialEq for ByGeneAndPrecision {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ByGeneAndPrecision {}

impl PartialOrd for ByGeneAndPrecision {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByGeneAndPrecision {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}
