//! The condition parameter combination engine.
//!
//! A condition places a gene observation in up to five ontology dimensions.
//! Queries select a subset of these dimensions to group calls by; storage
//! provenance is requested per sub-combination of the selected dimensions.

use std::collections::BTreeSet;

use strum::IntoEnumIterator;

use super::schema::query::CallAttribute;

/// One axis of a `Condition`.
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
pub enum ConditionParameter {
    /// Anatomical entity.
    #[strum(serialize = "ANATOMY")]
    Anatomy,
    /// Cell type; composed with anatomy for propagation purposes.
    #[strum(serialize = "CELL_TYPE")]
    CellType,
    /// Developmental stage.
    #[strum(serialize = "DEV_STAGE")]
    DevStage,
    /// Sex.
    #[strum(serialize = "SEX")]
    Sex,
    /// Strain.
    #[strum(serialize = "STRAIN")]
    Strain,
}

impl ConditionParameter {
    /// Identifier of the ontology root term substituted for this dimension
    /// when it is inactive in a query.
    pub fn root_term_id(&self) -> &'static str {
        match self {
            ConditionParameter::Anatomy => "UBERON:0001062",
            ConditionParameter::CellType => "CL:0000000",
            ConditionParameter::DevStage => "UBERON:0000104",
            ConditionParameter::Sex => "any",
            ConditionParameter::Strain => "wild-type",
        }
    }

    /// Whether term identifiers of this dimension are compared
    /// case-insensitively.
    pub fn lenient_term_match(&self) -> bool {
        matches!(self, ConditionParameter::Strain)
    }
}

/// A non-empty set of condition parameters.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ParamCombination(BTreeSet<ConditionParameter>);

/// Supporting code for `ParamCombination`.
pub(crate) mod param_combination {
    /// Error type for combination construction and attribute conversion.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// Invalid-argument: a combination must select at least one dimension.
        #[error("combination of condition parameters must not be empty")]
        EmptyCombination,
        /// Invalid-argument: the token does not denote a condition dimension.
        #[error("attribute {0} is not a condition parameter")]
        NotAConditionParameter(super::CallAttribute),
        /// Invalid-argument: the token cannot be parsed as a dimension.
        #[error("cannot parse condition parameter from {0:?}")]
        UnknownParameterToken(String),
    }
}

impl ParamCombination {
    /// Construct from the given parameters; empty input is an error.
    pub fn new(
        params: impl IntoIterator<Item = ConditionParameter>,
    ) -> Result<Self, param_combination::Error> {
        let set = params.into_iter().collect::<BTreeSet<_>>();
        if set.is_empty() {
            Err(param_combination::Error::EmptyCombination)
        } else {
            Ok(Self(set))
        }
    }

    /// The combination selecting all five dimensions.
    pub fn all() -> Self {
        Self(ConditionParameter::iter().collect())
    }

    /// Return the combination with cell type composed with anatomy.
    ///
    /// Cell types only carry propagation information relative to the
    /// anatomical entity they sit in, so propagation keys for any
    /// combination containing `CellType` also contain `Anatomy`.
    pub fn composed(&self) -> Self {
        let mut set = self.0.clone();
        if set.contains(&ConditionParameter::CellType) {
            set.insert(ConditionParameter::Anatomy);
        }
        Self(set)
    }

    /// Whether the combination contains the given parameter.
    pub fn contains(&self, param: ConditionParameter) -> bool {
        self.0.contains(&param)
    }

    /// Iterate over the contained parameters in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = ConditionParameter> + '_ {
        self.0.iter().copied()
    }

    /// Number of contained parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; combinations are non-empty by construction.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ParamCombination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for param in &self.0 {
            if !first {
                write!(f, "+")?;
            }
            write!(f, "{}", param)?;
            first = false;
        }
        Ok(())
    }
}

impl std::str::FromStr for ParamCombination {
    type Err = param_combination::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let params = s
            .split('+')
            .map(|token| {
                token
                    .parse::<ConditionParameter>()
                    .map_err(|_| param_combination::Error::UnknownParameterToken(token.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ParamCombination::new(params)
    }
}

/// Return the canonical combination for the requested attribute tokens.
///
/// An empty or absent request selects all five dimensions; otherwise the
/// input is validated (every token must denote a condition dimension) and
/// deduplicated.
pub fn canonical_combination(
    attributes: Option<&[CallAttribute]>,
) -> Result<ParamCombination, param_combination::Error> {
    match attributes {
        None => Ok(ParamCombination::all()),
        Some(attrs) if attrs.is_empty() => Ok(ParamCombination::all()),
        Some(attrs) => {
            let params = attrs
                .iter()
                .map(|attr| {
                    attr.condition_parameter()
                        .ok_or(param_combination::Error::NotAConditionParameter(*attr))
                })
                .collect::<Result<Vec<_>, _>>()?;
            ParamCombination::new(params)
        }
    }
}

/// Convert dimension tokens into a combination, requiring a non-empty,
/// dimension-only input (used for the observed-data constraint).
pub fn require_combination(
    attributes: &[CallAttribute],
) -> Result<ParamCombination, param_combination::Error> {
    if attributes.is_empty() {
        return Err(param_combination::Error::EmptyCombination);
    }
    canonical_combination(Some(attributes))
}

/// Enumerate all non-empty subsets of the given combination.
///
/// The subsets are returned in deterministic order: by size, then by
/// canonical parameter order.
pub fn non_empty_subsets(combination: &ParamCombination) -> Vec<ParamCombination> {
    let params = combination.iter().collect::<Vec<_>>();
    let mut result = Vec::new();
    // enumerate via bit masks; combinations have at most five elements
    for mask in 1u32..(1 << params.len()) {
        let subset = params
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, p)| *p)
            .collect::<Vec<_>>();
        result.push(ParamCombination::new(subset).expect("mask is non-zero"));
    }
    result.sort_by_key(|c| (c.len(), c.iter().collect::<Vec<_>>()));
    result
}
