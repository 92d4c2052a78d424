// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Declarative leaf selectors.
//!
//! A [`Filter`] is a literal written by client code; [`Filter::compile`]
//! normalizes it into a [`Predicate`] evaluated per `(path, leaf)`. Partition
//! helpers evaluate filters in list order and hand each entry to the first
//! match unless [`PartitionMode::MostSpecific`] is selected.
use core::ops::{BitAnd, BitOr, Not};

use serde::{Deserialize, Serialize};

use crate::path::{Key, Path};
use crate::state::StateLeaf;
use crate::variable::VarType;

/// Declarative selector literal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Matches every leaf.
    Everything,
    /// Matches no leaf.
    Nothing,
    /// Variables whose type is the tag or one of its subtypes. Raw leaves
    /// never match.
    OfType(VarType),
    /// Variables whose stream tag equals the string.
    WithTag(String),
    /// Leaves whose path contains the key at any depth.
    PathContains(Key),
    /// All sub-filters match.
    All(Vec<Filter>),
    /// Any sub-filter matches.
    Any(Vec<Filter>),
    /// The sub-filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// Shorthand for [`Filter::PathContains`].
    pub fn path_contains(key: impl Into<Key>) -> Self {
        Self::PathContains(key.into())
    }

    /// Normalizes into an evaluable predicate.
    #[must_use]
    pub fn compile(&self) -> Predicate {
        match self {
            Self::Everything => Predicate::Const(true),
            Self::Nothing => Predicate::Const(false),
            Self::OfType(ty) => Predicate::OfType(*ty),
            Self::WithTag(tag) => Predicate::WithTag(tag.clone()),
            Self::PathContains(key) => Predicate::PathContains(key.clone()),
            Self::All(items) => Predicate::all(items.iter().map(Self::compile)),
            Self::Any(items) => Predicate::any(items.iter().map(Self::compile)),
            Self::Not(inner) => match inner.compile() {
                Predicate::Const(b) => Predicate::Const(!b),
                Predicate::Not(p) => *p,
                p => Predicate::Not(Box::new(p)),
            },
        }
    }

    /// Compiles and evaluates once.
    #[must_use]
    pub fn matches(&self, path: &Path, leaf: &StateLeaf) -> bool {
        self.compile().matches(path, leaf)
    }
}

impl From<bool> for Filter {
    fn from(v: bool) -> Self {
        if v { Self::Everything } else { Self::Nothing }
    }
}

impl From<&str> for Filter {
    fn from(tag: &str) -> Self {
        Self::WithTag(tag.to_owned())
    }
}

impl From<String> for Filter {
    fn from(tag: String) -> Self {
        Self::WithTag(tag)
    }
}

impl From<VarType> for Filter {
    fn from(ty: VarType) -> Self {
        Self::OfType(ty)
    }
}

impl From<Vec<Self>> for Filter {
    fn from(items: Vec<Self>) -> Self {
        Self::Any(items)
    }
}

impl Not for Filter {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

impl BitAnd for Filter {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self::All(vec![self, rhs])
    }
}

impl BitOr for Filter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::Any(vec![self, rhs])
    }
}

/// Normalized predicate tree.
///
/// Nested combinators of the same kind are flattened, constants are folded,
/// and double negations removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// Constant outcome.
    Const(bool),
    /// Instance-of test on variables.
    OfType(VarType),
    /// Stream tag equality on variables.
    WithTag(String),
    /// Path membership.
    PathContains(Key),
    /// Conjunction of at least two predicates.
    All(Vec<Predicate>),
    /// Disjunction of at least two predicates.
    Any(Vec<Predicate>),
    /// Negation of a non-constant, non-negated predicate.
    Not(Box<Predicate>),
}

impl Predicate {
    fn all(items: impl Iterator<Item = Self>) -> Self {
        let mut out = Vec::new();
        for item in items {
            match item {
                Self::Const(true) => {}
                Self::Const(false) => return Self::Const(false),
                Self::All(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Self::Const(true),
            1 => out.pop().unwrap_or(Self::Const(true)),
            _ => Self::All(out),
        }
    }

    fn any(items: impl Iterator<Item = Self>) -> Self {
        let mut out = Vec::new();
        for item in items {
            match item {
                Self::Const(false) => {}
                Self::Const(true) => return Self::Const(true),
                Self::Any(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Self::Const(false),
            1 => out.pop().unwrap_or(Self::Const(false)),
            _ => Self::Any(out),
        }
    }

    /// Evaluates against one state entry.
    #[must_use]
    pub fn matches(&self, path: &Path, leaf: &StateLeaf) -> bool {
        match self {
            Self::Const(b) => *b,
            Self::OfType(ty) => leaf.variable().is_some_and(|v| v.ty().is_subtype_of(ty)),
            Self::WithTag(tag) => leaf
                .variable()
                .and_then(|v| v.tag())
                .is_some_and(|t| t == tag.as_str()),
            Self::PathContains(key) => path.contains(key),
            Self::All(items) => items.iter().all(|p| p.matches(path, leaf)),
            Self::Any(items) => items.iter().any(|p| p.matches(path, leaf)),
            Self::Not(inner) => !inner.matches(path, leaf),
        }
    }

    /// Static specificity used by [`PartitionMode::MostSpecific`].
    ///
    /// Type tests score their tag depth plus one, so a subtype outranks its
    /// parent; tag and path tests score one; conjunctions add up, disjunctions
    /// take their best branch; constants and negations score zero.
    #[must_use]
    pub fn specificity(&self) -> usize {
        match self {
            Self::Const(_) | Self::Not(_) => 0,
            Self::OfType(ty) => ty.depth() + 1,
            Self::WithTag(_) | Self::PathContains(_) => 1,
            Self::All(items) => items.iter().map(Self::specificity).sum(),
            Self::Any(items) => items.iter().map(Self::specificity).max().unwrap_or(0),
        }
    }
}

/// How partition helpers choose among several matching filters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMode {
    /// The first matching filter in list order wins.
    #[default]
    FirstMatch,
    /// The matching filter with the highest specificity wins; ties go to
    /// the earlier filter.
    MostSpecific,
}

/// Compiled filter list with its evaluation order.
pub(crate) struct Selector {
    predicates: Vec<Predicate>,
    order: Vec<usize>,
}

impl Selector {
    pub(crate) fn new(filters: &[Filter], mode: PartitionMode) -> Self {
        let predicates: Vec<_> = filters.iter().map(Filter::compile).collect();
        let mut order: Vec<usize> = (0..predicates.len()).collect();
        if mode == PartitionMode::MostSpecific {
            // Stable sort keeps list order among equal scores.
            order.sort_by_key(|&i| core::cmp::Reverse(predicates[i].specificity()));
        }
        Self { predicates, order }
    }

    /// Group index for the entry, if any filter matches.
    pub(crate) fn select(&self, path: &Path, leaf: &StateLeaf) -> Option<usize> {
        self.order
            .iter()
            .copied()
            .find(|&i| self.predicates[i].matches(path, leaf))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::value::Value;
    use crate::variable::{Variable, BATCH_STAT, PARAM};

    static SPECIAL: VarType = VarType::subtype("SpecialParam", &PARAM);

    fn leaf(v: Variable) -> StateLeaf {
        StateLeaf::Variable(v)
    }

    #[test]
    fn compile_normalizes_combinators() {
        let f = Filter::All(vec![
            Filter::Everything,
            Filter::All(vec![Filter::from(PARAM), Filter::from("dropout")]),
        ]);
        assert_eq!(
            f.compile(),
            Predicate::All(vec![
                Predicate::OfType(PARAM),
                Predicate::WithTag("dropout".into())
            ])
        );
        assert_eq!((!!Filter::from(PARAM)).compile(), Predicate::OfType(PARAM));
        assert_eq!(
            (Filter::from(PARAM) | Filter::Everything).compile(),
            Predicate::Const(true)
        );
        assert_eq!(Filter::Any(vec![]).compile(), Predicate::Const(false));
    }

    #[test]
    fn of_type_includes_subtypes_and_skips_raw_leaves() {
        let path = Path::from(["w"]);
        let special = leaf(Variable::new(SPECIAL, 1.0));
        assert!(Filter::from(PARAM).matches(&path, &special));
        assert!(!Filter::from(SPECIAL).matches(&path, &leaf(Variable::param(1.0))));
        assert!(!Filter::from(PARAM).matches(&path, &StateLeaf::Value(Value::Scalar(1.0))));
        assert!(Filter::Not(Box::new(Filter::from(PARAM)))
            .matches(&path, &StateLeaf::Value(Value::Scalar(1.0))));
    }

    #[test]
    fn tag_and_path_filters() {
        let tagged = leaf(Variable::batch_stat(0.0).with_tag("bn"));
        let path = Path::from(["layers", "0", "mean"]);
        assert!(Filter::from("bn").matches(&path, &tagged));
        assert!(!Filter::from("other").matches(&path, &tagged));
        assert!(Filter::path_contains("layers").matches(&path, &tagged));
        assert!((Filter::from(BATCH_STAT) & Filter::from("bn")).matches(&path, &tagged));
    }

    #[test]
    fn most_specific_mode_prefers_subtypes_regardless_of_order() {
        let filters = [Filter::from(PARAM), Filter::from(SPECIAL)];
        let path = Path::from(["w"]);
        let special = leaf(Variable::new(SPECIAL, 1.0));
        let first = Selector::new(&filters, PartitionMode::FirstMatch);
        let specific = Selector::new(&filters, PartitionMode::MostSpecific);
        assert_eq!(first.select(&path, &special), Some(0));
        assert_eq!(specific.select(&path, &special), Some(1));
        assert_eq!(specific.select(&path, &leaf(Variable::param(0.0))), Some(0));
    }

    #[test]
    fn partition_mode_uses_snake_case() {
        let json = serde_json::to_string(&PartitionMode::MostSpecific).unwrap();
        assert_eq!(json, "\"most_specific\"");
    }
}
