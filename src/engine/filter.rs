//! Component filters.
//!
//! A [`ComponentFilter`] is a predicate over the component set of an archetype.
//! Filters are written against component *names* so the same tree can come from
//! the programmatic builders or from a CQL expression. Before matching, a filter
//! is compiled against a [`ComponentRegistry`] into a [`CompiledFilter`] whose
//! leaves are [`Signature`] bitsets:
//!
//! - `Exact(C)` matches when the archetype's set equals `C`,
//! - `Contains(C)` matches when the archetype's set is a superset of `C`,
//! - `Not`, `And`, `Or` compose, `All` matches everything.
//!
//! Order and repetition of names inside a leaf are irrelevant.

use std::fmt;

use crate::engine::component::ComponentRegistry;
use crate::engine::error::StateResult;
use crate::engine::types::Signature;

/// Predicate over a component-name set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentFilter {
    /// Archetype set equals the listed components.
    Exact(Vec<String>),
    /// Archetype set is a superset of the listed components.
    Contains(Vec<String>),
    /// Negation.
    Not(Box<ComponentFilter>),
    /// Matches every archetype.
    All,
    /// Every operand matches.
    And(Vec<ComponentFilter>),
    /// At least one operand matches.
    Or(Vec<ComponentFilter>),
}

impl ComponentFilter {
    /// `Exact` over the given names.
    pub fn exact<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ComponentFilter::Exact(names.into_iter().map(Into::into).collect())
    }

    /// `Contains` over the given names.
    pub fn contains<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ComponentFilter::Contains(names.into_iter().map(Into::into).collect())
    }

    /// Negates `filter`.
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: ComponentFilter) -> Self {
        ComponentFilter::Not(Box::new(filter))
    }

    /// Conjunction of `filters`.
    pub fn and<I: IntoIterator<Item = ComponentFilter>>(filters: I) -> Self {
        ComponentFilter::And(filters.into_iter().collect())
    }

    /// Disjunction of `filters`.
    pub fn or<I: IntoIterator<Item = ComponentFilter>>(filters: I) -> Self {
        ComponentFilter::Or(filters.into_iter().collect())
    }

    /// Resolves every component name against `registry`.
    ///
    /// Fails with `ComponentNotRegistered` on the first unknown name.
    pub fn compile(&self, registry: &ComponentRegistry) -> StateResult<CompiledFilter> {
        Ok(match self {
            ComponentFilter::Exact(names) => CompiledFilter::Exact(registry.signature_of_names(names)?),
            ComponentFilter::Contains(names) => {
                CompiledFilter::Contains(registry.signature_of_names(names)?)
            }
            ComponentFilter::Not(inner) => CompiledFilter::Not(Box::new(inner.compile(registry)?)),
            ComponentFilter::All => CompiledFilter::All,
            ComponentFilter::And(filters) => CompiledFilter::And(
                filters.iter().map(|f| f.compile(registry)).collect::<StateResult<_>>()?,
            ),
            ComponentFilter::Or(filters) => CompiledFilter::Or(
                filters.iter().map(|f| f.compile(registry)).collect::<StateResult<_>>()?,
            ),
        })
    }
}

impl fmt::Display for ComponentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, filters: &[ComponentFilter], op: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, filter) in filters.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{filter}")?;
            }
            write!(f, ")")
        }

        match self {
            ComponentFilter::Exact(names) => write!(f, "EXACT({})", names.join(", ")),
            ComponentFilter::Contains(names) => write!(f, "CONTAINS({})", names.join(", ")),
            ComponentFilter::Not(inner) => write!(f, "!{inner}"),
            ComponentFilter::All => write!(f, "ALL()"),
            ComponentFilter::And(filters) => join(f, filters, "&"),
            ComponentFilter::Or(filters) => join(f, filters, "|"),
        }
    }
}

/// A [`ComponentFilter`] with names resolved to signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledFilter {
    /// Set equality.
    Exact(Signature),
    /// Superset test.
    Contains(Signature),
    /// Negation.
    Not(Box<CompiledFilter>),
    /// Tautology.
    All,
    /// Conjunction.
    And(Vec<CompiledFilter>),
    /// Disjunction.
    Or(Vec<CompiledFilter>),
}

impl CompiledFilter {
    /// Evaluates the filter against an archetype signature.
    pub fn matches(&self, archetype: &Signature) -> bool {
        match self {
            CompiledFilter::Exact(target) => archetype == target,
            CompiledFilter::Contains(target) => archetype.contains_all(target),
            CompiledFilter::Not(inner) => !inner.matches(archetype),
            CompiledFilter::All => true,
            CompiledFilter::And(filters) => filters.iter().all(|f| f.matches(archetype)),
            CompiledFilter::Or(filters) => filters.iter().any(|f| f.matches(archetype)),
        }
    }
}
