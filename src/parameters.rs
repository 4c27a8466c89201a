//! The `ParameterSet` / `FilterValue` data model and the parameter provider
//! that reads ordered filter values out of a loaded hierarchy table.
//!
//! Parameter payloads are opaque JSON-shaped values carried through the core
//! without inspection; only this module and [`crate::api_client`] look inside
//! them. The hierarchy table itself — the concrete date ranges, score bands,
//! enum lists, and the `skill_categories -> skill_subcategories` map — is
//! supplied by [`crate::config`] as data.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One clause of a filter value, e.g. `{"value": "2025-05-01", "operator": "since"}`.
///
/// `value` and `operator` are forwarded verbatim to the API; this crate never
/// interprets them beyond carrying them through serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterClause {
    pub value: ClauseValue,
    pub operator: String,
}

/// A clause's `value` is either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClauseValue {
    Single(String),
    Many(Vec<String>),
}

/// A filter value bound to a layer: a list of clauses, applied together.
pub type FilterValue = Vec<FilterClause>;

/// Name of a layer in the filter hierarchy, e.g. `"skill_categories"`.
pub type LayerName = String;

/// An immutable, canonically-orderable mapping from layer name to bound
/// filter value. Serialized with sorted keys so that two semantically
/// equivalent parameter sets produce the same canonical key regardless of
/// the order their layers were bound in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParameterSet(BTreeMap<LayerName, FilterValue>);

impl ParameterSet {
    /// The empty parameter set (before any layer has been bound).
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Bind `layer` to `value`, returning a new `ParameterSet`. The receiver
    /// is left unchanged; `ParameterSet`s are immutable once constructed.
    #[must_use]
    pub fn with_bound(&self, layer: &str, value: FilterValue) -> Self {
        let mut next = self.0.clone();
        next.insert(layer.to_string(), value);
        Self(next)
    }

    /// The filter value currently bound to `layer`, if any.
    #[must_use]
    pub fn get(&self, layer: &str) -> Option<&FilterValue> {
        self.0.get(layer)
    }

    /// The canonical, sorted-key JSON encoding that identifies this query.
    ///
    /// `BTreeMap`'s iteration order is already key-sorted, so this is just a
    /// `serde_json` serialization; no extra normalization step is needed.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        serde_json::to_string(&self.0).expect("ParameterSet contains no non-serializable values")
    }

    /// The underlying layer -> value map, for building the wire payload.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<LayerName, FilterValue> {
        &self.0
    }
}

/// The static filter hierarchy: traversal order, per-layer value lists, the
/// `skill_categories -> skill_subcategories` map, and the country clause
/// bound at the root. Loaded once by [`crate::config`] and shared read-only
/// across the producer and every downloader.
#[derive(Debug, Clone, Deserialize)]
pub struct HierarchyTable {
    /// Ordered list of layer names; traversal order is this order.
    pub layers: Vec<LayerName>,
    /// Per-layer list of filter values to try, for every layer except
    /// `skill_subcategories`.
    pub layer_values: BTreeMap<LayerName, Vec<FilterValue>>,
    /// `skill_categories` value (as its first clause's single string) ->
    /// list of subcategory filter values.
    pub skill_subcategories: BTreeMap<String, Vec<FilterValue>>,
    /// The clause bound under a fixed key at the root before layer 0 runs.
    pub static_country: FilterValue,
}

/// Name of the one context-dependent layer: its values depend on whichever
/// `skill_categories` clause is already bound on the current branch.
pub const SKILL_CATEGORIES_LAYER: &str = "skill_categories";
pub const SKILL_SUBCATEGORIES_LAYER: &str = "skill_subcategories";

/// Key the root-level country clause is bound under, ahead of every
/// traversal layer.
pub const STATIC_COUNTRY_LAYER: &str = "country";

/// Pure, stateless provider of ordered filter values per layer.
#[derive(Debug, Clone)]
pub struct ParameterProvider {
    table: Arc<HierarchyTable>,
}

impl ParameterProvider {
    #[must_use]
    pub fn new(table: Arc<HierarchyTable>) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn hierarchy(&self) -> &HierarchyTable {
        &self.table
    }

    /// Ordered list of filter values to try at `layer`, given the parameters
    /// already bound on the current branch.
    ///
    /// `skill_subcategories` is the only context-dependent layer: it reads
    /// the category currently bound under `skill_categories` and returns
    /// that category's subcategories, or an empty list if no category is
    /// bound (or the category has none).
    #[must_use]
    pub fn values_for_layer(&self, layer: &str, current: &ParameterSet) -> Vec<FilterValue> {
        if layer == SKILL_SUBCATEGORIES_LAYER {
            return self.subcategories_for_current(current);
        }
        self.table
            .layer_values
            .get(layer)
            .cloned()
            .unwrap_or_default()
    }

    fn subcategories_for_current(&self, current: &ParameterSet) -> Vec<FilterValue> {
        let Some(bound) = current.get(SKILL_CATEGORIES_LAYER) else {
            return Vec::new();
        };
        let Some(category) = first_single_value(bound) else {
            return Vec::new();
        };
        self.table
            .skill_subcategories
            .get(category)
            .cloned()
            .unwrap_or_default()
    }
}

/// Extracts the first string out of the first clause of a filter value,
/// whether it is a `Single` or the head of a `Many`.
fn first_single_value(value: &FilterValue) -> Option<&str> {
    let clause = value.first()?;
    match &clause.value {
        ClauseValue::Single(s) => Some(s.as_str()),
        ClauseValue::Many(items) => items.first().map(String::as_str),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(value: &str, operator: &str) -> FilterValue {
        vec![FilterClause {
            value: ClauseValue::Single(value.to_string()),
            operator: operator.to_string(),
        }]
    }

    fn sample_table() -> HierarchyTable {
        let mut layer_values = BTreeMap::new();
        layer_values.insert(
            "completion_score".to_string(),
            vec![clause("0.5", "greater than")],
        );
        layer_values.insert(
            SKILL_CATEGORIES_LAYER.to_string(),
            vec![clause("engineering", "is one of")],
        );

        let mut skill_subcategories = BTreeMap::new();
        skill_subcategories.insert(
            "engineering".to_string(),
            vec![clause("rust", "is one of"), clause("go", "is one of")],
        );

        HierarchyTable {
            layers: vec![
                "completion_score".to_string(),
                SKILL_CATEGORIES_LAYER.to_string(),
                SKILL_SUBCATEGORIES_LAYER.to_string(),
            ],
            layer_values,
            skill_subcategories,
            static_country: clause("United Kingdom", "is one of"),
        }
    }

    #[test]
    fn static_layer_returns_configured_values() {
        let provider = ParameterProvider::new(Arc::new(sample_table()));
        let values = provider.values_for_layer("completion_score", &ParameterSet::new());
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn skill_subcategories_empty_without_bound_category() {
        let provider = ParameterProvider::new(Arc::new(sample_table()));
        let values = provider.values_for_layer(SKILL_SUBCATEGORIES_LAYER, &ParameterSet::new());
        assert!(values.is_empty());
    }

    #[test]
    fn skill_subcategories_follows_bound_category() {
        let provider = ParameterProvider::new(Arc::new(sample_table()));
        let bound = ParameterSet::new()
            .with_bound(SKILL_CATEGORIES_LAYER, clause("engineering", "is one of"));
        let values = provider.values_for_layer(SKILL_SUBCATEGORIES_LAYER, &bound);
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn canonical_key_is_stable_under_construction_order() {
        let a = ParameterSet::new()
            .with_bound("b", clause("2", "is one of"))
            .with_bound("a", clause("1", "is one of"));
        let b = ParameterSet::new()
            .with_bound("a", clause("1", "is one of"))
            .with_bound("b", clause("2", "is one of"));
        assert_eq!(a.canonical_key(), b.canonical_key());
    }
}
