//! Index routing: which (index, culture) targets must hold a record's document.
//!
//! Routing honours single inheritance. For each configured index the record
//! type is checked, in configured order, against every configured model; the
//! first model the type *is-a* wins for that index, and every culture of the
//! index yields one [`Route`].
//!
//! The [`RouteTable`] is built once from configuration and precomputes the
//! answer for every known type, so resolving a route on a save is a map
//! lookup. Call [`RouteTable::reload`] when configuration changes.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::models::IndexTarget;

/// One configured index, as it appears in `[[indexes]]`.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexDefinition {
    pub name: String,
    pub cultures: Vec<String>,
    #[serde(default = "default_rebuild_page_size")]
    pub rebuild_page_size: u64,
    #[serde(default)]
    pub models: Vec<ModelOptions>,
}

fn default_rebuild_page_size() -> u64 {
    50
}

/// Per-model indexing options, as they appear in `[[indexes.models]]`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ModelOptions {
    pub name: String,
    /// Fields copied into the document; empty means all fields.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Field used as the document title.
    #[serde(default)]
    pub title: Option<String>,
}

/// Child → parent map describing the record type tree.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    parents: HashMap<String, String>,
}

impl TypeHierarchy {
    /// Build a hierarchy, rejecting self-parenting and cycles.
    pub fn new(parents: HashMap<String, String>) -> Result<Self> {
        let hierarchy = Self { parents };
        for start in hierarchy.parents.keys() {
            let mut seen = HashSet::new();
            let mut current = start.as_str();
            while let Some(parent) = hierarchy.parents.get(current) {
                if !seen.insert(current) {
                    return Err(SyncError::InvalidHierarchy(format!(
                        "cycle through type \"{}\"",
                        start
                    )));
                }
                current = parent;
            }
        }
        Ok(hierarchy)
    }

    /// Whether `ty` is `ancestor` or inherits from it.
    pub fn is_a(&self, ty: &str, ancestor: &str) -> bool {
        let mut current = ty;
        loop {
            if current == ancestor {
                return true;
            }
            match self.parents.get(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Every type named in the hierarchy, as child or parent.
    pub fn known_types(&self) -> HashSet<&str> {
        self.parents
            .iter()
            .flat_map(|(child, parent)| [child.as_str(), parent.as_str()])
            .collect()
    }
}

/// A resolved route: the target plus the configured model it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub target: IndexTarget,
    pub model: String,
}

/// Precomputed type → routes table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    indexes: Vec<IndexDefinition>,
    hierarchy: TypeHierarchy,
    routes: HashMap<String, Vec<Route>>,
}

impl RouteTable {
    pub fn build(indexes: Vec<IndexDefinition>, hierarchy: TypeHierarchy) -> Result<Self> {
        let mut names = HashSet::new();
        for index in &indexes {
            if !names.insert(index.name.as_str()) {
                return Err(SyncError::DuplicateIndex(index.name.clone()));
            }
            warn_shadowed_models(index, &hierarchy);
        }

        let mut types: HashSet<String> = hierarchy
            .known_types()
            .into_iter()
            .map(str::to_string)
            .collect();
        for index in &indexes {
            types.extend(index.models.iter().map(|m| m.name.clone()));
        }

        let mut routes = HashMap::new();
        for ty in types {
            let resolved = compute_routes(&indexes, &hierarchy, &ty);
            if !resolved.is_empty() {
                routes.insert(ty, resolved);
            }
        }

        Ok(Self {
            indexes,
            hierarchy,
            routes,
        })
    }

    /// Replace the configuration and recompute every route.
    pub fn reload(&mut self, indexes: Vec<IndexDefinition>, hierarchy: TypeHierarchy) -> Result<()> {
        *self = Self::build(indexes, hierarchy)?;
        Ok(())
    }

    /// All routes for a record type, in configured index then culture order.
    pub fn resolve(&self, model: &str) -> Result<&[Route]> {
        match self.routes.get(model) {
            Some(routes) => Ok(routes),
            None => Err(SyncError::NoRoute {
                model: model.to_string(),
            }),
        }
    }

    /// The route of `model` into one specific target.
    pub fn route_in(&self, model: &str, target: &IndexTarget) -> Result<&Route> {
        self.resolve(model)?
            .iter()
            .find(|r| &r.target == target)
            .ok_or_else(|| SyncError::NoRoute {
                model: model.to_string(),
            })
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Result<&IndexDefinition> {
        self.indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| SyncError::UnknownIndex(name.to_string()))
    }

    /// Options for a model configured in an index.
    pub fn model_options(&self, index: &str, model: &str) -> Result<&ModelOptions> {
        self.index(index)?
            .models
            .iter()
            .find(|m| m.name == model)
            .ok_or_else(|| SyncError::UnknownModel {
                index: index.to_string(),
                model: model.to_string(),
            })
    }

    /// Check that `culture` and `model` are configured for `index`.
    pub fn validate_job(&self, index: &str, culture: &str, model: &str) -> Result<IndexTarget> {
        let definition = self.index(index)?;
        if !definition.cultures.iter().any(|c| c == culture) {
            return Err(SyncError::UnknownCulture {
                index: index.to_string(),
                culture: culture.to_string(),
            });
        }
        self.model_options(index, model)?;
        Ok(IndexTarget::new(index, culture))
    }

    /// Every known type that is-a `model`, sorted, `model` included.
    pub fn types_satisfying(&self, model: &str) -> Vec<String> {
        let mut types: Vec<String> = self
            .hierarchy
            .known_types()
            .into_iter()
            .filter(|t| self.hierarchy.is_a(t, model))
            .map(str::to_string)
            .collect();
        if !types.iter().any(|t| t == model) {
            types.push(model.to_string());
        }
        types.sort();
        types
    }

    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }
}

fn compute_routes(indexes: &[IndexDefinition], hierarchy: &TypeHierarchy, ty: &str) -> Vec<Route> {
    let mut routes = Vec::new();
    for index in indexes {
        let matched = index.models.iter().find(|m| hierarchy.is_a(ty, &m.name));
        if let Some(model) = matched {
            for culture in &index.cultures {
                routes.push(Route {
                    target: IndexTarget::new(index.name.clone(), culture.clone()),
                    model: model.name.clone(),
                });
            }
        }
    }
    routes
}

fn warn_shadowed_models(index: &IndexDefinition, hierarchy: &TypeHierarchy) {
    for (pos, model) in index.models.iter().enumerate() {
        if let Some(ancestor) = index.models[..pos]
            .iter()
            .find(|earlier| hierarchy.is_a(&model.name, &earlier.name))
        {
            tracing::warn!(
                index = %index.name,
                model = %model.name,
                ancestor = %ancestor.name,
                "model is configured after its ancestor and will never be routed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str) -> ModelOptions {
        ModelOptions {
            name: name.to_string(),
            fields: Vec::new(),
            title: None,
        }
    }

    fn index(name: &str, cultures: &[&str], models: &[&str]) -> IndexDefinition {
        IndexDefinition {
            name: name.to_string(),
            cultures: cultures.iter().map(|c| c.to_string()).collect(),
            rebuild_page_size: 50,
            models: models.iter().map(|m| model(m)).collect(),
        }
    }

    fn hierarchy(pairs: &[(&str, &str)]) -> TypeHierarchy {
        TypeHierarchy::new(
            pairs
                .iter()
                .map(|(c, p)| (c.to_string(), p.to_string()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_subclass_of_configured_root_gets_one_target_per_culture() {
        let table = RouteTable::build(
            vec![index("catalog", &["en", "fr"], &["Content"])],
            hierarchy(&[("Article", "Content")]),
        )
        .unwrap();

        let routes = table.resolve("Article").unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].target, IndexTarget::new("catalog", "en"));
        assert_eq!(routes[1].target, IndexTarget::new("catalog", "fr"));
        assert!(routes.iter().all(|r| r.model == "Content"));
    }

    #[test]
    fn test_multiple_indexes_multiply_targets() {
        let table = RouteTable::build(
            vec![
                index("catalog", &["en", "fr", "de"], &["Content"]),
                index("news", &["en"], &["Article"]),
            ],
            hierarchy(&[("Article", "Content")]),
        )
        .unwrap();

        assert_eq!(table.resolve("Article").unwrap().len(), 4);
        assert_eq!(table.resolve("Content").unwrap().len(), 3);
    }

    #[test]
    fn test_first_configured_match_wins() {
        let table = RouteTable::build(
            vec![index("catalog", &["en"], &["News", "Content"])],
            hierarchy(&[("Article", "Content"), ("News", "Article")]),
        )
        .unwrap();

        assert_eq!(table.resolve("News").unwrap()[0].model, "News");
        assert_eq!(table.resolve("Article").unwrap()[0].model, "Content");
    }

    #[test]
    fn test_unrouted_type_is_configuration_error() {
        let table = RouteTable::build(
            vec![index("catalog", &["en"], &["Content"])],
            hierarchy(&[("Article", "Content")]),
        )
        .unwrap();

        let err = table.resolve("Invoice").unwrap_err();
        assert!(matches!(err, SyncError::NoRoute { ref model } if model == "Invoice"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_type_matching_configured_model_directly() {
        let table = RouteTable::build(vec![index("catalog", &["en"], &["Page"])], TypeHierarchy::default()).unwrap();
        assert_eq!(table.resolve("Page").unwrap().len(), 1);
    }

    #[test]
    fn test_cycle_rejected() {
        let err = TypeHierarchy::new(
            [("A", "B"), ("B", "A")]
                .iter()
                .map(|(c, p)| (c.to_string(), p.to_string()))
                .collect(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::InvalidHierarchy(_)));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let err = RouteTable::build(
            vec![index("catalog", &["en"], &["A"]), index("catalog", &["fr"], &["B"])],
            TypeHierarchy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::DuplicateIndex(_)));
    }

    #[test]
    fn test_validate_job() {
        let table = RouteTable::build(vec![index("catalog", &["en"], &["Content"])], TypeHierarchy::default()).unwrap();

        assert_eq!(
            table.validate_job("catalog", "en", "Content").unwrap(),
            IndexTarget::new("catalog", "en")
        );
        assert!(matches!(
            table.validate_job("catalog", "fr", "Content"),
            Err(SyncError::UnknownCulture { .. })
        ));
        assert!(matches!(
            table.validate_job("catalog", "en", "Invoice"),
            Err(SyncError::UnknownModel { .. })
        ));
        assert!(matches!(
            table.validate_job("shop", "en", "Content"),
            Err(SyncError::UnknownIndex(_))
        ));
    }

    #[test]
    fn test_types_satisfying_includes_descendants() {
        let table = RouteTable::build(
            vec![index("catalog", &["en"], &["Content"])],
            hierarchy(&[("Article", "Content"), ("News", "Article"), ("Invoice", "Doc")]),
        )
        .unwrap();

        assert_eq!(table.types_satisfying("Content"), vec!["Article", "Content", "News"]);
        assert_eq!(table.types_satisfying("Page"), vec!["Page"]);
    }

    #[test]
    fn test_reload_replaces_routes() {
        let mut table = RouteTable::build(vec![index("catalog", &["en"], &["Content"])], TypeHierarchy::default()).unwrap();
        assert!(table.resolve("Page").is_err());

        table
            .reload(vec![index("catalog", &["en"], &["Page"])], TypeHierarchy::default())
            .unwrap();
        assert!(table.resolve("Page").is_ok());
        assert!(table.resolve("Content").is_err());
    }
}
