//! File ownership between the tasks of one wave.
//!
//! Each active layer owns its glob patterns; everything the other active
//! layers own is off limits. Tracked files are partitioned against those
//! patterns so a dispatch can show what already exists and where two layers
//! overlap.

use std::collections::BTreeMap;

use glob::{MatchOptions, Pattern};
use serde::Serialize;
use wavesmith_core::types::Layer;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn compiled(layer: Layer) -> Vec<Pattern> {
    layer
        .file_patterns()
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect()
}

/// Whether `path` (relative, `/`-separated) falls under one of `layer`'s patterns.
pub fn layer_matches(layer: Layer, path: &str) -> bool {
    compiled(layer)
        .iter()
        .any(|p| p.matches_with(path, MATCH_OPTIONS))
}

pub fn own_patterns(layer: Layer) -> Vec<String> {
    layer.file_patterns().iter().map(|p| p.to_string()).collect()
}

/// Union of every other active layer's patterns, in wave order, without duplicates.
pub fn do_not_touch(layer: Layer, active: &[Layer]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for other in active.iter().filter(|l| **l != layer) {
        for pattern in other.file_patterns() {
            if !out.iter().any(|p| p == pattern) {
                out.push(pattern.to_string());
            }
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOwnership {
    /// Files matched by exactly one active layer.
    pub owned: BTreeMap<Layer, Vec<String>>,
    /// Files matched by more than one active layer.
    pub shared: BTreeMap<String, Vec<Layer>>,
    /// Files no active layer claims.
    pub unowned: Vec<String>,
}

impl FileOwnership {
    pub fn owned_by(&self, layer: Layer) -> &[String] {
        self.owned.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn shared_with(&self, layer: Layer) -> Vec<&str> {
        self.shared
            .iter()
            .filter(|(_, layers)| layers.contains(&layer))
            .map(|(file, _)| file.as_str())
            .collect()
    }
}

pub fn partition_files(files: &[String], active: &[Layer]) -> FileOwnership {
    let patterns: Vec<(Layer, Vec<Pattern>)> = active.iter().map(|l| (*l, compiled(*l))).collect();
    let mut ownership = FileOwnership::default();

    for file in files {
        let path = file.replace('\\', "/");
        let claimants: Vec<Layer> = patterns
            .iter()
            .filter(|(_, pats)| pats.iter().any(|p| p.matches_with(&path, MATCH_OPTIONS)))
            .map(|(layer, _)| *layer)
            .collect();
        match claimants.as_slice() {
            [] => ownership.unowned.push(file.clone()),
            [single] => ownership.owned.entry(*single).or_default().push(file.clone()),
            _ => {
                ownership.shared.insert(file.clone(), claimants);
            }
        }
    }
    ownership
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_packages_match() {
        assert!(layer_matches(Layer::Entity, "src/main/java/com/shop/entity/Order.java"));
        assert!(layer_matches(Layer::Entity, "src/domain/Order.java"));
        assert!(layer_matches(Layer::Test, "test/order.spec.js"));
        assert!(!layer_matches(Layer::Service, "src/main/java/com/shop/entity/Order.java"));
        assert!(!layer_matches(Layer::Test, "docs/test/readme.md"));
    }

    #[test]
    fn do_not_touch_excludes_own_patterns() {
        let active = [Layer::Entity, Layer::Dto, Layer::Config];
        let blocked = do_not_touch(Layer::Entity, &active);
        assert!(blocked.contains(&"src/**/dto/**".to_string()));
        assert!(blocked.contains(&"src/**/config/**".to_string()));
        assert!(!blocked.iter().any(|p| own_patterns(Layer::Entity).contains(p)));
        assert!(do_not_touch(Layer::Entity, &[Layer::Entity]).is_empty());
    }

    #[test]
    fn partition_separates_owned_shared_and_unowned() {
        let files: Vec<String> = [
            "src/main/java/shop/entity/Order.java",
            "src/main/java/shop/dto/OrderDto.java",
            "src/main/java/shop/entity/dto/Weird.java",
            "README.md",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let own = partition_files(&files, &[Layer::Entity, Layer::Dto]);
        assert_eq!(own.owned_by(Layer::Entity), &["src/main/java/shop/entity/Order.java".to_string()]);
        assert_eq!(own.owned_by(Layer::Dto).len(), 1);
        assert_eq!(own.shared_with(Layer::Dto), vec!["src/main/java/shop/entity/dto/Weird.java"]);
        assert_eq!(own.unowned, vec!["README.md".to_string()]);
        assert!(own.owned_by(Layer::Service).is_empty());
    }
}
