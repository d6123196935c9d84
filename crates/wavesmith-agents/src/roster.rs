//! Static layer tables for agents, reviewers and work pods.
//!
//! All of them are exhaustive matches on [`Layer`]; adding a layer fails to
//! compile until every table has an entry.

use serde::{Deserialize, Serialize};
use wavesmith_core::types::{Layer, ProjectLevel};

/// Agent that implements `layer` by default.
pub fn implementer(layer: Layer) -> &'static str {
    layer.default_agent()
}

/// Reviewer for a completed layer. Never the layer's default implementer.
pub fn validator(layer: Layer) -> &'static str {
    match layer {
        Layer::Entity => "service-expert",
        Layer::Repository => "service-expert",
        Layer::Service => "api-expert",
        Layer::Controller => "test-expert",
        Layer::Dto => "api-expert",
        Layer::Config => "security-expert",
        Layer::Exception => "test-expert",
        Layer::Test => "service-expert",
    }
}

pub fn review_checklist(layer: Layer) -> &'static [&'static str] {
    match layer {
        Layer::Entity => &[
            "field names and types are consistent with the domain model",
            "relationships and cascade settings are explicit",
            "identifiers and equality are well defined",
        ],
        Layer::Dto => &[
            "fields match the entity and API contract",
            "validation annotations cover required input",
            "no persistence types leak into request/response objects",
        ],
        Layer::Config => &[
            "no secrets or credentials are hard-coded",
            "security and CORS settings are not overly permissive",
            "profiles and property names are consistent",
        ],
        Layer::Exception => &[
            "every error path maps to a meaningful status and message",
            "internal details are not exposed to clients",
            "handlers are covered by tests",
        ],
        Layer::Repository => &[
            "query methods match how the service uses them",
            "no N+1 access patterns or unbounded queries",
            "transaction boundaries are left to the service layer",
        ],
        Layer::Service => &[
            "business rules match the feature requirements",
            "transactions and error handling are explicit",
            "dependencies are injected, not constructed",
        ],
        Layer::Controller => &[
            "endpoints, verbs and status codes match the API contract",
            "input is validated before reaching the service",
            "responses use DTOs rather than entities",
        ],
        Layer::Test => &[
            "tests assert behaviour rather than implementation details",
            "edge cases and failure paths are covered",
            "tests are independent and repeatable",
        ],
    }
}

/// The four roles of a work pod for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRoles {
    pub navigator: &'static str,
    pub dev: &'static str,
    pub executor: &'static str,
    pub qa: &'static str,
}

pub fn pod_roles(layer: Layer) -> PodRoles {
    let dev = match layer {
        Layer::Config => "spring-architect",
        other => implementer(other),
    };
    let qa = match layer {
        Layer::Config => "security-expert",
        Layer::Test => "qa-monitor",
        _ => "code-reviewer",
    };
    PodRoles {
        navigator: "spring-architect",
        dev,
        executor: "test-expert",
        qa,
    }
}

/// Starter projects work without pods; every other level uses all four roles.
pub fn pods_enabled(level: ProjectLevel) -> bool {
    match level {
        ProjectLevel::Starter => false,
        ProjectLevel::SingleModule
        | ProjectLevel::MultiModule
        | ProjectLevel::Monolith
        | ProjectLevel::Msa => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_never_reviews_its_own_layer() {
        for layer in Layer::ALL {
            assert_ne!(validator(layer), implementer(layer), "layer {layer}");
        }
    }

    #[test]
    fn every_layer_has_a_checklist() {
        for layer in Layer::ALL {
            assert!(!review_checklist(layer).is_empty());
        }
    }

    #[test]
    fn pod_overrides() {
        let config = pod_roles(Layer::Config);
        assert_eq!(config.dev, "spring-architect");
        assert_eq!(config.qa, "security-expert");
        assert_eq!(pod_roles(Layer::Test).qa, "qa-monitor");
        let entity = pod_roles(Layer::Entity);
        assert_eq!(entity.dev, "domain-expert");
        assert_eq!(entity.navigator, "spring-architect");
        assert_eq!(entity.executor, "test-expert");
        assert_eq!(entity.qa, "code-reviewer");
    }

    #[test]
    fn starter_has_no_pods() {
        assert!(!pods_enabled(ProjectLevel::Starter));
        assert!(pods_enabled(ProjectLevel::Msa));
    }
}
