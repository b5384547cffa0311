//! Route resolution for docroute
//!
//! Answers "how do I get from format A to format B" using the catalog's edge
//! table. A route is either the identity, one direct edge, or exactly one
//! intermediate hop followed by a direct edge. Deeper searches are never
//! attempted, so cyclic edges cannot cause non-termination.

use crate::catalog::{normalize_id, ConversionEdge, ConversionMethod, FormatCatalog, QualityLoss};
use crate::config::RoutingStrategy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Error returned when no route exists
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("No conversion route from {from} to {to}")]
    NoRouteFound { from: String, to: String },
}

/// One collaborator invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub from: String,
    pub to: String,
    pub estimated_duration_secs: u32,
    pub quality_loss: QualityLoss,
}

/// A fully materialised route between two formats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionPath {
    pub from: String,
    pub to: String,
    pub method: ConversionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermediate: Option<String>,
    /// Zero hops for identity, one for direct, two for intermediate
    pub hops: Vec<Hop>,
    /// Sum of hop durations, saturating at `u32::MAX`
    pub estimated_duration_secs: u32,
    /// Worst hop loss
    pub quality_loss: QualityLoss,
}

impl ConversionPath {
    /// Identity conversion: no work, no loss
    pub fn identity(id: &str) -> Self {
        Self {
            from: id.to_string(),
            to: id.to_string(),
            method: ConversionMethod::Direct,
            intermediate: None,
            hops: Vec::new(),
            estimated_duration_secs: 0,
            quality_loss: QualityLoss::None,
        }
    }

    fn from_direct(edge: &ConversionEdge) -> Self {
        Self {
            from: edge.from.clone(),
            to: edge.to.clone(),
            method: ConversionMethod::Direct,
            intermediate: None,
            hops: vec![Hop {
                from: edge.from.clone(),
                to: edge.to.clone(),
                estimated_duration_secs: edge.estimated_duration_secs,
                quality_loss: edge.quality_loss,
            }],
            estimated_duration_secs: edge.estimated_duration_secs,
            quality_loss: edge.quality_loss,
        }
    }

    /// Combine an intermediate edge with the direct edge leaving its intermediate format
    fn compose(first: &ConversionEdge, via: &str, second: &ConversionEdge) -> Self {
        let hop1 = Hop {
            from: first.from.clone(),
            to: via.to_string(),
            estimated_duration_secs: first.estimated_duration_secs,
            quality_loss: first.quality_loss,
        };
        let hop2 = Hop {
            from: second.from.clone(),
            to: second.to.clone(),
            estimated_duration_secs: second.estimated_duration_secs,
            quality_loss: second.quality_loss,
        };
        Self {
            from: first.from.clone(),
            to: second.to.clone(),
            method: ConversionMethod::Intermediate,
            intermediate: Some(via.to_string()),
            estimated_duration_secs: hop1
                .estimated_duration_secs
                .saturating_add(hop2.estimated_duration_secs),
            quality_loss: hop1.quality_loss.max(hop2.quality_loss),
            hops: vec![hop1, hop2],
        }
    }

    pub fn is_identity(&self) -> bool {
        self.hops.is_empty()
    }
}

/// Resolves conversion paths against a shared catalog
#[derive(Debug, Clone)]
pub struct RouteResolver {
    catalog: Arc<FormatCatalog>,
    strategy: RoutingStrategy,
}

impl RouteResolver {
    pub fn new(catalog: Arc<FormatCatalog>) -> Self {
        Self::with_strategy(catalog, RoutingStrategy::FirstMatch)
    }

    pub fn with_strategy(catalog: Arc<FormatCatalog>, strategy: RoutingStrategy) -> Self {
        Self { catalog, strategy }
    }

    pub fn catalog(&self) -> &Arc<FormatCatalog> {
        &self.catalog
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    /// Resolve the route `from -> to`.
    ///
    /// 1. Identity for any catalog format.
    /// 2. A declared direct edge, verbatim.
    /// 3. One intermediate hop, chosen per the configured strategy. With
    ///    `FirstMatch` the first intermediate edge (in declaration order)
    ///    whose intermediate format has a direct edge to `to` wins.
    pub fn resolve(&self, from: &str, to: &str) -> Result<ConversionPath, RouteError> {
        let from = normalize_id(from);
        let to = normalize_id(to);

        if from == to && self.catalog.contains(&from) {
            return Ok(ConversionPath::identity(&from));
        }

        if let Some(edge) = self.catalog.direct_edge(&from, &to) {
            return Ok(ConversionPath::from_direct(edge));
        }

        let chosen = {
            let mut candidates = self
                .catalog
                .intermediate_edges_from(&from)
                .filter_map(|first| {
                    let via = first.intermediate.as_deref()?;
                    let second = self.catalog.direct_edge(via, &to)?;
                    Some(ConversionPath::compose(first, via, second))
                });

            match self.strategy {
                RoutingStrategy::FirstMatch => candidates.next(),
                RoutingStrategy::LowestCost => {
                    candidates.min_by_key(|p| (p.quality_loss, p.estimated_duration_secs))
                }
            }
        };

        chosen.ok_or(RouteError::NoRouteFound { from, to })
    }

    /// Targets `resolve(from, _)` succeeds for, identity excluded
    pub fn supported_targets(&self, from: &str) -> Vec<String> {
        self.catalog
            .compatibility_matrix()
            .remove(&normalize_id(from))
            .map(|targets| targets.into_iter().collect())
            .unwrap_or_default()
    }

    /// Estimated wall-clock seconds for converting a file of `file_size_bytes`.
    ///
    /// Scales the path's base duration by the size in MiB, never below 1x.
    pub fn estimate_duration(
        &self,
        from: &str,
        to: &str,
        file_size_bytes: u64,
    ) -> Result<f64, RouteError> {
        let path = self.resolve(from, to)?;
        let multiplier = (file_size_bytes as f64 / BYTES_PER_MIB).max(1.0);
        Ok(f64::from(path.estimated_duration_secs) * multiplier)
    }
}
