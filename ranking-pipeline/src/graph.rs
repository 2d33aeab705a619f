use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::connection::Connection},
};
use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::{
    candidates::Candidate,
    query::{GraphConstraint, ScoreDimension},
};

/// A directly connected entity as reported by the graph provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub entity_id: String,
    pub edge_type: String,
    pub strength: f32,
}

/// Side-effect-free neighbor lookup, called repeatedly during traversal.
#[async_trait]
pub trait ConnectionGraph: Send + Sync {
    async fn neighbors(&self, entity_id: &str) -> Result<Vec<Neighbor>, AppError>;
}

#[async_trait]
impl ConnectionGraph for SurrealDbClient {
    async fn neighbors(&self, entity_id: &str) -> Result<Vec<Neighbor>, AppError> {
        let edges = Connection::get_for_person(entity_id, self)
            .await
            .map_err(|err| AppError::GraphUnavailable(err.to_string()))?;

        Ok(edges
            .iter()
            .filter_map(|edge| {
                edge.other_end(entity_id).map(|other| Neighbor {
                    entity_id: other.to_owned(),
                    edge_type: edge.connection_type.clone(),
                    strength: edge.strength,
                })
            })
            .filter(|neighbor| neighbor.entity_id != entity_id)
            .collect())
    }
}

/// Breadth-first traversal from `source`, returning `entity_id -> hop distance`
/// for every entity within `constraint.max_hops()`. The source itself is excluded.
///
/// Entities are marked when enqueued, so each is looked up at most once. All
/// lookups for one level run concurrently and are applied in id order, which
/// keeps the result independent of completion order.
#[instrument(level = "trace", skip(graph, constraint))]
pub async fn reachable_within(
    graph: &dyn ConnectionGraph,
    source: &str,
    constraint: &GraphConstraint,
    concurrency: usize,
) -> Result<BTreeMap<String, u32>, AppError> {
    let mut distances = BTreeMap::new();
    let mut visited: HashSet<String> = HashSet::from([source.to_owned()]);
    let mut frontier = vec![source.to_owned()];

    for hop in 1..=constraint.max_hops() {
        if frontier.is_empty() {
            break;
        }

        let mut level: Vec<(String, Result<Vec<Neighbor>, AppError>)> = stream::iter(frontier)
            .map(|id| async move {
                let neighbors = graph.neighbors(&id).await;
                (id, neighbors)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        level.sort_by(|a, b| a.0.cmp(&b.0));

        let mut next = Vec::new();
        for (id, result) in level {
            let neighbors = result.map_err(|err| match err {
                AppError::GraphUnavailable(_) => err,
                other => AppError::GraphUnavailable(format!("neighbors of {id}: {other}")),
            })?;

            for neighbor in neighbors {
                if !constraint.admits(&neighbor.edge_type, neighbor.strength) {
                    continue;
                }
                if visited.insert(neighbor.entity_id.clone()) {
                    distances.insert(neighbor.entity_id.clone(), hop);
                    next.push(neighbor.entity_id);
                }
            }
        }

        debug!(hop, discovered = next.len(), "Graph traversal level complete");
        frontier = next;
    }

    Ok(distances)
}

pub fn hop_reason(hops: u32) -> String {
    if hops == 1 {
        "connected via 1 hop".to_owned()
    } else {
        format!("connected via {hops} hops")
    }
}

/// Drops candidates missing from `reachable` and scores the rest by `1 / hops`.
/// Returns the number of candidates removed.
pub fn apply_reachability(
    pool: &mut HashMap<String, Candidate>,
    reachable: &BTreeMap<String, u32>,
) -> usize {
    let before = pool.len();
    pool.retain(|id, _| reachable.contains_key(id));

    for (id, candidate) in pool.iter_mut() {
        if let Some(&hops) = reachable.get(id) {
            let proximity = 1.0 / f64::from(hops.max(1));
            candidate.scores.set(
                ScoreDimension::GraphProximity,
                candidate.scores.graph_proximity.max(proximity),
            );
            candidate.add_reason(hop_reason(hops));
        }
    }

    before - pool.len()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphFilterStats {
    pub applied: bool,
    pub failed_open: bool,
    pub reachable_entities: usize,
    pub removed_candidates: usize,
}

/// Narrows the pool to entities reachable under the query's graph constraint.
///
/// Without a constraint, or without a source entity, the pool is untouched.
/// When the provider fails the pool also passes through unfiltered.
pub async fn apply_graph_constraint(
    graph: &dyn ConnectionGraph,
    constraint: Option<&GraphConstraint>,
    source: Option<&str>,
    pool: &mut HashMap<String, Candidate>,
    concurrency: usize,
) -> GraphFilterStats {
    let Some(constraint) = constraint else {
        return GraphFilterStats::default();
    };
    let Some(source) = source else {
        warn!("Graph constraint present but no source entity; skipping traversal");
        return GraphFilterStats::default();
    };

    match reachable_within(graph, source, constraint, concurrency).await {
        Ok(reachable) => {
            let removed = apply_reachability(pool, &reachable);
            debug!(
                reachable = reachable.len(),
                removed,
                remaining = pool.len(),
                "Applied graph constraint"
            );
            GraphFilterStats {
                applied: true,
                failed_open: false,
                reachable_entities: reachable.len(),
                removed_candidates: removed,
            }
        }
        Err(err) => {
            warn!(error = %err, "Graph provider unavailable; passing candidates through unfiltered");
            GraphFilterStats {
                applied: false,
                failed_open: true,
                reachable_entities: 0,
                removed_candidates: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use common::storage::types::person::Person;
    use uuid::Uuid;

    use super::*;

    /// Undirected in-memory adjacency list.
    #[derive(Default)]
    struct MemoryGraph {
        edges: HashMap<String, Vec<Neighbor>>,
        broken: bool,
    }

    impl MemoryGraph {
        fn connect(mut self, a: &str, b: &str, edge_type: &str, strength: f32) -> Self {
            for (from, to) in [(a, b), (b, a)] {
                self.edges.entry(from.to_owned()).or_default().push(Neighbor {
                    entity_id: to.to_owned(),
                    edge_type: edge_type.to_owned(),
                    strength,
                });
            }
            self
        }
    }

    #[async_trait]
    impl ConnectionGraph for MemoryGraph {
        async fn neighbors(&self, entity_id: &str) -> Result<Vec<Neighbor>, AppError> {
            if self.broken {
                return Err(AppError::GraphUnavailable("edge store offline".into()));
            }
            Ok(self.edges.get(entity_id).cloned().unwrap_or_default())
        }
    }

    fn pool(ids: &[&str]) -> HashMap<String, Candidate> {
        ids.iter()
            .map(|id| {
                let mut person = Person::new(*id);
                person.id = (*id).to_owned();
                ((*id).to_owned(), Candidate::new(person))
            })
            .collect()
    }

    #[tokio::test]
    async fn two_hop_reachability() {
        let graph = MemoryGraph::default()
            .connect("S", "A", "colleague", 1.0)
            .connect("A", "B", "colleague", 1.0);
        let constraint = GraphConstraint::new(2).unwrap();

        let reachable = reachable_within(&graph, "S", &constraint, 4).await.unwrap();
        assert_eq!(
            reachable,
            BTreeMap::from([("A".to_owned(), 1), ("B".to_owned(), 2)])
        );

        let mut candidates = pool(&["A", "B", "C"]);
        let removed = apply_reachability(&mut candidates, &reachable);
        assert_eq!(removed, 1);
        assert!(!candidates.contains_key("C"));
        assert!((candidates["A"].scores.graph_proximity - 1.0).abs() < f64::EPSILON);
        assert!((candidates["B"].scores.graph_proximity - 0.5).abs() < f64::EPSILON);
        assert!(candidates["A"].match_reasons.contains("connected via 1 hop"));
        assert!(candidates["B"].match_reasons.contains("connected via 2 hops"));
    }

    #[tokio::test]
    async fn shortest_distance_wins_and_budget_is_respected() {
        // S-A-B-C chain plus a shortcut S-B
        let graph = MemoryGraph::default()
            .connect("S", "A", "friend", 1.0)
            .connect("A", "B", "friend", 1.0)
            .connect("S", "B", "friend", 1.0)
            .connect("B", "C", "friend", 1.0)
            .connect("C", "D", "friend", 1.0);

        let reachable = reachable_within(&graph, "S", &GraphConstraint::new(2).unwrap(), 1)
            .await
            .unwrap();

        assert_eq!(reachable.get("B"), Some(&1));
        assert_eq!(reachable.get("C"), Some(&2));
        assert!(!reachable.contains_key("D"));
        assert!(!reachable.contains_key("S"));
        assert!(reachable.values().all(|hops| *hops <= 2));
    }

    #[tokio::test]
    async fn edge_type_and_strength_limit_traversal() {
        let graph = MemoryGraph::default()
            .connect("S", "A", "colleague", 0.9)
            .connect("S", "B", "classmate", 0.9)
            .connect("S", "C", "colleague", 0.1);
        let constraint = GraphConstraint::new(1)
            .unwrap()
            .with_min_connection_strength(0.5)
            .unwrap()
            .with_connection_types(["colleague"]);

        let reachable = reachable_within(&graph, "S", &constraint, 2).await.unwrap();
        assert_eq!(reachable.keys().collect::<Vec<_>>(), vec!["A"]);
    }

    #[tokio::test]
    async fn provider_failure_fails_open() {
        let graph = MemoryGraph {
            broken: true,
            ..MemoryGraph::default()
        };
        let constraint = GraphConstraint::new(2).unwrap();
        let mut candidates = pool(&["A", "B"]);

        let stats =
            apply_graph_constraint(&graph, Some(&constraint), Some("S"), &mut candidates, 4).await;

        assert!(stats.failed_open);
        assert!(!stats.applied);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.values().all(|c| c.scores.graph_proximity == 0.0));
    }

    #[tokio::test]
    async fn missing_constraint_or_source_is_a_noop() {
        let graph = MemoryGraph::default().connect("S", "A", "friend", 1.0);
        let mut candidates = pool(&["A", "Z"]);

        let stats = apply_graph_constraint(&graph, None, Some("S"), &mut candidates, 4).await;
        assert_eq!(stats, GraphFilterStats::default());

        let constraint = GraphConstraint::new(1).unwrap();
        let stats = apply_graph_constraint(&graph, Some(&constraint), None, &mut candidates, 4).await;
        assert!(!stats.applied);
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn surreal_neighbors_are_undirected() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.store_item(Connection::new("S", "A", "colleague", 0.8))
            .await
            .expect("store");
        db.store_item(Connection::new("B", "A", "classmate", 0.6))
            .await
            .expect("store");

        let reachable = reachable_within(&db, "S", &GraphConstraint::new(2).unwrap(), 4)
            .await
            .expect("traversal");
        assert_eq!(
            reachable,
            BTreeMap::from([("A".to_owned(), 1), ("B".to_owned(), 2)])
        );
    }
}
