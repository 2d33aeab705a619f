use std::collections::HashMap;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{person::Person, profile_embedding::ProfileEmbedding, StoredObject},
    },
};
use serde::Deserialize;
use tracing::debug;

use crate::filter::{Filter, FilterQuery};

#[derive(Debug, Clone)]
pub struct SimilarityHit {
    pub entity_id: String,
    pub score: f32,
    pub entity: Person,
}

/// Datastore contract the candidate generator depends on.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Top `top_k` profiles whose embedding similarity is at least `min_score`, best first.
    async fn similarity_search(
        &self,
        vector: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SimilarityHit>, AppError>;

    /// Profiles satisfying every filter. With no filters, the most recently updated profiles.
    async fn filtered_search(&self, filters: &[Filter], limit: usize)
        -> Result<Vec<Person>, AppError>;
}

#[derive(Debug, Deserialize)]
struct SimilarityRow {
    person_id: String,
    score: f64,
}

#[async_trait]
impl CandidateStore for SurrealDbClient {
    async fn similarity_search(
        &self,
        vector: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SimilarityHit>, AppError> {
        let mut response = self
            .client
            .query(
                "SELECT person_id, vector::similarity::cosine(embedding, $embedding) AS score
                 FROM type::table($table)
                 WHERE vector::similarity::cosine(embedding, $embedding) >= $min_score
                 ORDER BY score DESC
                 LIMIT $limit",
            )
            .bind(("table", ProfileEmbedding::table_name()))
            .bind(("embedding", vector.to_vec()))
            .bind(("min_score", f64::from(min_score)))
            .bind(("limit", top_k))
            .await?;

        let rows: Vec<SimilarityRow> = response.take(0)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = rows.iter().map(|row| row.person_id.clone()).collect();
        let mut people: HashMap<String, Person> = Person::get_by_ids(&ids, self)
            .await?
            .into_iter()
            .map(|person| (person.id.clone(), person))
            .collect();

        let hits: Vec<SimilarityHit> = rows
            .into_iter()
            .filter_map(|row| {
                people.remove(&row.person_id).map(|entity| SimilarityHit {
                    entity_id: row.person_id,
                    score: row.score as f32,
                    entity,
                })
            })
            .collect();

        debug!(hits = hits.len(), "Similarity search completed");
        Ok(hits)
    }

    async fn filtered_search(
        &self,
        filters: &[Filter],
        limit: usize,
    ) -> Result<Vec<Person>, AppError> {
        let compiled = FilterQuery::compile(filters);
        let where_clause = compiled
            .clause
            .map(|clause| format!(" WHERE {clause}"))
            .unwrap_or_default();
        let statement = format!(
            "SELECT * FROM type::table($table){where_clause} ORDER BY updated_at DESC LIMIT $limit"
        );

        let mut query = self
            .client
            .query(statement)
            .bind(("table", Person::table_name()))
            .bind(("limit", limit));
        for binding in compiled.bindings {
            query = query.bind(binding);
        }

        let people: Vec<Person> = query.await?.take(0)?;
        debug!(
            filters = filters.len(),
            rows = people.len(),
            "Structured search completed"
        );
        Ok(people)
    }
}
