use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(Connection, "connection", {
    person_id: String,
    connected_person_id: String,
    connection_type: String,
    strength: f32
});

impl Connection {
    pub fn new(
        person_id: impl Into<String>,
        connected_person_id: impl Into<String>,
        connection_type: impl Into<String>,
        strength: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            person_id: person_id.into(),
            connected_person_id: connected_person_id.into(),
            connection_type: connection_type.into(),
            strength: strength.clamp(0.0, 1.0),
        }
    }

    /// The endpoint opposite `person_id`, or `None` when the edge does not touch it.
    pub fn other_end(&self, person_id: &str) -> Option<&str> {
        if self.person_id == person_id {
            Some(&self.connected_person_id)
        } else if self.connected_person_id == person_id {
            Some(&self.person_id)
        } else {
            None
        }
    }

    /// All edges touching `person_id`, in either direction.
    pub async fn get_for_person(
        person_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE person_id = $person_id OR connected_person_id = $person_id",
            )
            .bind(("table", Self::table_name()))
            .bind(("person_id", person_id.to_string()))
            .await?;
        let edges: Vec<Self> = response.take(0)?;
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_end_is_direction_agnostic() {
        let edge = Connection::new("a", "b", "colleague", 0.7);
        assert_eq!(edge.other_end("a"), Some("b"));
        assert_eq!(edge.other_end("b"), Some("a"));
        assert_eq!(edge.other_end("c"), None);
    }

    #[test]
    fn strength_is_clamped() {
        assert!((Connection::new("a", "b", "friend", 3.0).strength - 1.0).abs() < f32::EPSILON);
        assert!(Connection::new("a", "b", "friend", -1.0).strength.abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn fetches_edges_in_both_directions() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        db.store_item(Connection::new("s", "a", "colleague", 0.9))
            .await
            .expect("store");
        db.store_item(Connection::new("b", "s", "classmate", 0.4))
            .await
            .expect("store");
        db.store_item(Connection::new("a", "b", "friend", 0.5))
            .await
            .expect("store");

        let edges = Connection::get_for_person("s", &db).await.expect("query");
        let mut neighbors: Vec<&str> = edges.iter().filter_map(|e| e.other_end("s")).collect();
        neighbors.sort_unstable();
        assert_eq!(neighbors, vec!["a", "b"]);
    }
}
