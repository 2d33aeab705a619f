use crate::stored_object;
use uuid::Uuid;

stored_object!(ProfileEmbedding, "profile_embedding", {
    /// Id of the `person` record this vector describes
    person_id: String,
    embedding: Vec<f32>
});

impl ProfileEmbedding {
    pub fn new(person_id: impl Into<String>, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            person_id: person_id.into(),
            embedding,
        }
    }
}
