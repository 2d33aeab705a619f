use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Experience {
    pub company: String,
    pub title: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Education {
    pub institution: String,
    #[serde(default)]
    pub degree: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Affiliation {
    pub organization: String,
    #[serde(default)]
    pub school: Option<String>,
    #[serde(default)]
    pub affiliation_type: Option<String>,
    #[serde(default)]
    pub class_year: Option<i64>,
}

stored_object!(Person, "person", {
    full_name: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    headline: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    linkedin_url: Option<String>,
    #[serde(default)]
    experiences: Vec<Experience>,
    #[serde(default)]
    educations: Vec<Education>,
    #[serde(default)]
    affiliations: Vec<Affiliation>
});

impl Person {
    pub fn new(full_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            full_name: full_name.into(),
            location: None,
            headline: None,
            summary: None,
            linkedin_url: None,
            experiences: Vec::new(),
            educations: Vec::new(),
            affiliations: Vec::new(),
        }
    }

    /// Experiences flagged as the person's present role(s).
    pub fn current_experiences(&self) -> impl Iterator<Item = &Experience> {
        self.experiences.iter().filter(|exp| exp.is_current)
    }

    pub async fn get_by_ids(ids: &[String], db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let things: Vec<Thing> = ids
            .iter()
            .map(|id| Thing::from((Self::table_name(), id.as_str())))
            .collect();

        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE id IN $things")
            .bind(("table", Self::table_name()))
            .bind(("things", things))
            .await?;

        let people: Vec<Self> = response.take(0)?;
        Ok(people)
    }
}
