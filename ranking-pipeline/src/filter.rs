//! Typed filter algebra over person profiles.
//!
//! A [`Filter`] is declarative: it names a profile field, an operator and a
//! value set. [`FilterQuery`] compiles a conjunction of filters into a
//! parameterized SurrealQL `WHERE` clause, and [`Filter::matches`] evaluates
//! the same semantics in memory.

use std::{collections::BTreeMap, fmt, str::FromStr};

use common::{error::AppError, storage::types::person::Person};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterOperator {
    And,
    Or,
    Not,
    In,
    Range,
}

impl FilterOperator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::In => "IN",
            Self::Range => "RANGE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Location,
    Title,
    Company,
    Institution,
    Industry,
    AffiliationSchool,
    AffiliationType,
    ClassYear,
    CurrentRole,
}

impl FilterField {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Title => "title",
            Self::Company => "company",
            Self::Institution => "institution",
            Self::Industry => "industry",
            Self::AffiliationSchool => "affiliation_school",
            Self::AffiliationType => "affiliation_type",
            Self::ClassYear => "class_year",
            Self::CurrentRole => "current_role",
        }
    }

    /// Category used in match reasons and `matched_filters`.
    pub const fn category(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Title => "title",
            Self::Company => "company",
            Self::Institution => "education",
            Self::Industry => "industry",
            Self::AffiliationSchool | Self::AffiliationType => "affiliation",
            Self::ClassYear => "class_year",
            Self::CurrentRole => "current_role",
        }
    }

    /// Human-readable purpose, used when explaining a parsed query.
    pub const fn purpose(self) -> &'static str {
        match self {
            Self::Location => "Geographic constraint",
            Self::Title => "Role/position constraint",
            Self::Company => "Company constraint",
            Self::Institution => "Education constraint",
            Self::Industry => "Industry constraint",
            Self::AffiliationSchool | Self::AffiliationType | Self::ClassYear => {
                "Affiliation constraint"
            }
            Self::CurrentRole => "Current position constraint",
        }
    }

    const fn accepts(self, value: &FilterValue) -> bool {
        match (self, value) {
            (Self::ClassYear, FilterValue::Integer(_))
            | (Self::CurrentRole, FilterValue::Bool(_) | FilterValue::Text(_)) => true,
            (Self::ClassYear | Self::CurrentRole, _) => false,
            (_, FilterValue::Text(_)) => true,
            _ => false,
        }
    }

    /// Closed whitelist of SurrealQL expressions, one per field; `param` names the bound value.
    fn surql_predicate(self, value: &FilterValue, param: &str) -> String {
        match (self, value) {
            (Self::Location, _) => {
                format!("string::lowercase(location ?? '') CONTAINS ${param}")
            }
            (Self::Title, _) => {
                format!("string::lowercase(array::join(experiences[*].title, ' | ')) CONTAINS ${param}")
            }
            (Self::Company, _) => {
                format!("string::lowercase(array::join(experiences[*].company, ' | ')) CONTAINS ${param}")
            }
            (Self::Industry, _) => format!(
                "string::lowercase(array::join(experiences[WHERE industry].industry, ' | ')) CONTAINS ${param}"
            ),
            (Self::Institution, _) => format!(
                "string::lowercase(array::join(educations[*].institution, ' | ')) CONTAINS ${param}"
            ),
            (Self::AffiliationSchool, _) => format!(
                "string::lowercase(array::join(affiliations[WHERE school].school, ' | ')) CONTAINS ${param}"
            ),
            (Self::AffiliationType, _) => format!(
                "string::lowercase(array::join(affiliations[WHERE affiliation_type].affiliation_type, ' | ')) CONTAINS ${param}"
            ),
            (Self::ClassYear, _) => format!("${param} IN affiliations[*].class_year"),
            (Self::CurrentRole, FilterValue::Bool(_)) => {
                format!("(array::len(experiences[WHERE is_current = true]) > 0) = ${param}")
            }
            (Self::CurrentRole, _) => format!(
                "string::lowercase(array::join(experiences[WHERE is_current = true].title, ' | ')) CONTAINS ${param}"
            ),
        }
    }

    fn text_values(self, person: &Person) -> Vec<String> {
        match self {
            Self::Location => person.location.iter().cloned().collect(),
            Self::Title => person.experiences.iter().map(|e| e.title.clone()).collect(),
            Self::Company => person.experiences.iter().map(|e| e.company.clone()).collect(),
            Self::Industry => person
                .experiences
                .iter()
                .filter_map(|e| e.industry.clone())
                .collect(),
            Self::Institution => person
                .educations
                .iter()
                .map(|e| e.institution.clone())
                .collect(),
            Self::AffiliationSchool => person
                .affiliations
                .iter()
                .filter_map(|a| a.school.clone())
                .collect(),
            Self::AffiliationType => person
                .affiliations
                .iter()
                .filter_map(|a| a.affiliation_type.clone())
                .collect(),
            Self::CurrentRole => person.current_experiences().map(|e| e.title.clone()).collect(),
            Self::ClassYear => Vec::new(),
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterField {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "location" => Ok(Self::Location),
            "title" => Ok(Self::Title),
            "company" => Ok(Self::Company),
            "institution" | "education" | "school" => Ok(Self::Institution),
            "industry" => Ok(Self::Industry),
            "affiliation_school" => Ok(Self::AffiliationSchool),
            "affiliation_type" => Ok(Self::AffiliationType),
            "class_year" => Ok(Self::ClassYear),
            "current_role" | "is_current" => Ok(Self::CurrentRole),
            other => Err(AppError::Validation(format!("unknown filter field '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl FilterValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
        }
    }

    fn to_binding(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Integer(i) => Value::from(*i),
            Self::Text(t) => Value::String(t.trim().to_lowercase()),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Text(t) => f.write_str(t),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    field: FilterField,
    operator: FilterOperator,
    values: Vec<FilterValue>,
    negated: bool,
}

impl Filter {
    pub fn new<I, V>(field: FilterField, operator: FilterOperator, values: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        let values: Vec<FilterValue> = values.into_iter().map(Into::into).collect();

        match operator {
            FilterOperator::Range => validate_range(field, &values)?,
            FilterOperator::In if values.is_empty() => {
                return Err(AppError::Validation(
                    "IN requires at least one value".into(),
                ))
            }
            _ if values.is_empty() => {
                return Err(AppError::Validation(format!(
                    "{} requires at least one value",
                    operator.as_str()
                )))
            }
            _ => {}
        }

        if let Some(bad) = values.iter().find(|v| !field.accepts(v)) {
            return Err(AppError::Validation(format!(
                "{field} filter does not accept {} value '{bad}'",
                bad.kind()
            )));
        }

        Ok(Self {
            field,
            operator,
            values,
            negated: false,
        })
    }

    pub fn any_of<I, V>(field: FilterField, values: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        Self::new(field, FilterOperator::In, values)
    }

    pub fn range(field: FilterField, min: i64, max: i64) -> Result<Self, AppError> {
        Self::new(field, FilterOperator::Range, [min, max])
    }

    #[must_use]
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    pub const fn field(&self) -> FilterField {
        self.field
    }

    pub const fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn values(&self) -> &[FilterValue] {
        &self.values
    }

    pub const fn negated(&self) -> bool {
        self.negated
    }

    pub const fn category(&self) -> &'static str {
        self.field.category()
    }

    /// Filter values (or profile values, for RANGE) that this person satisfies.
    pub fn matched_values(&self, person: &Person) -> Vec<String> {
        if self.operator == FilterOperator::Range {
            let (min, max) = match self.values.as_slice() {
                [FilterValue::Integer(min), FilterValue::Integer(max)] => (*min, *max),
                _ => return Vec::new(),
            };
            return person
                .affiliations
                .iter()
                .filter_map(|a| a.class_year)
                .filter(|year| (min..=max).contains(year))
                .map(|year| year.to_string())
                .collect();
        }

        let haystack: Vec<String> = self
            .field
            .text_values(person)
            .iter()
            .map(|v| v.to_lowercase())
            .collect();

        self.values
            .iter()
            .filter(|value| value_matches(self.field, value, person, &haystack))
            .map(ToString::to_string)
            .collect()
    }

    pub fn matches(&self, person: &Person) -> bool {
        let matched = self.matched_values(person).len();
        let satisfied = match self.operator {
            FilterOperator::In | FilterOperator::Or | FilterOperator::Range => matched > 0,
            FilterOperator::And => matched == self.values.len(),
            FilterOperator::Not => matched == 0,
        };
        satisfied != self.negated
    }
}

fn validate_range(field: FilterField, values: &[FilterValue]) -> Result<(), AppError> {
    if values.len() != 2 {
        return Err(AppError::Validation("RANGE requires 2 values".into()));
    }
    match values {
        [FilterValue::Integer(min), FilterValue::Integer(max)] => {
            if min > max {
                return Err(AppError::Validation("RANGE requires min <= max".into()));
            }
        }
        _ => {
            return Err(AppError::Validation(
                "RANGE requires two integer bounds".into(),
            ))
        }
    }
    if field != FilterField::ClassYear {
        return Err(AppError::Validation(format!(
            "RANGE is not supported on {field}"
        )));
    }
    Ok(())
}

fn value_matches(field: FilterField, value: &FilterValue, person: &Person, haystack: &[String]) -> bool {
    match value {
        FilterValue::Text(text) => {
            let needle = text.trim().to_lowercase();
            !needle.is_empty() && haystack.iter().any(|candidate| candidate.contains(&needle))
        }
        FilterValue::Integer(year) => person
            .affiliations
            .iter()
            .any(|a| a.class_year == Some(*year)),
        FilterValue::Bool(flag) => {
            field == FilterField::CurrentRole && (person.current_experiences().next().is_some() == *flag)
        }
    }
}

/// A compiled conjunction of filters: a SurrealQL predicate plus its bound values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterQuery {
    pub clause: Option<String>,
    pub bindings: BTreeMap<String, Value>,
}

impl FilterQuery {
    pub fn compile(filters: &[Filter]) -> Self {
        let mut bindings = BTreeMap::new();
        let mut clauses = Vec::with_capacity(filters.len());

        for filter in filters {
            let mut bind = |value: &FilterValue| {
                let name = format!("f{}", bindings.len());
                bindings.insert(name.clone(), value.to_binding());
                name
            };

            let expression = match filter.operator {
                FilterOperator::Range => {
                    let (min, max) = match filter.values.as_slice() {
                        [min, max] => (bind(min), bind(max)),
                        _ => continue,
                    };
                    format!(
                        "(array::len(affiliations[WHERE class_year >= ${min} AND class_year <= ${max}]) > 0)"
                    )
                }
                operator => {
                    let predicates: Vec<String> = filter
                        .values
                        .iter()
                        .map(|value| {
                            let param = bind(value);
                            filter.field.surql_predicate(value, &param)
                        })
                        .collect();
                    let joiner = if operator == FilterOperator::And { " AND " } else { " OR " };
                    let joined = format!("({})", predicates.join(joiner));
                    if operator == FilterOperator::Not {
                        format!("!{joined}")
                    } else {
                        joined
                    }
                }
            };

            clauses.push(if filter.negated {
                format!("!({expression})")
            } else {
                expression
            });
        }

        Self {
            clause: (!clauses.is_empty()).then(|| clauses.join(" AND ")),
            bindings,
        }
    }
}

#[cfg(test)]
mod tests {
    use common::storage::types::person::{Affiliation, Education, Experience};

    use super::*;

    fn sample_person() -> Person {
        let mut person = Person::new("Dana Chen");
        person.location = Some("New York, NY".into());
        person.experiences = vec![
            Experience {
                company: "Stripe".into(),
                title: "Senior Product Manager".into(),
                industry: Some("Fintech".into()),
                is_current: true,
            },
            Experience {
                company: "McKinsey".into(),
                title: "Consultant".into(),
                industry: None,
                is_current: false,
            },
        ];
        person.educations = vec![Education {
            institution: "Stanford University".into(),
            degree: Some("MBA".into()),
        }];
        person.affiliations = vec![Affiliation {
            organization: "Yale".into(),
            school: Some("Yale College".into()),
            affiliation_type: Some("alumni".into()),
            class_year: Some(2015),
        }];
        person
    }

    #[test]
    fn range_requires_two_ordered_values() {
        let err = Filter::new(FilterField::ClassYear, FilterOperator::Range, [2015_i64])
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: RANGE requires 2 values");

        let err = Filter::range(FilterField::ClassYear, 2020, 2010).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: RANGE requires min <= max");

        assert!(Filter::range(FilterField::ClassYear, 2010, 2010).is_ok());
    }

    #[test]
    fn in_requires_values() {
        let err = Filter::any_of(FilterField::Location, Vec::<String>::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: IN requires at least one value"
        );
    }

    #[test]
    fn value_kinds_are_checked_per_field() {
        assert!(Filter::any_of(FilterField::ClassYear, ["2015"]).is_err());
        assert!(Filter::any_of(FilterField::Location, [true]).is_err());
        assert!(Filter::any_of(FilterField::CurrentRole, [true]).is_ok());
    }

    #[test]
    fn unknown_field_name_is_rejected() {
        assert!(matches!(
            "favorite_color".parse::<FilterField>(),
            Err(AppError::Validation(_))
        ));
        assert_eq!("education".parse::<FilterField>().unwrap(), FilterField::Institution);
    }

    #[test]
    fn in_memory_matching_follows_operators() {
        let person = sample_person();

        let location = Filter::any_of(FilterField::Location, ["new york", "nyc", "boston"]).unwrap();
        assert!(location.matches(&person));
        assert_eq!(location.matched_values(&person), vec!["new york".to_string()]);

        let all_titles =
            Filter::new(FilterField::Title, FilterOperator::And, ["product", "consultant"]).unwrap();
        assert!(all_titles.matches(&person));

        let none = Filter::new(FilterField::Company, FilterOperator::Not, ["google"]).unwrap();
        assert!(none.matches(&person));
        assert!(!none.clone().negate().matches(&person));

        let years = Filter::range(FilterField::ClassYear, 2010, 2016).unwrap();
        assert_eq!(years.matched_values(&person), vec!["2015".to_string()]);

        let current = Filter::any_of(FilterField::CurrentRole, [true]).unwrap();
        assert!(current.matches(&person));
    }

    #[test]
    fn compile_binds_every_value() {
        let filters = vec![
            Filter::any_of(FilterField::Location, ["NYC", "New York"]).unwrap(),
            Filter::range(FilterField::ClassYear, 2010, 2020).unwrap().negate(),
        ];
        let compiled = FilterQuery::compile(&filters);
        let clause = compiled.clause.expect("clause");

        assert!(clause.contains("$f0"));
        assert!(clause.contains("$f3"));
        assert!(clause.contains(" AND !("));
        assert!(!clause.contains("nyc"), "values must never be interpolated");
        assert_eq!(compiled.bindings.get("f0"), Some(&Value::String("nyc".into())));
        assert_eq!(compiled.bindings.get("f2"), Some(&Value::from(2010)));
        assert_eq!(compiled.bindings.len(), 4);
    }

    #[test]
    fn compile_empty_has_no_clause() {
        let compiled = FilterQuery::compile(&[]);
        assert!(compiled.clause.is_none());
        assert!(compiled.bindings.is_empty());
    }
}
