use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::DataKitError;

pub mod pagination;
pub mod schema;

pub use pagination::{PageItem, PaginationInfo};

/// Maximum number of sort entries a request may carry
pub const MAX_SORTS: usize = 5;

/// Maximum length of a sort path
pub const MAX_SORT_PATH_LEN: usize = 100;

/// Sort direction. On the wire this is `1` (ascending) or `-1` (descending).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Next state in the header-click cycle: none -> asc -> desc -> none
    pub fn cycle(current: Option<SortDirection>) -> Option<SortDirection> {
        match current {
            None => Some(SortDirection::Asc),
            Some(SortDirection::Asc) => Some(SortDirection::Desc),
            Some(SortDirection::Desc) => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

impl TryFrom<i64> for SortDirection {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SortDirection::Asc),
            -1 => Ok(SortDirection::Desc),
            other => Err(format!("sort direction must be 1 or -1, got {other}")),
        }
    }
}

impl From<SortDirection> for i64 {
    fn from(value: SortDirection) -> Self {
        value.as_i64()
    }
}

/// One entry of a multi-column sort. Position in the list is priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortEntry {
    pub path: String,
    pub value: SortDirection,
}

impl SortEntry {
    pub fn new(path: impl Into<String>, value: SortDirection) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// Current direction for `path`, if it is sorted at all
pub fn sort_value(sorts: &[SortEntry], path: &str) -> Option<SortDirection> {
    sorts.iter().find(|s| s.path == path).map(|s| s.value)
}

/// An ordered field -> direction map, as used by the legacy `sort` request
/// field and by document stores. Serialized as a JSON object whose key order
/// is the sort priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec(Vec<(String, SortDirection)>);

impl SortSpec {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets the direction for `field`. An existing field keeps its position.
    pub fn set(&mut self, field: impl Into<String>, direction: SortDirection) {
        let field = field.into();
        match self.0.iter_mut().find(|(f, _)| *f == field) {
            Some(existing) => existing.1 = direction,
            None => self.0.push((field, direction)),
        }
    }

    pub fn with(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.set(field, direction);
        self
    }

    pub fn from_entries(entries: &[SortEntry]) -> Self {
        let mut spec = Self::new();
        for entry in entries {
            spec.set(entry.path.clone(), entry.value);
        }
        spec
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SortDirection)> {
        self.0.iter().map(|(f, d)| (f.as_str(), *d))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(f, _)| f.as_str())
    }

    pub fn to_entries(&self) -> Vec<SortEntry> {
        self.0
            .iter()
            .map(|(f, d)| SortEntry::new(f.clone(), *d))
            .collect()
    }
}

impl Serialize for SortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (field, direction) in &self.0 {
            map.serialize_entry(field, direction)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SortSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SortSpecVisitor;

        impl<'de> Visitor<'de> for SortSpecVisitor {
            type Value = SortSpec;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping field names to 1 or -1")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SortSpec, A::Error> {
                let mut spec = SortSpec::new();
                while let Some((field, direction)) =
                    access.next_entry::<String, SortDirection>()?
                {
                    spec.set(field, direction);
                }
                Ok(spec)
            }
        }

        deserializer.deserialize_map(SortSpecVisitor)
    }
}

/// How a filter value is matched against a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchType {
    /// Case-insensitive substring match
    Regex,
    /// Equality
    Exact,
}

/// Per-key filter behavior: match type and an optional target field name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfigEntry {
    #[serde(rename = "type")]
    pub match_type: MatchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl FilterConfigEntry {
    pub fn regex() -> Self {
        Self {
            match_type: MatchType::Regex,
            field: None,
        }
    }

    pub fn exact() -> Self {
        Self {
            match_type: MatchType::Exact,
            field: None,
        }
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

pub type FilterConfig = BTreeMap<String, FilterConfigEntry>;

/// The actions a fetch request can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Fetch,
}

impl Action {
    pub const FETCH: &'static str = "FETCH";

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Fetch => Self::FETCH,
        }
    }
}

impl FromStr for Action {
    type Err = DataKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::FETCH => Ok(Action::Fetch),
            other => Err(DataKitError::UnsupportedAction(other.to_owned())),
        }
    }
}

/// A request from the client controller to the execution layer.
///
/// Everything here is untrusted. `filter` and `query` are kept as raw JSON so
/// the execution layer can reject non-primitive values with a precise error
/// instead of a generic deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Legacy single-object sort
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorts: Option<Vec<SortEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_config: Option<FilterConfig>,
}

impl FetchRequest {
    /// A FETCH request for the given page
    pub fn fetch(page: u64, limit: u64) -> Self {
        Self {
            action: Some(Action::FETCH.to_owned()),
            page: Some(page),
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// The requested action; an absent action means FETCH
    pub fn action(&self) -> Result<Action, DataKitError> {
        match self.action.as_deref() {
            None => Ok(Action::Fetch),
            Some(s) => s.parse(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_sort(mut self, path: impl Into<String>, value: SortDirection) -> Self {
        self.sorts
            .get_or_insert_with(Vec::new)
            .push(SortEntry::new(path, value));
        self
    }

    pub fn with_filter_config(mut self, key: impl Into<String>, entry: FilterConfigEntry) -> Self {
        self.filter_config
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), entry);
        self
    }
}

/// Result envelope returned by the execution layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DataKitResult<R> {
    #[serde(rename = "ITEMS", rename_all = "camelCase")]
    Items { items: Vec<R>, document_total: u64 },
}

impl<R> DataKitResult<R> {
    pub fn items(&self) -> &[R] {
        match self {
            DataKitResult::Items { items, .. } => items,
        }
    }

    pub fn document_total(&self) -> u64 {
        match self {
            DataKitResult::Items { document_total, .. } => *document_total,
        }
    }

    pub fn into_parts(self) -> (Vec<R>, u64) {
        match self {
            DataKitResult::Items {
                items,
                document_total,
            } => (items, document_total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_sort_direction_wire_format() {
        let entry: SortEntry = serde_json::from_value(json!({"path": "age", "value": -1})).unwrap();
        assert_eq!(entry, SortEntry::new("age", SortDirection::Desc));
        assert_eq!(serde_json::to_value(&entry).unwrap(), json!({"path": "age", "value": -1}));

        let bad = serde_json::from_value::<SortEntry>(json!({"path": "age", "value": 2}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_sort_cycle() {
        assert_eq!(SortDirection::cycle(None), Some(SortDirection::Asc));
        assert_eq!(SortDirection::cycle(Some(SortDirection::Asc)), Some(SortDirection::Desc));
        assert_eq!(SortDirection::cycle(Some(SortDirection::Desc)), None);
    }

    #[test]
    fn test_sort_spec_keeps_key_order() {
        let spec: SortSpec = serde_json::from_value(json!({"role": 1, "age": -1})).unwrap();
        let fields: Vec<&str> = spec.fields().collect();
        assert_eq!(fields, vec!["role", "age"]);
        assert_eq!(serde_json::to_string(&spec).unwrap(), r#"{"role":1,"age":-1}"#);
    }

    #[test]
    fn test_sort_spec_set_replaces_in_place() {
        let spec = SortSpec::new()
            .with("a", SortDirection::Asc)
            .with("b", SortDirection::Asc)
            .with("a", SortDirection::Desc);
        assert_eq!(
            spec.to_entries(),
            vec![
                SortEntry::new("a", SortDirection::Desc),
                SortEntry::new("b", SortDirection::Asc)
            ]
        );
    }

    #[test]
    fn test_filter_config_casing() {
        let config: FilterConfigEntry =
            serde_json::from_value(json!({"type": "REGEX", "field": "fullName"})).unwrap();
        assert_eq!(config, FilterConfigEntry::regex().on_field("fullName"));

        assert!(serde_json::from_value::<FilterConfigEntry>(json!({"type": "regex"})).is_err());
    }

    #[test]
    fn test_fetch_request_camel_case() {
        let req = FetchRequest::fetch(2, 10)
            .with_filter_config("name", FilterConfigEntry::exact())
            .with_filter("name", "Ada");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "FETCH",
                "page": 2,
                "limit": 10,
                "filter": {"name": "Ada"},
                "filterConfig": {"name": {"type": "EXACT"}}
            })
        );
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(FetchRequest::default().action().unwrap(), Action::Fetch);

        let req = FetchRequest {
            action: Some("DELETE".into()),
            ..Default::default()
        };
        assert!(matches!(
            req.action(),
            Err(DataKitError::UnsupportedAction(a)) if a == "DELETE"
        ));
    }

    #[test]
    fn test_result_envelope_shape() {
        let result = DataKitResult::Items {
            items: vec![json!({"id": 1})],
            document_total: 7,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"type": "ITEMS", "items": [{"id": 1}], "documentTotal": 7})
        );
        assert_eq!(result.document_total(), 7);
    }
}
