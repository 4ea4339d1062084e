//! The `users` collection served by the binary.

use std::sync::Arc;

use log::info;
use serde_json::{json, Map, Value};

use crate::action::{Backend, ExecuteOptions, ItemMapper};
use crate::adapters::document::{search_filter, CustomFilterFn, StoreQuery};
use crate::adapters::SqliteCollection;
use crate::api::AppState;
use crate::controller::ExecuteAction;
use crate::error::DataKitError;
use crate::query::{SortDirection, SortSpec};
use crate::utils::Utils;

pub const USERS: &str = "users";

const FIRST_NAMES: [&str; 12] = [
    "Ada", "Grace", "Alan", "Barbara", "Edsger", "Frances", "Donald", "Margaret", "Ken",
    "Radia", "Niklaus", "Shafi",
];
const LAST_NAMES: [&str; 10] = [
    "Lovelace", "Hopper", "Turing", "Liskov", "Dijkstra", "Allen", "Knuth", "Hamilton",
    "Thompson", "Perlman",
];
const ROLES: [&str; 3] = ["admin", "editor", "viewer"];

/// Execution options for `users`: `search` over name and email, exact
/// `role`, `minAge` lower bound, `active` as the only query key.
pub fn users_options(max_limit: u64) -> ExecuteOptions {
    ExecuteOptions::default()
        .with_max_limit(max_limit)
        .with_custom_filter("search", search_filter(["name", "email"]))
        .with_custom_filter("role", exact_filter("role"))
        .with_custom_filter("minAge", min_filter("age"))
        .allow_query(["active"])
        .allow_sorts(["name", "email", "role", "age", "_id"])
        .with_default_sort(SortSpec::new().with("name", SortDirection::Asc))
}

pub fn users_action(collection: SqliteCollection, max_limit: u64) -> ExecuteAction<Value, Value> {
    ExecuteAction::new(
        Backend::store(collection),
        ItemMapper::identity(),
        users_options(max_limit),
    )
}

/// Application state with the `users` collection registered
pub fn app_state(collection: SqliteCollection, max_limit: u64) -> AppState {
    AppState::new().with_collection(USERS, users_action(collection, max_limit))
}

/// Inserts `count` generated users. The same count always yields the same
/// records.
pub fn seed_users(collection: &SqliteCollection, count: usize) -> Result<Vec<i64>, DataKitError> {
    let docs: Vec<Value> = (0..count).map(user).collect();
    let ids = collection.insert_many(docs)?;
    info!("Seeded {} users into '{}'", ids.len(), collection.name());
    Ok(ids)
}

fn user(i: usize) -> Value {
    let first = FIRST_NAMES[i % FIRST_NAMES.len()];
    let last = LAST_NAMES[(i / FIRST_NAMES.len()) % LAST_NAMES.len()];
    json!({
        "name": format!("{first} {last}"),
        "email": format!("{}.{}{}@example.com", first.to_lowercase(), last.to_lowercase(), i),
        "role": ROLES[i % ROLES.len()],
        "age": 18 + (i * 7) % 50,
        "active": i % 3 != 0,
    })
}

fn exact_filter(field: &'static str) -> CustomFilterFn {
    Arc::new(move |value: &Value| {
        let mut fragment = StoreQuery::new();
        if Utils::is_provided(value) {
            fragment.insert(field.to_owned(), value.clone());
        }
        fragment
    })
}

/// `{field: {"$gte": n}}`. Numeric strings are accepted since values
/// restored from a URL arrive as text.
fn min_filter(field: &'static str) -> CustomFilterFn {
    Arc::new(move |value: &Value| {
        let mut fragment = StoreQuery::new();
        let bound = match value {
            Value::Number(n) => Some(Value::Number(n.clone())),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        };
        if let Some(bound) = bound {
            let mut op = Map::new();
            op.insert("$gte".to_owned(), bound);
            fragment.insert(field.to_owned(), Value::Object(op));
        }
        fragment
    })
}
