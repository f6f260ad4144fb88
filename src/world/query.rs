//! # Queries
//!
//! Read-only request/reply endpoints over the finalized state. A query is
//! registered under `[group.]name` with typed request and reply structs; the
//! registry stores a type-erased closure that routes raw JSON through
//! decode, handler and encode.
//!
//! The registry also produces the discovery list ([`EndpointDesc`]) for both
//! queries and messages.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::schema::{Describe, FieldSchema};
use crate::world::context::ReadOnlyContext;
use crate::world::error::{SystemError, WorldError, WorldResult};
use crate::world::message::{split_name, MessageRegistry};

type QueryFn = Box<dyn Fn(&ReadOnlyContext<'_>, &[u8]) -> WorldResult<Vec<u8>> + Send + Sync>;

/// Registration record of one query.
pub struct QueryDesc {
    /// Group of the query.
    pub group: String,
    /// Name within the group.
    pub name: String,
    /// Request field schema.
    pub request_fields: FieldSchema,
    /// Reply field schema.
    pub reply_fields: FieldSchema,
    handler: QueryFn,
}

impl QueryDesc {
    /// Decodes `request`, runs the handler and encodes the reply.
    pub fn handle(&self, ctx: &ReadOnlyContext<'_>, request: &[u8]) -> WorldResult<Vec<u8>> {
        (self.handler)(ctx, request)
    }
}

impl std::fmt::Debug for QueryDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryDesc").field("group", &self.group).field("name", &self.name).finish()
    }
}

/// Queries known to a world, keyed by `(group, name)`.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: BTreeMap<(String, String), QueryDesc>,
}

impl QueryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `full_name`.
    pub fn register<Req, Rep, F>(&mut self, full_name: &str, handler: F) -> WorldResult<()>
    where
        Req: Describe + DeserializeOwned + 'static,
        Rep: Describe + Serialize + 'static,
        F: Fn(&ReadOnlyContext<'_>, Req) -> Result<Rep, SystemError> + Send + Sync + 'static,
    {
        let (group, name) = split_name(full_name)?;
        let key = (group.clone(), name.clone());
        if self.queries.contains_key(&key) {
            return Err(WorldError::DuplicateQuery { group, name });
        }

        let request_fields = Req::describe().ok_or(WorldError::NotAStruct(std::any::type_name::<Req>()))?;
        let reply_fields = Rep::describe().ok_or(WorldError::NotAStruct(std::any::type_name::<Rep>()))?;

        let query_name = full_name.to_string();
        let erased: QueryFn = Box::new(move |ctx: &ReadOnlyContext<'_>, raw: &[u8]| -> WorldResult<Vec<u8>> {
            let request: Req = serde_json::from_slice(raw)?;
            let reply = handler(ctx, request)
                .map_err(|source| WorldError::Query { name: query_name.clone(), source })?;
            Ok(serde_json::to_vec(&reply)?)
        });

        self.queries.insert(key, QueryDesc { group, name, request_fields, reply_fields, handler: erased });
        Ok(())
    }

    /// Looks up a query.
    pub fn get(&self, group: &str, name: &str) -> WorldResult<&QueryDesc> {
        self.queries
            .get(&(group.to_string(), name.to_string()))
            .ok_or_else(|| WorldError::QueryNotFound { group: group.to_string(), name: name.to_string() })
    }

    /// Every registered query, ordered by group then name.
    pub fn iter(&self) -> impl Iterator<Item = &QueryDesc> + '_ {
        self.queries.values()
    }

    /// Number of registered queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Returns `true` if no query is registered.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Discovery record of a message or query endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDesc {
    /// Name within the group.
    pub name: String,
    /// Group.
    pub group: String,
    /// Route the transport layer serves the endpoint at.
    pub url: String,
    /// Request or message body schema.
    pub fields: FieldSchema,
}

/// Discovery records of all messages, then all queries.
pub fn describe_endpoints(messages: &MessageRegistry, queries: &QueryRegistry) -> Vec<EndpointDesc> {
    let txs = messages.iter().map(|m| EndpointDesc {
        name: m.name.clone(),
        group: m.group.clone(),
        url: format!("/tx/{}/{}", m.group, m.name),
        fields: m.fields.clone(),
    });
    let reads = queries.iter().map(|q| EndpointDesc {
        name: q.name.clone(),
        group: q.group.clone(),
        url: format!("/query/{}/{}", q.group, q.name),
        fields: q.request_fields.clone(),
    });
    txs.chain(reads).collect()
}
