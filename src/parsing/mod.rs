//! SPARQL parsing of subscriptions and one-shot queries.

pub mod sparql_parser;

pub use sparql_parser::{
    decompose_query, parse_subscription, DecomposedQuery, ParsedSubscription, QueryForm,
};
