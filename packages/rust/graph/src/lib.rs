//! The ClearSure knowledge graph.
//!
//! [`KnowledgeGraph`] is the `{nodes, edges}` document persisted as
//! `final_kg.json`. Around it sit the id scheme ([`IdPrefix`]), patch merging
//! ([`update_kg`], [`clean_kg`]), the statement, rule, topic and summary
//! layers, the Cypher export, and triple/RDF helpers.

pub mod cypher;
pub mod ids;
pub mod merge;
pub mod model;
pub mod rdf;
pub mod statements;
pub mod summary;
pub mod topics;
pub mod triples;

pub use cypher::{
    CypherTopic, clean_relation, extract_topics_from_cypher, kg_to_statements, write_cypher,
};
pub use ids::{EdgeCounter, IdMap, IdPrefix, NodeCounters};
pub use merge::{
    CleanOptions, CleanStats, clean_kg, load_patch, load_patch_list, parse_patch, update_kg,
};
pub use model::{Attributes, KgEdge, KgNode, KnowledgeGraph};
pub use rdf::TripleStore;
pub use statements::{
    RuleCandidate, add_rules, add_statement, detect_rules, link_mentions, statements,
};
pub use summary::{SummaryNode, merge_summary_into_kg, summary_tree_to_kg};
pub use topics::{
    TopicNode, add_topic_tree, assign_statements_to_topics, flatten_topics, renumber_topics,
};
pub use triples::{Triple, parse_rebel_output, parse_triples};
