//! Node and edge identifiers.
//!
//! Renumberable node ids are a short prefix plus a counter (`n12`, `st3`);
//! edge ids are `e` plus a counter. Anything else is an external id and is
//! never rewritten.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{KgEdge, KgNode};

static ID_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(st|[nswtr])(\d+)$").expect("valid regex"));
static EDGE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^e(\d+)$").expect("valid regex"));

/// Old patch id → id in the merged graph.
pub type IdMap = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdPrefix {
    Entity,
    Summary,
    Value,
    Topic,
    Statement,
    Rule,
}

impl IdPrefix {
    pub const ALL: [IdPrefix; 6] = [
        Self::Entity,
        Self::Summary,
        Self::Value,
        Self::Topic,
        Self::Statement,
        Self::Rule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "n",
            Self::Summary => "s",
            Self::Value => "w",
            Self::Topic => "t",
            Self::Statement => "st",
            Self::Rule => "r",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == prefix)
    }

    pub fn format(&self, index: u64) -> String {
        format!("{}{index}", self.as_str())
    }

    /// Split a renumberable id into prefix and counter.
    pub fn parse(id: &str) -> Option<(Self, u64)> {
        let caps = ID_PREFIX_RE.captures(id)?;
        let prefix = Self::from_prefix(caps.get(1)?.as_str())?;
        let index = caps.get(2)?.as_str().parse().ok()?;
        Some((prefix, index))
    }

    /// Highest counter in use for this prefix, 0 when none.
    pub fn max_index(&self, nodes: &[KgNode]) -> u64 {
        nodes
            .iter()
            .filter_map(|n| Self::parse(&n.id))
            .filter(|(p, _)| p == self)
            .map(|(_, idx)| idx)
            .max()
            .unwrap_or(0)
    }
}

/// Per-prefix counters continuing from an existing node list.
#[derive(Debug, Clone)]
pub struct NodeCounters(HashMap<IdPrefix, u64>);

impl NodeCounters {
    pub fn from_nodes(nodes: &[KgNode]) -> Self {
        Self(
            IdPrefix::ALL
                .into_iter()
                .map(|p| (p, p.max_index(nodes)))
                .collect(),
        )
    }

    pub fn next_id(&mut self, prefix: IdPrefix) -> String {
        let counter = self.0.entry(prefix).or_insert(0);
        *counter += 1;
        prefix.format(*counter)
    }
}

/// Sequential `e#` allocator.
#[derive(Debug, Clone, Copy)]
pub struct EdgeCounter(u64);

impl EdgeCounter {
    pub fn from_edges(edges: &[KgEdge]) -> Self {
        let max = edges
            .iter()
            .filter_map(|e| e.edge_id.as_deref())
            .filter_map(|id| EDGE_ID_RE.captures(id))
            .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self(max)
    }

    pub fn next_id(&mut self) -> String {
        self.0 += 1;
        format!("e{}", self.0)
    }
}
