//! Statement and rule layers.
//!
//! Every processed sentence becomes an immutable `Statement` node (`st#`).
//! Entities extracted from it are linked with `MENTIONS`, and conditional
//! sentence pairs are lifted into `Rule` nodes (`r#`).

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::ids::IdPrefix;
use crate::model::{KgEdge, KgNode, KnowledgeGraph};

pub const STATEMENT: &str = "Statement";
pub const RULE: &str = "Rule";
pub const MENTIONS: &str = "MENTIONS";
pub const HAS_CONDITION: &str = "HAS_CONDITION";
pub const HAS_CONCLUSION: &str = "HAS_CONCLUSION";

/// Node attribute naming the document a statement or topic came from.
pub const DOCUMENT: &str = "document";

/// Add the statement for sentence `index` of `document_id`, or return the id
/// it already has.
///
/// Existing statements are never modified.
pub fn add_statement(
    kg: &mut KnowledgeGraph,
    document_id: &str,
    sentence: &str,
    index: usize,
    span: (usize, usize),
) -> String {
    if let Some(existing) = kg.nodes_of_kind(STATEMENT).find(|n| {
        n.attr_str(DOCUMENT) == Some(document_id) && n.attr_u64("index") == Some(index as u64)
    }) {
        return existing.id.clone();
    }

    let id = kg.next_id(IdPrefix::Statement);
    let node = KgNode::new(id.clone(), sentence, STATEMENT)
        .with_attribute(DOCUMENT, document_id)
        .with_attribute("index", index as u64)
        .with_attribute("char_start", span.0 as u64)
        .with_attribute("char_end", span.1 as u64);
    kg.nodes.push(node);
    id
}

/// Statement `(id, text)` pairs of one document in sentence order.
pub fn statements(kg: &KnowledgeGraph, document_id: &str) -> Vec<(String, String)> {
    let mut nodes: Vec<&KgNode> = kg
        .nodes_of_kind(STATEMENT)
        .filter(|n| n.attr_str(DOCUMENT) == Some(document_id))
        .collect();
    nodes.sort_by_key(|n| n.attr_u64("index").unwrap_or(u64::MAX));
    nodes
        .into_iter()
        .map(|n| (n.id.clone(), n.label.clone()))
        .collect()
}

/// Link `statement_id` to each entity in `entity_ids` that exists in the
/// graph. Returns the number of new edges.
pub fn link_mentions<'a>(
    kg: &mut KnowledgeGraph,
    statement_id: &str,
    entity_ids: impl IntoIterator<Item = &'a String>,
) -> usize {
    let targets: Vec<String> = entity_ids
        .into_iter()
        .filter(|id| id.as_str() != statement_id && kg.contains_node(id))
        .cloned()
        .collect();

    targets
        .into_iter()
        .filter(|target| kg.push_edge(KgEdge::new(statement_id, MENTIONS, target.clone())))
        .count()
}

/// A rule found in the statement sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCandidate {
    pub condition_id: String,
    pub conclusion_id: String,
    pub condition: String,
    pub conclusion: String,
}

static IF_THEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^if\s+(.+?),\s*then\s+(.+)$").expect("valid regex"));
static CONDITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^if\s").expect("valid regex"));
static CONCLUSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:then|this will|this would)\s").expect("valid regex"));
static THEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^then,?\s+").expect("valid regex"));

fn strip_terminal(text: &str) -> String {
    text.trim().trim_end_matches(['.', '!', ';']).trim().to_string()
}

/// Find conditional rules in `(id, text)` statements.
///
/// A statement `If A, then B` is a rule on its own. Otherwise a statement
/// starting with `If` followed by one starting with `Then`, `This will` or
/// `This would` forms a rule across both.
pub fn detect_rules(statements: &[(String, String)]) -> Vec<RuleCandidate> {
    let mut rules = Vec::new();
    let mut i = 0;

    while i < statements.len() {
        let (id, text) = &statements[i];
        let text = text.trim();

        if let Some(caps) = IF_THEN_RE.captures(text) {
            rules.push(RuleCandidate {
                condition_id: id.clone(),
                conclusion_id: id.clone(),
                condition: strip_terminal(&caps[1]),
                conclusion: strip_terminal(&caps[2]),
            });
            i += 1;
            continue;
        }

        if CONDITION_RE.is_match(text) {
            if let Some((next_id, next_text)) = statements.get(i + 1) {
                if CONCLUSION_RE.is_match(next_text.trim()) {
                    rules.push(RuleCandidate {
                        condition_id: id.clone(),
                        conclusion_id: next_id.clone(),
                        condition: strip_terminal(&CONDITION_RE.replace(text, "")),
                        conclusion: strip_terminal(&THEN_RE.replace(next_text.trim(), "")),
                    });
                    i += 2;
                    continue;
                }
            }
        }
        i += 1;
    }

    rules
}

/// Create a `Rule` node per candidate with condition and conclusion edges.
/// Candidates already present are skipped. Returns the new rule ids.
pub fn add_rules(kg: &mut KnowledgeGraph, candidates: &[RuleCandidate]) -> Vec<String> {
    let mut added = Vec::new();

    for rule in candidates {
        let exists = kg.nodes_of_kind(RULE).any(|n| {
            n.attributes.get("condition_statement").and_then(|v| v.as_str())
                == Some(rule.condition_id.as_str())
                && n.attributes.get("conclusion_statement").and_then(|v| v.as_str())
                    == Some(rule.conclusion_id.as_str())
        });
        if exists {
            continue;
        }

        let id = kg.next_id(IdPrefix::Rule);
        kg.nodes.push(
            KgNode::new(id.clone(), rule.condition.clone(), RULE)
                .with_attribute("conclusion", rule.conclusion.clone())
                .with_attribute("condition_statement", rule.condition_id.clone())
                .with_attribute("conclusion_statement", rule.conclusion_id.clone()),
        );
        kg.push_edge(KgEdge::new(id.clone(), HAS_CONDITION, rule.condition_id.clone()));
        kg.push_edge(KgEdge::new(id.clone(), HAS_CONCLUSION, rule.conclusion_id.clone()));
        added.push(id);
    }

    debug!(rules = added.len(), "Added rule nodes");
    added
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(texts: &[&str]) -> Vec<(String, String)> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| (format!("st{}", i + 1), t.to_string()))
            .collect()
    }

    #[test]
    fn statements_are_immutable_per_index() {
        let mut kg = KnowledgeGraph::new();
        let a = add_statement(&mut kg, "doc-a", "The insurer pays.", 0, (0, 17));
        let b = add_statement(&mut kg, "doc-a", "Floods are covered.", 1, (18, 37));
        let again = add_statement(&mut kg, "doc-a", "Rewritten text.", 0, (0, 15));

        assert_eq!((a.as_str(), b.as_str()), ("st1", "st2"));
        assert_eq!(again, "st1");
        assert_eq!(kg.node("st1").unwrap().label, "The insurer pays.");
        assert_eq!(kg.node("st2").unwrap().attr_u64("char_end"), Some(37));
        assert_eq!(
            statements(&kg, "doc-a"),
            vec![
                ("st1".into(), "The insurer pays.".into()),
                ("st2".into(), "Floods are covered.".into())
            ]
        );
    }

    #[test]
    fn same_index_in_another_document_is_a_new_statement() {
        let mut kg = KnowledgeGraph::new();
        let first = add_statement(&mut kg, "doc-a", "The insurer pays.", 0, (0, 17));
        let second = add_statement(&mut kg, "doc-b", "Hail is excluded.", 0, (0, 17));

        assert_eq!((first.as_str(), second.as_str()), ("st1", "st2"));
        assert_eq!(kg.node("st2").unwrap().label, "Hail is excluded.");
        assert_eq!(statements(&kg, "doc-b"), vec![("st2".into(), "Hail is excluded.".into())]);
        assert!(statements(&kg, "doc-c").is_empty());
    }

    #[test]
    fn mentions_only_link_existing_nodes() {
        let mut kg = KnowledgeGraph::new();
        let st = add_statement(&mut kg, "doc-a", "The insurer covers floods.", 0, (0, 26));
        kg.nodes.push(KgNode::new("n1", "Insurer", "Organisation"));
        let ids = vec!["n1".to_string(), "n99".to_string(), "n1".to_string()];

        assert_eq!(link_mentions(&mut kg, &st, &ids), 1);
        assert_eq!(kg.edges[0].relation, MENTIONS);
        assert_eq!(kg.edges[0].target, "n1");
    }

    #[test]
    fn detects_two_sentence_chains_and_inline_rules() {
        let statements = pairs(&[
            "If the vehicle collides with another vehicle.",
            "Then the insurer covers the repair cost.",
            "Floods are covered.",
            "If a storm occurs, then roof damage is covered.",
            "If the driver is drunk.",
            "The policy ends.",
        ]);
        let rules = detect_rules(&statements);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].condition_id, "st1");
        assert_eq!(rules[0].conclusion_id, "st2");
        assert_eq!(rules[0].condition, "the vehicle collides with another vehicle");
        assert_eq!(rules[0].conclusion, "the insurer covers the repair cost");
        assert_eq!(rules[1].condition_id, "st4");
        assert_eq!(rules[1].conclusion_id, "st4");
        assert_eq!(rules[1].condition, "a storm occurs");
        assert_eq!(rules[1].conclusion, "roof damage is covered");
    }

    #[test]
    fn this_will_counts_as_conclusion() {
        let statements = pairs(&["If emissions exceed the limit.", "This will raise the cost."]);
        let rules = detect_rules(&statements);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].conclusion, "This will raise the cost");
    }

    #[test]
    fn rules_create_nodes_and_edges_once() {
        let mut kg = KnowledgeGraph::new();
        add_statement(&mut kg, "doc-a", "If the car crashes.", 0, (0, 19));
        add_statement(&mut kg, "doc-a", "Then the insurer pays.", 1, (20, 42));
        let candidates = detect_rules(&statements(&kg, "doc-a"));

        assert_eq!(add_rules(&mut kg, &candidates), vec!["r1".to_string()]);
        assert!(add_rules(&mut kg, &candidates).is_empty());

        let rule = kg.node("r1").unwrap();
        assert_eq!(rule.label, "the car crashes");
        assert_eq!(rule.attr_str("conclusion"), Some("the insurer pays"));
        let relations: Vec<_> = kg
            .edges
            .iter()
            .map(|e| (e.relation.as_str(), e.target.as_str()))
            .collect();
        assert_eq!(relations, vec![(HAS_CONDITION, "st1"), (HAS_CONCLUSION, "st2")]);
    }
}
