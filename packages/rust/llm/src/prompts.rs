//! Prompt templates and the helpers that send them.
//!
//! Every helper takes the model as `&dyn LanguageModel` and returns the raw
//! answer; callers decide how much post-processing they need.

use serde_json::Value;
use tracing::debug;

use clearsure_shared::{ClearSureError, Result};

use crate::text::{SplitSpan, parse_split_spans, parse_yes_no, remove_think_block};
use crate::{LanguageModel, PromptTask};

const SIMPLIFY: &str = "\
Task: Rewrite the sentence below so a named-entity recognition model can process it easily.
RULES:
- Do not add, remove or alter factual content.
- Keep proper names, dates, numbers, durations and organisations verbatim.
- Break long or nested clauses into short declarative sentences. One fact per sentence.
- No relative pronouns (who, which, that), no parentheses, no clause-joining conjunctions.
- Use commas only for true lists.
- Preserve chronology; add a sentence if needed to keep a temporal relationship.
- Keep ALL information.
Return only the rewritten sentences, one per line, without any extra text.

Example input:
If the insured vehicle, which must be road-legal, collides with another vehicle, the insurer covers the full repair cost minus a deductible of 200 Euros.
Expected output:
If the insured vehicle collides with another vehicle.
The insured vehicle must be road-legal.
Then the insurer covers the full repair cost.
A deductible of 200 Euros is subtracted from the repair cost.

Input sentence:
{text}";

const SIMPLIFY_STAGE2: &str = "\
Task: Split and format the input so every sentence complies with the formatting rules of our NER pre-processor.
STRICT RULES
1. One fact per sentence.
2. No relative words: who, which, that, whose, where, when.
3. No clause-joining conjunctions (and, but, because, so, unless, while, although, however) inside one sentence.
4. Conditionals and causals are a two-step chain:
   - Sentence A begins with \"If ...\" and is a complete sentence ending with a full stop.
   - Sentence B begins with \"Then ...\", \"This will ...\" or \"This would ...\".
5. Never invent information. If a fix would drop a fact, copy the original line unchanged.
6. Every sentence is grammatically complete (subject + verb). No fragments.
7. A sentence may not start with a bare preposition unless it also has a subject and a verb.
8. Return only the final sentence(s), one per line. Do not show your reasoning.
PROCESS
- If the line already follows all rules, output it unchanged.
- Otherwise split, rewrite or reorder just enough to satisfy every rule without modifying factual content.
Input sentence:
{text}";

const KNOWLEDGE_ONTOLOGY: &str = "\
Task: Build a knowledge-graph patch for the sentences below.
Return ONLY a JSON object of this shape, without commentary:
{\"nodes\": [{\"id\": \"n1\", \"label\": \"Insurer\", \"type\": \"Organisation\"}],
 \"edges\": [{\"source\": \"n1\", \"relation\": \"COVERS\", \"target\": \"n2\"}]}
RULES:
- Entities get ids n1, n2, ...; literal values (amounts, dates, durations) get ids w1, w2, ...
- Every edge references ids defined in \"nodes\".
- Relations are short verbs in UPPER_SNAKE_CASE.
- Do not invent facts that are not in the input.
Input:
{text}";

const CLEAN_UP_FIRST_PHASE: &str = "\
Task: Review the knowledge-graph patch below and correct its edges.
- Remove edges that duplicate another edge with a synonymous relation.
- Fix edges whose direction contradicts the relation name.
- Keep node ids exactly as given; do not add nodes.
Return ONLY a JSON object {\"edges_patch\": [{\"source\": ..., \"relation\": ..., \"target\": ...}]}.
Patch:
{text}";

const LABEL_TEXT: &str = "\
Give a short title (1 to 3 words) for the topic of the text below.
Return only the title.
Text:
{text}";

const TOPIC_SAME: &str = "\
Current topic: {label}
Does the following sentence belong to the current topic? Answer only \"yes\" or \"no\".
Sentence:
{text}";

const ONE_SENTENCE_SUMMARY: &str = "\
Summarize the text below in exactly one sentence. Return only the sentence.
Text:
{text}";

const SPLIT_SPANS: &str = "\
Split the text below into coherent, contiguous sections.
Return ONLY a JSON array of objects {\"start\": <int>, \"end\": <int>} with inclusive character offsets into the text, in order and without overlap.
Return [] if the text should not be split.
Text ({len} characters):
{text}";

fn render(template: &str, text: &str) -> String {
    template.replace("{text}", text)
}

pub async fn simplify_text(text: &str, model: &dyn LanguageModel) -> Result<String> {
    model
        .invoke_task(PromptTask::Simplify, &render(SIMPLIFY, text))
        .await
}

pub async fn simplify_text_stage2(text: &str, model: &dyn LanguageModel) -> Result<String> {
    model
        .invoke_task(PromptTask::SimplifyStage2, &render(SIMPLIFY_STAGE2, text))
        .await
}

/// JSON `{nodes, edges}` patch for `text`.
pub async fn create_knowledge_ontology(text: &str, model: &dyn LanguageModel) -> Result<String> {
    model
        .invoke_task(PromptTask::KnowledgeOntology, &render(KNOWLEDGE_ONTOLOGY, text))
        .await
}

/// JSON `{edges_patch}` correcting the edges of `patch`.
pub async fn clean_up_first_phase(patch: &Value, model: &dyn LanguageModel) -> Result<String> {
    let patch = serde_json::to_string_pretty(patch)
        .map_err(|e| ClearSureError::parse(format!("failed to serialize patch: {e}")))?;
    model
        .invoke_task(PromptTask::CleanUp, &render(CLEAN_UP_FIRST_PHASE, &patch))
        .await
}

pub async fn label_text(text: &str, model: &dyn LanguageModel) -> Result<String> {
    model
        .invoke_task(PromptTask::Label, &render(LABEL_TEXT, text))
        .await
}

/// Whether `sentence` continues the topic named `label`.
pub async fn sentence_topic_same(
    label: &str,
    sentence: &str,
    model: &dyn LanguageModel,
) -> Result<bool> {
    let prompt = render(&TOPIC_SAME.replace("{label}", label), sentence);
    let answer = model.invoke_task(PromptTask::TopicSame, &prompt).await?;
    Ok(parse_yes_no(&answer))
}

pub async fn one_sentence_summary(text: &str, model: &dyn LanguageModel) -> Result<String> {
    let answer = model
        .invoke_task(PromptTask::Summary, &render(ONE_SENTENCE_SUMMARY, text))
        .await?;
    Ok(remove_think_block(&answer).trim().to_string())
}

/// Ask the model where to split `text`. Offsets are character positions.
pub async fn propose_split_spans(text: &str, model: &dyn LanguageModel) -> Result<Vec<SplitSpan>> {
    let len = text.chars().count();
    let prompt = render(&SPLIT_SPANS.replace("{len}", &len.to_string()), text);
    let answer = model.invoke_task(PromptTask::SplitSpans, &prompt).await?;
    parse_split_spans(&answer, len)
}

/// Run the stage-2 rewrite once over every sentence.
///
/// A line rewritten into several lines is replaced in place and the cursor
/// skips past the inserted lines; those are not rewritten again.
pub async fn reiterate_over_sentences(
    mut sentences: Vec<String>,
    model: &dyn LanguageModel,
) -> Result<Vec<String>> {
    let mut i = 0;
    while i < sentences.len() {
        let raw = simplify_text_stage2(&sentences[i], model).await?;
        let rewritten: Vec<String> = remove_think_block(&raw)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();

        if rewritten.len() > 1 {
            debug!(index = i, parts = rewritten.len(), "sentence split");
            let step = rewritten.len();
            sentences.splice(i..=i, rewritten);
            i += step;
        } else {
            i += 1;
        }
    }
    Ok(sentences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockModel;

    #[tokio::test]
    async fn templates_embed_the_input() {
        let model = MockModel::new(["ok"]);
        simplify_text("The insurer pays.", &model).await.unwrap();
        let prompts = model.prompts();
        assert!(prompts[0].ends_with("Input sentence:\nThe insurer pays."));
    }

    #[tokio::test]
    async fn topic_same_fills_label_and_parses_answer() {
        let model = MockModel::new(["<think>...</think>Yes", "no"]);
        assert!(sentence_topic_same("Flood Cover", "Floods are covered.", &model).await.unwrap());
        assert!(!sentence_topic_same("Flood Cover", "Fire is excluded.", &model).await.unwrap());
        assert!(model.prompts()[0].starts_with("Current topic: Flood Cover"));
    }

    #[tokio::test]
    async fn split_prompt_reports_length_in_chars() {
        let model = MockModel::new(["[{\"start\": 0, \"end\": 3}]"]);
        let spans = propose_split_spans("Schäden", &model).await.unwrap();
        assert_eq!(spans, vec![SplitSpan { start: 0, end: 3 }]);
        assert!(model.prompts()[0].contains("(7 characters)"));
    }

    #[tokio::test]
    async fn placeholders_in_user_text_stay_literal() {
        let model = MockModel::new(["no", "[]"]);
        sentence_topic_same("Flood Cover", "Pay {label} now.", &model).await.unwrap();
        propose_split_spans("Total {len} items.", &model).await.unwrap();
        let prompts = model.prompts();
        assert!(prompts[0].ends_with("Sentence:\nPay {label} now."));
        assert!(prompts[1].ends_with("Total {len} items."));
        assert!(prompts[1].contains("(18 characters)"));
    }

    #[tokio::test]
    async fn reiteration_replaces_split_lines_in_place() {
        let model = MockModel::new([
            "If the car crashes.\nThen the insurer pays.",
            "Floods are covered.",
        ]);
        let sentences = vec![
            "If the car crashes the insurer pays.".to_string(),
            "Floods are covered.".to_string(),
        ];
        let out = reiterate_over_sentences(sentences, &model).await.unwrap();
        assert_eq!(
            out,
            vec!["If the car crashes.", "Then the insurer pays.", "Floods are covered."]
        );
        assert_eq!(model.prompts().len(), 2);
    }

    #[tokio::test]
    async fn clean_up_serializes_patch() {
        let model = MockModel::new(["{\"edges_patch\": []}"]);
        let patch = serde_json::json!({"nodes": [{"id": "n1"}], "edges": []});
        clean_up_first_phase(&patch, &model).await.unwrap();
        assert!(model.prompts()[0].contains("\"id\": \"n1\""));
    }
}
