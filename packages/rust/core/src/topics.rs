//! Topic tree construction by sequential sentence labelling.

use tracing::{debug, info, instrument};

use clearsure_graph::TopicNode;
use clearsure_ingestion::split_into_sentences;
use clearsure_llm::LanguageModel;
use clearsure_llm::prompts::{label_text, sentence_topic_same};
use clearsure_llm::text::clean_label;
use clearsure_shared::Result;

const DEFAULT_CONTEXT_WINDOW: usize = 8192;

/// Context window, in tokens, of well-known models.
pub fn get_context_window(model_id: &str) -> usize {
    match model_id {
        "gpt-3.5-turbo" => 16384,
        "gpt-4" => 8192,
        "gpt-4-turbo" => 128000,
        _ => DEFAULT_CONTEXT_WINDOW,
    }
}

/// Keep the first `limit` whitespace-separated tokens of `text`.
pub fn ensure_length(text: &str, limit: usize) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() <= limit {
        return text.to_string();
    }
    tokens[..limit].join(" ")
}

/// Label the whole text, then walk its sentences: a run of sentences shares a
/// topic for as long as the model agrees that each next sentence continues
/// the label of the run's first sentence.
///
/// Offsets are character positions with inclusive ends. Ids are `t1, t2, …`
/// in creation order with the root first.
#[instrument(skip_all, fields(model = model.model_id(), chars = text.chars().count()))]
pub async fn build_topic_tree(text: &str, model: &dyn LanguageModel) -> Result<TopicNode> {
    let limit = get_context_window(model.model_id()) / 2;
    let total_chars = text.chars().count();

    let root_label = clean_label(&label_text(&ensure_length(text, limit), model).await?);
    info!(root = %root_label, "Labelled document");
    let mut root = TopicNode::new("t1", root_label, 0, total_chars.saturating_sub(1));

    let sentences = split_into_sentences(text);
    let mut next_id = 2;
    let mut i = 0;

    while i < sentences.len() {
        let first = &sentences[i];
        let label = clean_label(&label_text(&ensure_length(&first.text, limit), model).await?);
        let mut end = first.char_end;
        let mut j = i + 1;

        while j < sentences.len() {
            let sentence = ensure_length(&sentences[j].text, limit);
            if !sentence_topic_same(&label, &sentence, model).await? {
                break;
            }
            end = sentences[j].char_end;
            j += 1;
        }

        debug!(label = %label, start = first.char_start, end = end - 1, "New topic");
        root.children.push(TopicNode::new(
            format!("t{next_id}"),
            label,
            first.char_start,
            end - 1,
        ));
        next_id += 1;
        i = j;
    }

    Ok(root)
}
