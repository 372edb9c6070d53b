//! Recursive summary trees with model-directed splitting.

use tracing::{debug, instrument};

use clearsure_graph::SummaryNode;
use clearsure_llm::LanguageModel;
use clearsure_llm::prompts::{one_sentence_summary, propose_split_spans};
use clearsure_shared::{Result, SummaryConfig};

#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub max_depth: usize,
    /// Texts of at most this many characters are not split further.
    pub min_chars: usize,
    /// Spans proposed beyond this count are ignored.
    pub max_children: usize,
    /// Ask for a one-sentence summary of every node.
    pub summarize: bool,
}

impl From<&SummaryConfig> for SummaryOptions {
    fn from(config: &SummaryConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            min_chars: config.min_chars,
            max_children: config.max_children,
            summarize: false,
        }
    }
}

/// Build the summary tree of `text`. Node offsets are inclusive character
/// positions in `text`.
#[instrument(skip_all, fields(chars = text.chars().count(), max_depth = opts.max_depth))]
pub async fn build_summary_tree(
    text: &str,
    model: &dyn LanguageModel,
    opts: &SummaryOptions,
) -> Result<SummaryNode> {
    build_node(text, 0, 0, model, opts).await
}

async fn build_node(
    text: &str,
    offset: usize,
    depth: usize,
    model: &dyn LanguageModel,
    opts: &SummaryOptions,
) -> Result<SummaryNode> {
    let chars: Vec<char> = text.chars().collect();
    let mut node = SummaryNode {
        summary: None,
        start: offset,
        end: offset + chars.len().saturating_sub(1),
        children: Vec::new(),
    };

    if opts.summarize {
        node.summary = Some(one_sentence_summary(text, model).await?);
    }

    if depth >= opts.max_depth || chars.len() <= opts.min_chars {
        return Ok(node);
    }

    let spans = propose_split_spans(text, model).await?;
    debug!(depth, spans = spans.len(), "Proposed split");

    for span in spans.into_iter().take(opts.max_children) {
        let child_text: String = chars[span.start..=span.end].iter().collect();
        let child = Box::pin(build_node(
            &child_text,
            offset + span.start,
            depth + 1,
            model,
            opts,
        ))
        .await?;
        node.children.push(child);
    }

    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsure_llm::MockModel;

    fn opts(max_depth: usize, min_chars: usize, max_children: usize) -> SummaryOptions {
        SummaryOptions {
            max_depth,
            min_chars,
            max_children,
            summarize: false,
        }
    }

    #[tokio::test]
    async fn short_text_is_a_leaf() {
        let model = MockModel::new(Vec::<String>::new());
        let tree = build_summary_tree("tiny", &model, &opts(6, 400, 10)).await.unwrap();
        assert!(tree.children.is_empty());
        assert_eq!((tree.start, tree.end), (0, 3));
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn splits_recursively_with_absolute_offsets() {
        let text = "aaaaaaaaaabbbbbbbbbbcccccccccc";
        let model = MockModel::new([
            r#"[{"start": 0, "end": 9}, {"start": 10, "end": 29}]"#,
            r#"[{"start": 0, "end": 9}, {"start": 10, "end": 19}]"#,
        ]);
        let tree = build_summary_tree(text, &model, &opts(3, 10, 10)).await.unwrap();

        assert_eq!(tree.children.len(), 2);
        assert!(tree.children[0].children.is_empty());
        let second = &tree.children[1];
        assert_eq!((second.start, second.end), (10, 29));
        let grandchildren: Vec<_> = second.children.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(grandchildren, vec![(10, 19), (20, 29)]);
        assert!(model.prompts()[1].contains("bbbbbbbbbbcccccccccc"));
    }

    #[tokio::test]
    async fn honours_depth_and_child_limits() {
        let text = "0123456789";
        let model = MockModel::new([r#"[{"start": 0, "end": 2}, {"start": 3, "end": 5}, {"start": 6, "end": 9}]"#]);
        let tree = build_summary_tree(text, &model, &opts(1, 0, 2)).await.unwrap();
        assert_eq!(tree.children.len(), 2);
        assert!(tree.children.iter().all(|c| c.children.is_empty()));
        assert_eq!(model.remaining(), 0);
    }

    #[tokio::test]
    async fn summaries_are_attached_when_requested() {
        let model = MockModel::new(["<think>x</think> A short policy."]);
        let options = SummaryOptions {
            summarize: true,
            ..opts(6, 400, 10)
        };
        let tree = build_summary_tree("Short policy text.", &model, &options).await.unwrap();
        assert_eq!(tree.summary.as_deref(), Some("A short policy."));
    }
}
