use std::sync::Arc;

use parley_common::{ContentPart, Error, Result, Turn, TurnContent, TurnRole};
use tracing::warn;

use crate::image::{ImageFetcher, encode_image, is_remote};
use crate::providers::ContextPage;

/// Builds the user turn sent for a prompt and its image attachments.
pub struct ContextAssembler {
    fetcher: Arc<dyn ImageFetcher>,
}

impl ContextAssembler {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { fetcher }
    }

    /// Plain-text user turn, or a text part followed by one inline image part per reference.
    pub async fn assemble(&self, text: &str, image_refs: &[String]) -> Result<Turn> {
        if image_refs.is_empty() {
            return Ok(Turn::user(text));
        }

        let mut parts = Vec::with_capacity(image_refs.len() + 1);
        parts.push(ContentPart::text(text));
        for reference in image_refs {
            parts.push(ContentPart::image(self.resolve_image(reference).await?));
        }
        Ok(Turn::new(TurnRole::User, TurnContent::Parts(parts)))
    }

    async fn resolve_image(&self, reference: &str) -> Result<String> {
        if is_remote(reference) {
            let path = self.fetcher.fetch(reference).await?;
            let encoded = encode_image(&path.to_string_lossy()).await;
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), "failed to remove downloaded image: {e}");
            }
            return encoded;
        }
        encode_image(reference).await
    }
}

/// Render stored turns as `User:`/`Assistant:` lines, newest pairs first, and
/// return the 1-indexed `page`.
///
/// User turns are buffered until the assistant turn that answers them; a
/// trailing unanswered user turn is not shown. System and tool turns are skipped.
pub fn paginate(history: &[Turn], page: usize, page_size: usize) -> Result<ContextPage> {
    if page_size == 0 {
        return Err(Error::Agent("page size must be greater than zero".into()));
    }

    let mut blocks: Vec<Vec<String>> = Vec::new();
    let mut pending = Vec::new();
    for turn in history {
        match turn.role {
            TurnRole::User => pending.push(format!("User: {}", turn.content.display_text())),
            TurnRole::Assistant => {
                pending.push(format!("Assistant: {}", turn.content.display_text()));
                blocks.push(std::mem::take(&mut pending));
            }
            TurnRole::System | TurnRole::Tool => {}
        }
    }

    let lines: Vec<String> = blocks.into_iter().rev().flatten().collect();
    let total_pages = lines.len().div_ceil(page_size);
    let start = page.max(1).saturating_sub(1).saturating_mul(page_size);
    let items = lines.into_iter().skip(start).take(page_size).collect();

    Ok(ContextPage { items, total_pages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct FixedFetcher {
        path: PathBuf,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageFetcher for FixedFetcher {
        async fn fetch(&self, url: &str) -> Result<PathBuf> {
            self.fetched.lock().unwrap().push(url.to_string());
            Ok(self.path.clone())
        }
    }

    fn conversation(pairs: usize) -> Vec<Turn> {
        (0..pairs)
            .flat_map(|i| [Turn::user(format!("q{i}")), Turn::assistant(format!("a{i}"))])
            .collect()
    }

    #[tokio::test]
    async fn text_only_turn_is_plain() {
        let assembler = ContextAssembler::new(Arc::new(FixedFetcher {
            path: PathBuf::new(),
            fetched: Mutex::new(Vec::new()),
        }));
        let turn = assembler.assemble("hello", &[]).await.unwrap();
        assert_eq!(turn, Turn::user("hello"));
    }

    #[tokio::test]
    async fn images_follow_text_part() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        let fetcher = Arc::new(FixedFetcher {
            path: file.path().to_path_buf(),
            fetched: Mutex::new(Vec::new()),
        });
        let assembler = ContextAssembler::new(fetcher.clone());

        let refs = vec![
            "base64://QUJD".to_string(),
            "https://example.com/cat.jpg".to_string(),
        ];
        let turn = assembler.assemble("what are these?", &refs).await.unwrap();

        let TurnContent::Parts(parts) = &turn.content else {
            panic!("expected multimodal content");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], ContentPart::text("what are these?"));
        assert_eq!(parts[1], ContentPart::image("data:image/jpeg;base64,QUJD"));
        assert_eq!(parts[2], ContentPart::image("data:image/jpeg;base64,YWJj"));
        assert_eq!(
            *fetcher.fetched.lock().unwrap(),
            vec!["https://example.com/cat.jpg"]
        );
        // downloads are removed once inlined
        assert!(!file.path().exists());
    }

    #[tokio::test]
    async fn unreadable_image_fails() {
        let assembler = ContextAssembler::new(Arc::new(FixedFetcher {
            path: PathBuf::new(),
            fetched: Mutex::new(Vec::new()),
        }));
        let err = assembler
            .assemble("hi", &["/missing/cat.jpg".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn full_page_lists_pairs_newest_first() {
        let history = conversation(3);
        let page = paginate(&history, 1, history.len()).unwrap();
        assert_eq!(
            page.items,
            vec![
                "User: q2",
                "Assistant: a2",
                "User: q1",
                "Assistant: a1",
                "User: q0",
                "Assistant: a0"
            ]
        );
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn pages_are_one_indexed_and_rounded_up() {
        let history = conversation(3);
        let first = paginate(&history, 1, 4).unwrap();
        let second = paginate(&history, 2, 4).unwrap();
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.items, vec!["User: q2", "Assistant: a2", "User: q1", "Assistant: a1"]);
        assert_eq!(second.items, vec!["User: q0", "Assistant: a0"]);
        assert!(paginate(&history, 3, 4).unwrap().items.is_empty());
    }

    #[test]
    fn unanswered_and_non_chat_turns_are_skipped() {
        let mut history = vec![Turn::system("persona")];
        history.extend(conversation(1));
        history.push(Turn::tool("call_1", "42"));
        history.push(Turn::user("pending"));

        let page = paginate(&history, 1, 10).unwrap();
        assert_eq!(page.items, vec!["User: q0", "Assistant: a0"]);
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn multimodal_turns_render_placeholder() {
        let history = vec![
            Turn::new(
                TurnRole::User,
                TurnContent::Parts(vec![
                    ContentPart::text("look"),
                    ContentPart::image("data:image/jpeg;base64,AA"),
                ]),
            ),
            Turn::assistant("a cat"),
        ];
        let page = paginate(&history, 1, 2).unwrap();
        assert_eq!(page.items, vec!["User: look [image]", "Assistant: a cat"]);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(paginate(&conversation(1), 1, 0).is_err());
    }

    #[test]
    fn empty_history_has_no_pages() {
        let page = paginate(&[], 1, 10).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 0);
    }
}
