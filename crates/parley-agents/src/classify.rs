use parley_common::Error;

/// Category of an upstream rejection, used to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The request exceeded the model's context window.
    ContextTooLong,
    /// The model does not accept image content.
    UnsupportedVlm,
    /// The model or endpoint rejects tool/function definitions.
    UnsupportedTools,
    Fatal,
}

/// Maps a raw failure to a [`FailureKind`].
///
/// OpenAI-compatible providers do not share structured error codes, so this
/// is replaceable per upstream.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, error: &Error) -> FailureKind;
}

/// Table of message substrings checked in priority order; first match wins.
#[derive(Debug, Clone)]
pub struct SubstringClassifier {
    rules: Vec<(FailureKind, Vec<String>)>,
}

impl SubstringClassifier {
    /// A classifier that recognizes nothing.
    pub fn empty() -> Self {
        Self {
            rules: vec![
                (FailureKind::ContextTooLong, Vec::new()),
                (FailureKind::UnsupportedVlm, Vec::new()),
                (FailureKind::UnsupportedTools, Vec::new()),
            ],
        }
    }

    /// Add a pattern to `kind`'s rule. Patterns for [`FailureKind::Fatal`] are ignored.
    pub fn with_pattern(mut self, kind: FailureKind, pattern: impl Into<String>) -> Self {
        if let Some((_, patterns)) = self.rules.iter_mut().find(|(k, _)| *k == kind) {
            patterns.push(pattern.into());
        }
        self
    }

    pub fn patterns(&self, kind: FailureKind) -> &[String] {
        self.rules
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| p.as_slice())
            .unwrap_or_default()
    }
}

impl Default for SubstringClassifier {
    fn default() -> Self {
        Self::empty()
            .with_pattern(FailureKind::ContextTooLong, "maximum context length")
            // SiliconFlow
            .with_pattern(FailureKind::UnsupportedVlm, "The model is not a VLM")
            .with_pattern(FailureKind::UnsupportedTools, "does not support Function Calling")
            .with_pattern(FailureKind::UnsupportedTools, "does not support tools")
            .with_pattern(FailureKind::UnsupportedTools, "Function call is not supported")
            .with_pattern(FailureKind::UnsupportedTools, "Function calling is not enabled")
            .with_pattern(FailureKind::UnsupportedTools, "Tool calling is not supported")
    }
}

impl FailureClassifier for SubstringClassifier {
    fn classify(&self, error: &Error) -> FailureKind {
        let Error::Upstream { message, .. } = error else {
            return FailureKind::Fatal;
        };
        self.rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| message.contains(p.as_str())))
            .map(|(kind, _)| *kind)
            .unwrap_or(FailureKind::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(message: &str) -> Error {
        Error::upstream(Some(400), message)
    }

    #[test]
    fn default_table_matches_known_messages() {
        let classifier = SubstringClassifier::default();
        assert_eq!(
            classifier.classify(&upstream(
                r#"{"error":{"message":"This model's maximum context length is 8192 tokens."}}"#
            )),
            FailureKind::ContextTooLong
        );
        assert_eq!(
            classifier.classify(&upstream(r#"{"code":20015,"message":"The model is not a VLM"}"#)),
            FailureKind::UnsupportedVlm
        );
        for message in [
            "llama2 does not support tools",
            "model x does not support Function Calling",
            "Function call is not supported for this model.",
            "Function calling is not enabled",
            "Tool calling is not supported",
        ] {
            assert_eq!(
                classifier.classify(&upstream(message)),
                FailureKind::UnsupportedTools,
                "{message}"
            );
        }
    }

    #[test]
    fn unknown_and_non_upstream_errors_are_fatal() {
        let classifier = SubstringClassifier::default();
        assert_eq!(
            classifier.classify(&upstream("invalid api key")),
            FailureKind::Fatal
        );
        assert_eq!(
            classifier.classify(&Error::Agent("maximum context length".into())),
            FailureKind::Fatal
        );
        assert_eq!(classifier.classify(&Error::EmptyCompletion), FailureKind::Fatal);
    }

    #[test]
    fn first_match_wins_in_priority_order() {
        let classifier = SubstringClassifier::default();
        let message = "maximum context length exceeded; The model is not a VLM; does not support tools";
        assert_eq!(
            classifier.classify(&upstream(message)),
            FailureKind::ContextTooLong
        );
        assert_eq!(
            classifier.classify(&upstream("The model is not a VLM and does not support tools")),
            FailureKind::UnsupportedVlm
        );
    }

    #[test]
    fn custom_patterns_extend_the_table() {
        let classifier = SubstringClassifier::default()
            .with_pattern(FailureKind::ContextTooLong, "context_length_exceeded")
            .with_pattern(FailureKind::Fatal, "ignored");
        assert_eq!(
            classifier.classify(&upstream(r#"{"code":"context_length_exceeded"}"#)),
            FailureKind::ContextTooLong
        );
        assert_eq!(classifier.patterns(FailureKind::ContextTooLong).len(), 2);
        assert!(classifier.patterns(FailureKind::Fatal).is_empty());
    }
}
