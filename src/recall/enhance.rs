//! Prompt enhancement.
//!
//! Composes a user prompt with recalled memories. The layout is stable and
//! byte-testable; when nothing was recalled the prompt passes through
//! unchanged so a failing or empty recall can never corrupt the host
//! agent's input.

use crate::models::{RecallResult, ScoredMemory};
use serde::{Deserialize, Serialize};

/// An enhanced prompt with the memories that shaped it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedPrompt {
    /// The rewritten prompt (or the original, verbatim, when no memories
    /// were selected).
    pub enhanced_prompt: String,
    /// The memories prepended as context.
    pub memories: Vec<ScoredMemory>,
    /// Confidence carried over from recall.
    pub confidence: f64,
    /// Wall-clock time spent, including the recall.
    pub elapsed_ms: u64,
}

/// Composes prompts from recall results.
#[derive(Debug, Clone, Copy, Default)]
pub struct Enhancer;

impl Enhancer {
    /// Creates an enhancer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds the enhanced prompt for a recall result.
    ///
    /// Layout:
    ///
    /// ```text
    /// ## Relevant Context:
    /// 1. <memory one-liner>
    /// 2. <memory one-liner>
    ///
    /// ## User Message:
    /// <original prompt verbatim>
    /// ```
    #[must_use]
    pub fn compose(&self, prompt: &str, recall: &RecallResult) -> EnhancedPrompt {
        if recall.memories.is_empty() {
            return EnhancedPrompt {
                enhanced_prompt: prompt.to_string(),
                memories: Vec::new(),
                confidence: 0.0,
                elapsed_ms: recall.elapsed_ms,
            };
        }

        let mut enhanced = String::from("## Relevant Context:\n");
        for (index, scored) in recall.memories.iter().enumerate() {
            enhanced.push_str(&format!("{}. {}\n", index + 1, one_line(&scored.memory.content)));
        }
        enhanced.push_str("\n## User Message:\n");
        enhanced.push_str(prompt);

        EnhancedPrompt {
            enhanced_prompt: enhanced,
            memories: recall.memories.clone(),
            confidence: recall.confidence,
            elapsed_ms: recall.elapsed_ms,
        }
    }
}

/// Collapses a memory body to a single display line.
fn one_line(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Memory, MemoryType};
    use chrono::Utc;

    fn scored(content: &str) -> ScoredMemory {
        ScoredMemory {
            memory: Memory::new(content, MemoryType::Semantic, Utc::now()),
            base_score: 0.8,
            final_score: 0.8,
        }
    }

    #[test]
    fn test_layout_is_stable() {
        let recall = RecallResult {
            memories: vec![scored("Project uses Redis"), scored("Use asyncio for I/O")],
            strategy_used: "keyword".to_string(),
            confidence: 0.8,
            elapsed_ms: 3,
        };
        let enhanced = Enhancer::new().compose("How do I cache?", &recall);
        assert_eq!(
            enhanced.enhanced_prompt,
            "## Relevant Context:\n1. Project uses Redis\n2. Use asyncio for I/O\n\n## User Message:\nHow do I cache?"
        );
        assert_eq!(enhanced.memories.len(), 2);
    }

    #[test]
    fn test_empty_recall_passes_prompt_through() {
        let recall = RecallResult::empty("keyword", 1);
        let prompt = "exact bytes  preserved\neven newlines";
        let enhanced = Enhancer::new().compose(prompt, &recall);
        assert_eq!(enhanced.enhanced_prompt, prompt);
        assert!(enhanced.memories.is_empty());
    }

    #[test]
    fn test_multiline_memory_becomes_one_liner() {
        let recall = RecallResult {
            memories: vec![scored("line one\nline   two")],
            strategy_used: "temporal".to_string(),
            confidence: 0.5,
            elapsed_ms: 2,
        };
        let enhanced = Enhancer::new().compose("q", &recall);
        assert!(enhanced.enhanced_prompt.contains("1. line one line two\n"));
    }
}
