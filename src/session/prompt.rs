//! ChatML prompt construction.

use serde::{Deserialize, Serialize};

use super::{ConversationTurn, Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplate {
    pub system_prompt: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful AI assistant. Answer concisely.".to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// System block, prior turns, the current input, then an open assistant block.
    pub fn build(&self, history: &[ConversationTurn], input: &str) -> String {
        let mut blocks = Vec::with_capacity(history.len() + 3);
        blocks.push(block("system", &self.system_prompt));
        for turn in history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            blocks.push(block(role, &turn.content));
        }
        blocks.push(block("user", input));
        blocks.push("<|im_start|>assistant\n".to_string());
        blocks.join("\n")
    }
}

fn block(role: &str, content: &str) -> String {
    format!("<|im_start|>{}\n{}<|im_end|>", role, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_without_history() {
        let prompt = PromptTemplate::new("sys").build(&[], "hello");
        assert_eq!(
            prompt,
            "<|im_start|>system\nsys<|im_end|>\n\
             <|im_start|>user\nhello<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn test_build_includes_history_in_order() {
        let history = vec![
            ConversationTurn::user("q1"),
            ConversationTurn::assistant("a1"),
        ];
        let prompt = PromptTemplate::default().build(&history, "q2");
        let q1 = prompt.find("user\nq1").unwrap();
        let a1 = prompt.find("assistant\na1").unwrap();
        let q2 = prompt.find("user\nq2").unwrap();
        assert!(q1 < a1 && a1 < q2);
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }
}
