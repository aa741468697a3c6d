use serde::{Deserialize, Serialize};

use crate::types::{Conversation, Role, Turn};

/// Prompt format used to turn a conversation into model input text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatTemplate {
    /// `<|im_start|>role\ncontent<|im_end|>` turns, as used by Qwen instruct models
    #[default]
    ChatMl,
    /// Turn contents joined by newlines
    Plain,
}

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

impl ChatTemplate {
    /// Render the conversation, ending with the assistant generation prompt
    pub fn render(&self, conversation: &Conversation, system_prompt: Option<&str>) -> String {
        let system = system_prompt.map(|content| Turn::new(Role::System, content));
        let turns = system.iter().chain(conversation.turns());

        match self {
            ChatTemplate::ChatMl => {
                let mut prompt = String::new();
                for turn in turns {
                    prompt.push_str(IM_START);
                    prompt.push_str(turn.role.as_str());
                    prompt.push('\n');
                    prompt.push_str(&turn.content);
                    prompt.push_str(IM_END);
                    prompt.push('\n');
                }
                prompt.push_str(IM_START);
                prompt.push_str(Role::Assistant.as_str());
                prompt.push('\n');
                prompt
            }
            ChatTemplate::Plain => turns
                .map(|turn| turn.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
