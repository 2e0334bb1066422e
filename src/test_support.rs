use crate::error::CompletionError;
use crate::llm::{CompletionModel, FragmentStream};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

/// Completion model that replays a fixed script, optionally failing at the
/// end.
pub struct ScriptedModel {
    fragments: Vec<&'static str>,
    failure: Option<&'static str>,
}

impl ScriptedModel {
    pub fn replying(fragments: &[&'static str]) -> Self {
        Self {
            fragments: fragments.to_vec(),
            failure: None,
        }
    }

    pub fn failing_after(fragments: &[&'static str], failure: &'static str) -> Self {
        Self {
            fragments: fragments.to_vec(),
            failure: Some(failure),
        }
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn generate(
        &self,
        _system_prompt: &str,
        _user_message: &str,
    ) -> Result<FragmentStream, CompletionError> {
        let mut items: Vec<Result<String, CompletionError>> = self
            .fragments
            .iter()
            .map(|fragment| Ok(fragment.to_string()))
            .collect();
        if let Some(failure) = self.failure {
            items.push(Err(CompletionError::Model(failure.to_string())));
        }
        Ok(stream::iter(items).boxed())
    }
}
