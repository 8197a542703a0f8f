//! Step content resolution — reusable template first, inline automation
//! reply as fallback.

use dripflow_core::error::Result;
use dripflow_core::traits::DefinitionStore;
use dripflow_core::types::{MessageContent, Step};

/// Resolve the payload a step should send. `Ok(None)` means the step has no
/// usable content; the runner treats that as skip-and-advance, not a failure.
pub async fn resolve(defs: &dyn DefinitionStore, step: &Step) -> Result<Option<MessageContent>> {
    if let Some(template_id) = &step.content.template_id {
        if let Some(content) = defs.template_content(template_id).await? {
            return Ok(Some(content));
        }
        tracing::debug!(
            "Step {}: template {} did not resolve, trying automation",
            step.id,
            template_id
        );
    }
    if let Some(automation_id) = &step.content.automation_id {
        if let Some(content) = defs.automation_content(automation_id).await? {
            return Ok(Some(content));
        }
    }
    Ok(None)
}
