use async_trait::async_trait;
use pipeline::{
    BatchId, CardId, CardRecord, CardStatus, OperatorContext, OperatorError, OperatorKey, PortMap,
    PortValue, StoreError, ToolHandler,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{output, required};

/// `save_summary`: stores the summary in the material's rich data.
///
/// A material that no longer exists is logged and treated as done.
pub struct SaveSummary;

#[async_trait]
impl ToolHandler for SaveSummary {
    async fn handle(
        &self,
        operator: &OperatorKey,
        inputs: PortMap,
        ctx: &mut OperatorContext,
    ) -> Result<PortMap, OperatorError> {
        let summary = required(operator, &inputs, "summary", PortValue::as_text)?;
        let material = ctx.require_material(operator)?.clone();

        match ctx.session.save_summary(&material, summary).await {
            Ok(()) => info!(material = %material, chars = summary.len(), "Saved summary"),
            Err(StoreError::NotFound { .. }) => {
                warn!(material = %material, "Material not found, summary not stored");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(PortMap::from([output("done", "ok")]))
    }
}

/// `save_cards`: inserts one pending card per item under a fresh batch.
pub struct SaveCards;

#[async_trait]
impl ToolHandler for SaveCards {
    async fn handle(
        &self,
        operator: &OperatorKey,
        inputs: PortMap,
        ctx: &mut OperatorContext,
    ) -> Result<PortMap, OperatorError> {
        let items = required(operator, &inputs, "items", PortValue::card_items)?;
        let card_type = required(operator, &inputs, "card_type", PortValue::as_text)?;
        let material = ctx.require_material(operator)?.clone();
        let owner = ctx.run.user_id.clone();
        let batch_id = BatchId::new_random();

        let cards: Vec<CardRecord> = items
            .iter()
            .enumerate()
            .map(|(batch_index, item)| CardRecord {
                id: CardId::new_random(),
                owner: owner.clone(),
                material: material.clone(),
                card_type: card_type.to_string(),
                content: card_content(item),
                status: CardStatus::Pending,
                batch_id,
                batch_index,
            })
            .collect();
        let count = cards.len();
        ctx.session.insert_cards(cards).await?;

        info!(count, card_type, batch = %batch_id, "Saved cards");
        Ok(PortMap::from([
            output("batch_id", batch_id.to_string()),
            output("count", count.to_string()),
        ]))
    }
}

fn card_content(item: &Value) -> Value {
    match item {
        Value::Object(_) => item.clone(),
        Value::String(text) => json!({"question": "", "answer": text}),
        other => json!({"question": "", "answer": other.to_string()}),
    }
}
