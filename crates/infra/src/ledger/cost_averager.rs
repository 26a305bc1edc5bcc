//! Weighted average cost maintenance on purchase receipts.

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use partledger_core::TenantId;
use partledger_inventory::{CostUpdate, PartId};

use crate::error::{ServiceError, ServiceResult};
use crate::store::LedgerTx;

/// Recomputes a part's average unit cost from the tenant-wide on-hand total.
///
/// Must run before the receipt's movement is recorded: the blend uses the
/// quantity on hand *before* the incoming units land.
#[derive(Debug, Default, Clone, Copy)]
pub struct CostAverager;

impl CostAverager {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, part_id = %part_id), err)]
    pub async fn apply_receipt(
        &self,
        tx: &mut dyn LedgerTx,
        tenant_id: TenantId,
        part_id: PartId,
        incoming_quantity: i64,
        incoming_cost: Decimal,
    ) -> ServiceResult<CostUpdate> {
        if incoming_quantity <= 0 {
            return Err(ServiceError::Validation(
                "received quantity must be positive".to_string(),
            ));
        }

        let part = tx
            .lock_part(tenant_id, part_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("part {part_id}")))?;
        let on_hand = tx.total_quantity(tenant_id, part_id).await?;

        let update = CostUpdate::compute(
            on_hand,
            part.current_average(),
            incoming_quantity,
            incoming_cost,
        )?;
        tx.set_average_cost(tenant_id, part_id, update.average_after)
            .await?;

        debug!(
            quantity_before = update.quantity_before,
            average_before = %update.average_before,
            average_after = %update.average_after,
            "average cost updated"
        );
        Ok(update)
    }
}
