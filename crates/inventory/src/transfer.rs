use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use partledger_core::{DomainError, DomainResult, TenantId, UserId};

use crate::movement::MovementRequest;
use crate::part::{LocationId, PartId};
use crate::transaction::{SourceDocument, SourceDocumentKind, TransactionType};

/// Move stock of one part between two locations of the same tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub from_location: LocationId,
    pub to_location: LocationId,
    pub quantity: i64,
    pub reason: Option<String>,
    pub performed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// The two legs of a transfer, both attributed to the same transfer document.
///
/// Legs must be recorded out first, then in, inside one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
    pub transfer_id: Uuid,
    pub out_leg: MovementRequest,
    pub in_leg: MovementRequest,
}

impl TransferRequest {
    pub fn validate(&self) -> DomainResult<()> {
        if self.from_location == self.to_location {
            return Err(DomainError::validation(
                "source and destination locations must differ",
            ));
        }
        if self.quantity <= 0 {
            return Err(DomainError::validation("transfer quantity must be positive"));
        }
        Ok(())
    }

    pub fn plan(&self) -> DomainResult<TransferPlan> {
        self.validate()?;

        let transfer_id = Uuid::now_v7();
        let source = SourceDocument::new(SourceDocumentKind::StockTransfer, transfer_id);
        let leg = |location: LocationId, kind: TransactionType, change: i64| {
            let req = MovementRequest::new(
                self.tenant_id,
                self.part_id,
                location,
                kind,
                change,
                self.performed_by,
            )
            .with_source(source)
            .at(self.occurred_at);
            match &self.reason {
                Some(reason) => req.with_reason(reason.clone()),
                None => req,
            }
        };

        Ok(TransferPlan {
            transfer_id,
            out_leg: leg(self.from_location, TransactionType::TransferOut, -self.quantity),
            in_leg: leg(self.to_location, TransactionType::TransferIn, self.quantity),
        })
    }
}
