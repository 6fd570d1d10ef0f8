//! Transaction processor factory

use crate::processor::{ProcessorContext, TransactionProcessor};
use vellum_core::ProcessorKind;

/// Builds processors of the configured kind.
#[derive(Debug, Clone)]
pub struct TransactionFactory {
    ctx: ProcessorContext,
}

impl TransactionFactory {
    /// Factory over a shared context.
    pub fn new(ctx: ProcessorContext) -> Self {
        TransactionFactory { ctx }
    }

    /// Kind of processor [`TransactionFactory::create`] returns.
    pub fn kind(&self) -> ProcessorKind {
        self.ctx.transaction.processor
    }

    /// Shared context.
    pub fn context(&self) -> &ProcessorContext {
        &self.ctx
    }

    /// New idle processor of the configured kind.
    pub fn create(&self) -> TransactionProcessor {
        self.create_kind(self.kind())
    }

    /// New idle processor of an explicit kind.
    pub fn create_kind(&self, kind: ProcessorKind) -> TransactionProcessor {
        let mut ctx = self.ctx.clone();
        ctx.transaction.processor = kind;
        TransactionProcessor::new(ctx)
    }
}
