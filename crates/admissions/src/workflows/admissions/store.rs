use super::domain::{
    ApplicationId, ApplicationRecord, DocumentRecord, IntentId, OwnerId, PaymentRecord,
};

/// Identifier series handed out by [`ApplicationStore::next_sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceSeries {
    Application,
    AdmissionNumber,
}

/// Persistence for application rows.
pub trait ApplicationStore: Send + Sync {
    /// Next value of a per-year counter. Values are never handed out twice.
    fn next_sequence(&self, series: SequenceSeries, year: i32) -> Result<u32, StoreError>;
    /// Fails with [`StoreError::Conflict`] if the id was ever used before.
    fn insert_application(
        &self,
        record: ApplicationRecord,
    ) -> Result<ApplicationRecord, StoreError>;
    fn update_application(&self, record: ApplicationRecord) -> Result<(), StoreError>;
    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<ApplicationRecord>, StoreError>;
    fn applications_for_owner(&self, owner: &OwnerId)
        -> Result<Vec<ApplicationRecord>, StoreError>;
    /// Removes the application together with its payments and documents.
    fn remove_application(&self, id: &ApplicationId) -> Result<(), StoreError>;
}

/// Ledger of payment attempts keyed by gateway intent id.
pub trait PaymentLedger: Send + Sync {
    /// Fails with [`StoreError::Conflict`] if a record for the intent already exists.
    fn insert_payment(&self, record: PaymentRecord) -> Result<PaymentRecord, StoreError>;
    fn update_payment(&self, record: PaymentRecord) -> Result<(), StoreError>;
    fn payment_by_intent(&self, intent_id: &IntentId) -> Result<Option<PaymentRecord>, StoreError>;
    fn payments_for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<PaymentRecord>, StoreError>;
    fn all_payments(&self) -> Result<Vec<PaymentRecord>, StoreError>;
}

/// Uploaded document metadata.
pub trait DocumentStore: Send + Sync {
    fn insert_document(&self, record: DocumentRecord) -> Result<DocumentRecord, StoreError>;
    fn documents_for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<DocumentRecord>, StoreError>;
}

/// Everything the admissions service persists.
pub trait AdmissionsStore: ApplicationStore + PaymentLedger + DocumentStore {}

impl<T> AdmissionsStore for T where T: ApplicationStore + PaymentLedger + DocumentStore {}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
