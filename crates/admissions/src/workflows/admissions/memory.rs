use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::domain::{
    ApplicationId, ApplicationRecord, DocumentRecord, IntentId, OwnerId, PaymentRecord,
};
use super::store::{
    ApplicationStore, DocumentStore, PaymentLedger, SequenceSeries, StoreError,
};

/// In-process store backing the demo server and the test suites.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    applications: BTreeMap<ApplicationId, ApplicationRecord>,
    retired_ids: HashSet<ApplicationId>,
    payments: BTreeMap<IntentId, PaymentRecord>,
    documents: Vec<DocumentRecord>,
    sequences: HashMap<(SequenceSeries, i32), u32>,
}

impl MemoryStore {
    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }
}

impl ApplicationStore for MemoryStore {
    fn next_sequence(&self, series: SequenceSeries, year: i32) -> Result<u32, StoreError> {
        let mut state = self.state()?;
        let counter = state.sequences.entry((series, year)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn insert_application(
        &self,
        record: ApplicationRecord,
    ) -> Result<ApplicationRecord, StoreError> {
        let mut state = self.state()?;
        let id = record.application_id.clone();
        if state.applications.contains_key(&id) || state.retired_ids.contains(&id) {
            return Err(StoreError::Conflict);
        }
        state.applications.insert(id, record.clone());
        Ok(record)
    }

    fn update_application(&self, record: ApplicationRecord) -> Result<(), StoreError> {
        let mut state = self.state()?;
        match state.applications.get_mut(&record.application_id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self.state()?.applications.get(id).cloned())
    }

    fn applications_for_owner(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        Ok(self
            .state()?
            .applications
            .values()
            .filter(|record| record.owner.as_ref() == Some(owner))
            .cloned()
            .collect())
    }

    fn remove_application(&self, id: &ApplicationId) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.applications.remove(id).is_none() {
            return Err(StoreError::NotFound);
        }
        state.retired_ids.insert(id.clone());
        state.payments.retain(|_, payment| &payment.application_id != id);
        state.documents.retain(|document| &document.application_id != id);
        Ok(())
    }
}

impl PaymentLedger for MemoryStore {
    fn insert_payment(&self, record: PaymentRecord) -> Result<PaymentRecord, StoreError> {
        let mut state = self.state()?;
        if state.payments.contains_key(&record.intent_id) {
            return Err(StoreError::Conflict);
        }
        state
            .payments
            .insert(record.intent_id.clone(), record.clone());
        Ok(record)
    }

    fn update_payment(&self, record: PaymentRecord) -> Result<(), StoreError> {
        let mut state = self.state()?;
        match state.payments.get_mut(&record.intent_id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    fn payment_by_intent(&self, intent_id: &IntentId) -> Result<Option<PaymentRecord>, StoreError> {
        Ok(self.state()?.payments.get(intent_id).cloned())
    }

    fn payments_for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        let mut payments: Vec<_> = self
            .state()?
            .payments
            .values()
            .filter(|payment| &payment.application_id == id)
            .cloned()
            .collect();
        payments.sort_by_key(|payment| payment.created_at);
        Ok(payments)
    }

    fn all_payments(&self) -> Result<Vec<PaymentRecord>, StoreError> {
        let mut payments: Vec<_> = self.state()?.payments.values().cloned().collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }
}

impl DocumentStore for MemoryStore {
    fn insert_document(&self, record: DocumentRecord) -> Result<DocumentRecord, StoreError> {
        let mut state = self.state()?;
        if state
            .documents
            .iter()
            .any(|existing| existing.document_id == record.document_id)
        {
            return Err(StoreError::Conflict);
        }
        state.documents.push(record.clone());
        Ok(record)
    }

    fn documents_for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        Ok(self
            .state()?
            .documents
            .iter()
            .filter(|document| &document.application_id == id)
            .cloned()
            .collect())
    }
}
