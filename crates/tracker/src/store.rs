use crate::error::{Result, TrackerError};
use do_ecf_core::{FiscalDocument, InvoiceData, SendState};
use sled::Db;
use std::path::Path;

/// Persistent document records, keyed by document id. Records are never
/// deleted: an e-CF with a fiscal number stays on file whatever its state.
#[derive(Clone)]
pub struct DocumentStore {
    db: Db,
}

impl DocumentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn temporary() -> Result<Self> {
        Ok(Self {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    fn documents_tree(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree("documents")?)
    }

    fn invoices_tree(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree("invoices")?)
    }

    /// Registers a new document with the accounting data its payload is
    /// built from.
    pub fn insert(&self, doc: &FiscalDocument, invoice: Option<&InvoiceData>) -> Result<()> {
        let documents = self.documents_tree()?;
        let swapped = documents.compare_and_swap(
            doc.id.as_bytes(),
            None::<&[u8]>,
            Some(serde_json::to_vec(doc)?),
        )?;
        if swapped.is_err() {
            return Err(TrackerError::Duplicate(doc.id.clone()));
        }
        if let Some(invoice) = invoice {
            self.invoices_tree()?
                .insert(doc.id.as_bytes(), serde_json::to_vec(invoice)?)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<FiscalDocument>> {
        match self.documents_tree()?.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load(&self, id: &str) -> Result<FiscalDocument> {
        self.get(id)?
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }

    pub fn save(&self, doc: &FiscalDocument) -> Result<()> {
        self.documents_tree()?
            .insert(doc.id.as_bytes(), serde_json::to_vec(doc)?)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn invoice(&self, id: &str) -> Result<Option<InvoiceData>> {
        match self.invoices_tree()?.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Newest first.
    pub fn list(&self) -> Result<Vec<FiscalDocument>> {
        let mut out = self.scan(|_| true)?;
        out.sort_by_key(|d| d.created_at);
        out.reverse();
        Ok(out)
    }

    /// Oldest first, so batches work through the backlog in posting order.
    pub fn in_states(&self, states: &[SendState]) -> Result<Vec<FiscalDocument>> {
        let mut out = self.scan(|d| states.contains(&d.send_state))?;
        out.sort_by_key(|d| d.created_at);
        Ok(out)
    }

    fn scan(&self, keep: impl Fn(&FiscalDocument) -> bool) -> Result<Vec<FiscalDocument>> {
        let mut out = Vec::new();
        for item in self.documents_tree()?.iter() {
            let (_k, v) = item?;
            let doc: FiscalDocument = serde_json::from_slice(&v)?;
            if keep(&doc) {
                out.push(doc);
            }
        }
        Ok(out)
    }
}
