//! Process-wide owner of every [`EscrowContract`].
//!
//! Each contract sits behind its own async mutex so that operations on one
//! contract serialize while other contracts proceed independently.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::escrow::{EscrowContract, EscrowEvent, EscrowSnapshot, EscrowStatus};
use crate::interface::{load_escrow_data, save_escrow_data};
use crate::{EscrowError, Result};

type Slot = Arc<Mutex<EscrowContract>>;

#[derive(Debug, Default)]
pub struct ContractStore {
    contracts: RwLock<HashMap<Uuid, Slot>>,
}

impl ContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `contract` and returns its id.
    pub async fn insert(&self, contract: EscrowContract) -> Uuid {
        let id = contract.id;
        self.contracts
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(contract)));
        debug!(%id, "contract stored");
        id
    }

    /// Exclusive access to one contract until the guard is dropped.
    pub async fn lock(&self, id: &Uuid) -> Result<OwnedMutexGuard<EscrowContract>> {
        let slot = self
            .contracts
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(EscrowError::ContractNotFound(*id))?;
        Ok(slot.lock_owned().await)
    }

    pub async fn snapshot(&self, id: &Uuid) -> Result<EscrowSnapshot> {
        Ok(self.lock(id).await?.snapshot())
    }

    /// Applies one event under the contract's lock.
    pub async fn apply(
        &self,
        id: &Uuid,
        event: EscrowEvent,
        now: DateTime<Utc>,
    ) -> Result<EscrowStatus> {
        let mut contract = self.lock(id).await?;
        let status = contract.apply(event, now)?.clone();
        Ok(status)
    }

    pub async fn ids(&self) -> Vec<Uuid> {
        self.contracts.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.contracts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contracts.read().await.is_empty()
    }

    /// Writes every contract, fulfillments included, to `path` as JSON.
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let slots: Vec<Slot> = self.contracts.read().await.values().cloned().collect();
        let mut contracts = Vec::with_capacity(slots.len());
        for slot in slots {
            contracts.push(slot.lock().await.clone());
        }
        contracts.sort_by_key(|c| c.created_at);
        save_escrow_data(&path, &contracts)?;
        info!(count = contracts.len(), path = ?path.as_ref(), "contract store saved");
        Ok(())
    }

    /// Loads a store written by [`ContractStore::save`]; a missing file is an empty store.
    ///
    /// Fails if any contract's fulfillment no longer satisfies its condition.
    pub async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let store = Self::new();
        if !path.as_ref().exists() {
            return Ok(store);
        }
        let contracts: Vec<EscrowContract> = load_escrow_data(&path)?;
        for contract in contracts {
            contract
                .condition
                .verify(contract.fulfillment())
                .with_context(|| {
                    format!("contract {} fulfillment does not match", contract.id)
                })?;
            store.insert(contract).await;
        }
        info!(count = store.len().await, path = ?path.as_ref(), "contract store loaded");
        Ok(store)
    }
}
