use std::fmt;

use domain::ProductEvent;

use crate::repository::{Repository, Session, SessionFactory};
use crate::{PersistenceError, Result};

/// Lifecycle of a [`UnitOfWork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Idle,
    Active,
    Closed,
}

impl fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitOfWorkState::Idle => "idle",
            UnitOfWorkState::Active => "active",
            UnitOfWorkState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// An atomic unit of change against the product store.
///
/// `begin` opens a backend session, `products` exposes the repository while
/// active, and `close` releases the session, rolling back anything that was
/// not committed. Dropping an active unit of work discards its changes too.
pub struct UnitOfWork<F: SessionFactory> {
    factory: F,
    state: UnitOfWorkState,
    repository: Option<Repository<F::Session>>,
    committed: bool,
    events: Vec<ProductEvent>,
}

impl<F: SessionFactory> UnitOfWork<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            state: UnitOfWorkState::Idle,
            repository: None,
            committed: false,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    /// Returns true once a commit has succeeded.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Opens a backend session.
    pub async fn begin(&mut self) -> Result<()> {
        self.expect_state(UnitOfWorkState::Idle)?;

        let session = self.factory.open().await?;
        self.repository = Some(Repository::new(session));
        self.state = UnitOfWorkState::Active;
        tracing::debug!("unit of work started");
        Ok(())
    }

    /// Returns the product repository.
    pub fn products(&mut self) -> Result<&mut Repository<F::Session>> {
        self.expect_state(UnitOfWorkState::Active)?;
        self.repository
            .as_mut()
            .ok_or(PersistenceError::SessionClosed)
    }

    /// Persists every product seen in this unit of work.
    pub async fn commit(&mut self) -> Result<()> {
        let repository = self.products()?;
        repository.commit().await?;
        self.committed = true;
        tracing::debug!("unit of work committed");
        Ok(())
    }

    /// Discards uncommitted changes. Safe to call in any state.
    pub async fn rollback(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        if let Some(repository) = self.repository.as_mut() {
            repository.backend_mut().rollback().await?;
            tracing::debug!("unit of work rolled back");
        }
        Ok(())
    }

    /// Ends the unit of work and releases its session.
    ///
    /// Events raised by tracked products stay collectable afterwards.
    pub async fn close(&mut self) -> Result<()> {
        if self.state != UnitOfWorkState::Active {
            self.state = UnitOfWorkState::Closed;
            return Ok(());
        }

        let result = self.rollback().await;
        if let Some(mut repository) = self.repository.take() {
            self.events.extend(repository.take_events());
        }
        self.state = UnitOfWorkState::Closed;
        result
    }

    /// Drains events raised by every product this unit of work touched.
    pub fn collect_new_events(&mut self) -> Vec<ProductEvent> {
        let mut events = std::mem::take(&mut self.events);
        if let Some(repository) = self.repository.as_mut() {
            events.extend(repository.take_events());
        }
        events
    }

    fn expect_state(&self, expected: UnitOfWorkState) -> Result<()> {
        if self.state != expected {
            return Err(PersistenceError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}

impl<F: SessionFactory> Drop for UnitOfWork<F> {
    fn drop(&mut self) {
        if self.state == UnitOfWorkState::Active && !self.committed {
            tracing::debug!("unit of work dropped while active, discarding uncommitted changes");
        }
    }
}
