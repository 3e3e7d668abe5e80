use std::fmt;

type Release = Box<dyn FnOnce() + Send + Sync>;

/// Returned when registering on a scope that has already been closed (or
/// adopted by a parent scope).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScopeClosed;

impl fmt::Display for ScopeClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource scope is closed")
    }
}

impl std::error::Error for ScopeClosed {}

/// LIFO stack of release actions.
///
/// Builders obtain native objects and register exactly one release per object
/// here, so teardown always runs in reverse acquisition order:
/// - `hold` keeps a host value (e.g. a memory-mapped buffer backing a shared
///   native view) alive until the scope closes.
/// - `defer` registers an arbitrary release.
/// - `enter` adopts a child scope; the child's whole teardown becomes a single
///   step in this scope's sequence.
///
/// `close` is terminal and idempotent. Dropping an open scope closes it.
#[derive(Default)]
pub struct ResourceScope {
    actions: Vec<Release>,
    closed: bool,
}

impl ResourceScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Keeps `value` alive until the scope closes. No release call is made;
    /// the value is simply dropped at its position in the LIFO order.
    pub fn hold<T: Send + Sync + 'static>(&mut self, value: T) -> Result<(), ScopeClosed> {
        self.defer(move || drop(value))
    }

    pub fn defer(
        &mut self,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Result<(), ScopeClosed> {
        if self.closed {
            return Err(ScopeClosed);
        }
        self.actions.push(Box::new(release));
        Ok(())
    }

    /// Adopts `child`: its pending actions run, in their own LIFO order, when
    /// this scope reaches the adoption point. The child is left closed so it
    /// can neither release twice nor accept registrations this scope would
    /// never see.
    pub fn enter(&mut self, child: &mut ResourceScope) -> Result<(), ScopeClosed> {
        if self.closed {
            return Err(ScopeClosed);
        }
        if child.closed {
            return Err(ScopeClosed);
        }
        let mut adopted = std::mem::take(child);
        child.closed = true;
        self.defer(move || adopted.close())
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        while let Some(release) = self.actions.pop() {
            release();
        }
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceScope")
            .field("pending", &self.actions.len())
            .field("closed", &self.closed)
            .finish()
    }
}
