//! Ownership of parsed documents and compiled stylesheets
//!
//! A parse or compile call produces an [`Owned`] handle: exactly one owner,
//! released when dropped. Handing the result to the caller turns it into a
//! [`Shell`], a reference-counted managed reference; the resource is released
//! when the last shell is dropped. Pending tasks hold shell clones, so a
//! handle cannot be released while an operation still borrows it.
//!
//! Each resource kind declares its own release function through
//! [`ResourceKind`]. Adding a kind means adding a type, not changing the
//! wrapper.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::markup::XmlDocument;
use crate::xslt::Stylesheet;

/// Created/released counters for one resource kind
#[derive(Debug)]
pub struct HandleStats {
    created: AtomicU64,
    released: AtomicU64,
}

impl HandleStats {
    pub const fn new() -> Self {
        HandleStats {
            created: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Handles created but not yet released
    pub fn live(&self) -> u64 {
        // released is bumped after created, so read it first
        let released = self.released();
        self.created().saturating_sub(released)
    }
}

impl Default for HandleStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A kind of native resource with its own release function
pub trait ResourceKind: Send + Sync + Sized + 'static {
    /// The owned native value
    type Native: Send + Sync + 'static;

    /// Human readable kind name, used in logs and `Debug` output
    const NAME: &'static str;

    /// Counters for this kind
    fn stats() -> &'static HandleStats;

    /// Free the native value. Called exactly once per handle.
    fn release(native: Self::Native);
}

/// Parsed XML or HTML documents
#[derive(Debug)]
pub enum DocumentKind {}

static DOCUMENT_STATS: HandleStats = HandleStats::new();

impl ResourceKind for DocumentKind {
    type Native = XmlDocument;
    const NAME: &'static str = "document";

    fn stats() -> &'static HandleStats {
        &DOCUMENT_STATS
    }

    fn release(native: XmlDocument) {
        native.free();
    }
}

/// Compiled XSLT stylesheets
#[derive(Debug)]
pub enum StylesheetKind {}

static STYLESHEET_STATS: HandleStats = HandleStats::new();

impl ResourceKind for StylesheetKind {
    type Native = Stylesheet;
    const NAME: &'static str = "stylesheet";

    fn stats() -> &'static HandleStats {
        &STYLESHEET_STATS
    }

    fn release(native: Stylesheet) {
        native.free();
    }
}

/// Process-unique handle identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// A native resource with a single owner
///
/// Dropping an `Owned` before it escapes to the caller is the error-path
/// release.
pub struct Owned<K: ResourceKind> {
    id: HandleId,
    /// `None` only once drop has taken it
    native: Option<K::Native>,
}

impl<K: ResourceKind> Owned<K> {
    pub fn new(native: K::Native) -> Self {
        let id = HandleId(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
        K::stats().created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(kind = K::NAME, handle = %id, "handle created");
        Owned {
            id,
            native: Some(native),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Hand the resource to managed code
    pub fn into_shell(self) -> Shell<K> {
        Shell {
            inner: Arc::new(self),
        }
    }
}

impl<K: ResourceKind> Deref for Owned<K> {
    type Target = K::Native;

    fn deref(&self) -> &K::Native {
        match &self.native {
            Some(native) => native,
            None => unreachable!("{} handle {} used after release", K::NAME, self.id),
        }
    }
}

impl<K: ResourceKind> Drop for Owned<K> {
    fn drop(&mut self) {
        if let Some(native) = self.native.take() {
            K::release(native);
        }
        K::stats().released.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(kind = K::NAME, handle = %self.id, "handle released");
    }
}

impl<K: ResourceKind> fmt::Debug for Owned<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owned<{}>({})", K::NAME, self.id)
    }
}

/// Managed reference to a native resource
///
/// Clones share the resource; the last drop releases it.
pub struct Shell<K: ResourceKind> {
    inner: Arc<Owned<K>>,
}

pub type DocumentShell = Shell<DocumentKind>;
pub type StylesheetShell = Shell<StylesheetKind>;

impl<K: ResourceKind> Shell<K> {
    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    /// Observe the resource without keeping it alive
    pub fn downgrade(&self) -> WeakShell<K> {
        WeakShell {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of managed references, pending tasks included
    pub fn references(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<K: ResourceKind> Clone for Shell<K> {
    fn clone(&self) -> Self {
        Shell {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: ResourceKind> Deref for Shell<K> {
    type Target = K::Native;

    fn deref(&self) -> &K::Native {
        &self.inner
    }
}

impl<K: ResourceKind> fmt::Debug for Shell<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shell<{}>({})", K::NAME, self.inner.id)
    }
}

/// Non-owning observer of a [`Shell`]
pub struct WeakShell<K: ResourceKind> {
    id: HandleId,
    inner: Weak<Owned<K>>,
}

impl<K: ResourceKind> WeakShell<K> {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Shell<K>> {
        self.inner.upgrade().map(|inner| Shell { inner })
    }

    pub fn is_released(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl<K: ResourceKind> Clone for WeakShell<K> {
    fn clone(&self) -> Self {
        WeakShell {
            id: self.id,
            inner: Weak::clone(&self.inner),
        }
    }
}

/// Print handle counters (call at end of processing)
pub fn print_handle_stats() {
    eprintln!("\n=== Handle Stats ===");
    for (name, stats) in [
        (DocumentKind::NAME, DocumentKind::stats()),
        (StylesheetKind::NAME, StylesheetKind::stats()),
    ] {
        eprintln!(
            "{:<12} created {:>6}  released {:>6}  live {:>6}",
            name,
            stats.created(),
            stats.released(),
            stats.live()
        );
    }
}
