//! Ambient cluster and namespace resolution.
//!
//! Lookups resolve in three tiers: a thread-scoped override (set by a test
//! framework adapter when entering a test scope), a process-wide default
//! (set once at startup), and finally auto-discovery against the local
//! cluster tooling, which is performed by the caller when both tiers are
//! empty.
//!
//! The thread tier is deliberately not shared between threads, so parallel
//! tests do not clobber each other. Child threads and spawned tasks inherit
//! by capturing a [`DefaultsSnapshot`] before the spawn and installing it on
//! the other side; later mutations on either side stay invisible to the
//! other.
//!
//! ```
//! use testpods::defaults::Defaults;
//!
//! Defaults::set_namespace("testpods-suite-a1b2c");
//! let snapshot = Defaults::snapshot();
//!
//! std::thread::spawn(move || {
//!     snapshot.install();
//!     assert_eq!(Defaults::namespace().as_deref(), Some("testpods-suite-a1b2c"));
//! });
//! # Defaults::clear();
//! ```

use std::{
    cell::RefCell,
    sync::{Arc, OnceLock},
};

use crate::cluster::ClusterHandle;

/// Produces the ambient cluster handle on demand.
pub type ClusterSupplier = Arc<dyn Fn() -> Arc<dyn ClusterHandle> + Send + Sync>;

#[derive(Clone, Default)]
struct ThreadScope {
    cluster: Option<ClusterSupplier>,
    namespace: Option<String>,
}

thread_local! {
    static THREAD_SCOPE: RefCell<ThreadScope> = RefCell::new(ThreadScope::default());
}

// The process tier is written once at init and read-only thereafter.
static PROCESS_CLUSTER: OnceLock<ClusterSupplier> = OnceLock::new();
static PROCESS_NAMESPACE: OnceLock<String> = OnceLock::new();

pub struct Defaults;

impl Defaults {
    /// Sets the thread-scoped cluster supplier. Only lookups on the calling
    /// thread observe it.
    pub fn set_cluster(supplier: ClusterSupplier) {
        THREAD_SCOPE.with_borrow_mut(|scope| scope.cluster = Some(supplier));
    }

    /// Convenience wrapper for [`Self::set_cluster`] when the handle is
    /// already built.
    pub fn set_cluster_handle(handle: Arc<dyn ClusterHandle>) {
        Self::set_cluster(Arc::new(move || Arc::clone(&handle)));
    }

    /// Sets the process-wide cluster supplier. Returns `false` when a
    /// process-wide supplier was already installed; the first write wins.
    pub fn set_process_cluster(supplier: ClusterSupplier) -> bool {
        PROCESS_CLUSTER.set(supplier).is_ok()
    }

    /// Sets the thread-scoped shared namespace.
    pub fn set_namespace(namespace: impl Into<String>) {
        THREAD_SCOPE.with_borrow_mut(|scope| scope.namespace = Some(namespace.into()));
    }

    /// Sets the process-wide shared namespace. First write wins.
    pub fn set_process_namespace(namespace: impl Into<String>) -> bool {
        PROCESS_NAMESPACE.set(namespace.into()).is_ok()
    }

    /// Resolves the ambient cluster: thread tier first, then process tier.
    ///
    /// `None` means neither tier is configured; callers fall back to local
    /// discovery ([`crate::cluster::LocalCluster::discover`]).
    pub fn resolve_cluster() -> Option<Arc<dyn ClusterHandle>> {
        let thread = THREAD_SCOPE.with_borrow(|scope| scope.cluster.clone());
        thread.or_else(|| PROCESS_CLUSTER.get().cloned()).map(|s| s())
    }

    /// Resolves the ambient shared namespace: thread tier first, then
    /// process tier.
    pub fn namespace() -> Option<String> {
        THREAD_SCOPE
            .with_borrow(|scope| scope.namespace.clone())
            .or_else(|| PROCESS_NAMESPACE.get().cloned())
    }

    /// Whether a cluster is configured in the thread or process tier.
    /// Auto-discovery does not count.
    pub fn has_cluster_configured() -> bool {
        THREAD_SCOPE.with_borrow(|scope| scope.cluster.is_some()) || PROCESS_CLUSTER.get().is_some()
    }

    /// Removes the thread-scoped entries of the current thread. Other
    /// threads and the process tier are untouched.
    pub fn clear() {
        THREAD_SCOPE.with_borrow_mut(|scope| *scope = ThreadScope::default());
    }

    /// Captures the current thread's scoped entries for hand-off to a child
    /// thread or spawned task.
    pub fn snapshot() -> DefaultsSnapshot {
        DefaultsSnapshot(THREAD_SCOPE.with_borrow(Clone::clone))
    }
}

/// A copy of one thread's scoped defaults, taken via [`Defaults::snapshot`].
#[derive(Clone)]
pub struct DefaultsSnapshot(ThreadScope);

impl DefaultsSnapshot {
    /// Replaces the calling thread's scoped entries with the captured ones.
    pub fn install(&self) {
        THREAD_SCOPE.with_borrow_mut(|scope| *scope = self.0.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{client::Client, cluster::LocalCluster};

    fn offline_cluster() -> Arc<dyn ClusterHandle> {
        // Never connected to; only the handle plumbing is under test.
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        let client = Client::new(kube::Client::try_from(config).unwrap());
        Arc::new(LocalCluster::new(client))
    }

    #[tokio::test]
    async fn cluster_tier_resolves_and_clears_per_thread() {
        assert!(!Defaults::has_cluster_configured());
        assert!(Defaults::resolve_cluster().is_none());

        Defaults::set_cluster_handle(offline_cluster());
        assert!(Defaults::has_cluster_configured());
        assert!(Defaults::resolve_cluster().is_some());

        let handle = thread::spawn(|| {
            // The other thread sees nothing.
            assert!(!Defaults::has_cluster_configured());
        });
        handle.join().unwrap();

        Defaults::clear();
        assert!(!Defaults::has_cluster_configured());
        assert!(Defaults::resolve_cluster().is_none());
    }

    #[test]
    fn thread_isolation() {
        Defaults::set_namespace("ns-main");

        let handle = thread::spawn(|| {
            assert_eq!(Defaults::namespace(), None);
            Defaults::set_namespace("ns-child");
            assert_eq!(Defaults::namespace().as_deref(), Some("ns-child"));
        });
        handle.join().unwrap();

        // The child's mutation did not leak back.
        assert_eq!(Defaults::namespace().as_deref(), Some("ns-main"));
        Defaults::clear();
    }

    #[test]
    fn snapshot_inheritance() {
        Defaults::set_namespace("ns-parent");
        let snapshot = Defaults::snapshot();

        let handle = thread::spawn(move || {
            snapshot.install();
            assert_eq!(Defaults::namespace().as_deref(), Some("ns-parent"));

            // Mutations after the snapshot stay on this side.
            Defaults::set_namespace("ns-mutated");
        });
        handle.join().unwrap();

        assert_eq!(Defaults::namespace().as_deref(), Some("ns-parent"));
        Defaults::clear();
    }

    #[test]
    fn clear_is_thread_scoped() {
        Defaults::set_namespace("ns-to-clear");

        let handle = thread::spawn(|| {
            Defaults::set_namespace("ns-other");
            Defaults::clear();
            assert_eq!(Defaults::namespace(), None);
        });
        handle.join().unwrap();

        assert_eq!(Defaults::namespace().as_deref(), Some("ns-to-clear"));
        Defaults::clear();
    }
}
