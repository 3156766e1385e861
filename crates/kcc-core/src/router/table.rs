use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use kcc_model::{Fingerprint, PartyId, Toolchain};

use crate::{
    guard::lock,
    router::route::{Route, Side},
};

/// Routes keyed by toolchain fingerprint.
///
/// Lookup, creation and reference changes happen under one lock, so a route can never be
/// retained after the release that made it idle.
pub(crate) struct RouteTable {
    lifetime: CancellationToken,
    routes: Mutex<HashMap<Fingerprint, Arc<Route>>>,
}

impl RouteTable {
    pub(crate) fn new(lifetime: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            lifetime,
            routes: Mutex::new(HashMap::new()),
        })
    }

    /// Live route for `tc`, creating it if absent.
    pub(crate) fn route_for(self: &Arc<Self>, tc: &Toolchain) -> Arc<Route> {
        let mut routes = lock(&self.routes);
        self.route_for_locked(&mut routes, tc)
    }

    fn route_for_locked(
        self: &Arc<Self>,
        routes: &mut HashMap<Fingerprint, Arc<Route>>,
        tc: &Toolchain,
    ) -> Arc<Route> {
        let fp = tc.fingerprint();
        if let Some(route) = routes.get(&fp) {
            // A cancelled route is waiting for its cleanup task; replace it.
            if !route.is_closed() {
                return Arc::clone(route);
            }
        }

        let route = Arc::new(Route::new(tc.clone(), self.lifetime.child_token()));
        routes.insert(fp, Arc::clone(&route));
        self.spawn_cleanup(Arc::clone(&route));
        debug!(route = %tc, fingerprint = %fp.short(), "route created");
        route
    }

    /// Live route for `fp`, if any. Never creates.
    pub(crate) fn find(&self, fp: &Fingerprint) -> Option<Arc<Route>> {
        lock(&self.routes)
            .get(fp)
            .filter(|r| !r.is_closed())
            .cloned()
    }

    /// Resolve the route for `tc` and take one reference on `side` for `id`.
    pub(crate) fn acquire(self: &Arc<Self>, tc: &Toolchain, side: Side, id: PartyId) -> Arc<Route> {
        let mut routes = lock(&self.routes);
        let route = self.route_for_locked(&mut routes, tc);
        route.retain(side, id);
        route
    }

    /// Drop one reference; the last one out cancels the route.
    pub(crate) fn release(&self, route: &Route, side: Side, id: PartyId) {
        let _routes = lock(&self.routes);
        if route.release(side, id) {
            trace!(route = %route.toolchain(), "route unreferenced");
            route.lifetime().cancel();
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Route>> {
        lock(&self.routes).values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.routes).len()
    }

    fn spawn_cleanup(self: &Arc<Self>, route: Arc<Route>) {
        let table: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            route.lifetime().cancelled().await;
            if let Some(table) = table.upgrade() {
                table.remove(&route);
            }
            if route.close().await {
                debug!(route = %route.toolchain(), "route removed");
            }
        });
    }

    fn remove(&self, route: &Arc<Route>) {
        let mut routes = lock(&self.routes);
        let fp = route.fingerprint();
        if routes.get(&fp).is_some_and(|cur| Arc::ptr_eq(cur, route)) {
            routes.remove(&fp);
        }
    }
}
