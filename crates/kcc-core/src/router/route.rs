use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

use kcc_model::{CompileRequest, Fingerprint, PartyId, Toolchain};

use crate::{error::RouteError, guard::lock};

/// A consumer ready to take exactly one request.
type Offer = oneshot::Sender<CompileRequest>;

/// Which reference count an attachment holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Producer,
    Consumer,
}

#[derive(Default)]
struct Members {
    producers: BTreeMap<PartyId, usize>,
    consumers: BTreeMap<PartyId, usize>,
}

impl Members {
    fn side(&mut self, side: Side) -> &mut BTreeMap<PartyId, usize> {
        match side {
            Side::Producer => &mut self.producers,
            Side::Consumer => &mut self.consumers,
        }
    }
}

/// Rendezvous point for one toolchain.
///
/// Producers (consumerds) push requests through [`crate::Router::send`]; every attached consumer
/// (agent) competes for them. Nothing is buffered on the route: each consumer posts an offer for
/// one request and a send completes only once a live offer has taken the request. The route is
/// owned by the router's table and torn down when both reference counts drop to zero.
pub struct Route {
    toolchain: Toolchain,
    fingerprint: Fingerprint,
    offers_tx: mpsc::UnboundedSender<Offer>,
    offers_rx: AsyncMutex<mpsc::UnboundedReceiver<Offer>>,
    producers: AtomicUsize,
    consumers: watch::Sender<usize>,
    members: Mutex<Members>,
    lifetime: CancellationToken,
    closed: AtomicBool,
}

impl Route {
    pub(crate) fn new(toolchain: Toolchain, lifetime: CancellationToken) -> Self {
        let (offers_tx, offers_rx) = mpsc::unbounded_channel();
        Self {
            fingerprint: toolchain.fingerprint(),
            toolchain,
            offers_tx,
            offers_rx: AsyncMutex::new(offers_rx),
            producers: AtomicUsize::new(0),
            consumers: watch::Sender::new(0),
            members: Mutex::new(Members::default()),
            lifetime,
            closed: AtomicBool::new(false),
        }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Returns `true` if at least one consumer is attached.
    #[inline]
    pub fn can_send(&self) -> bool {
        self.consumer_count() > 0
    }

    pub fn producer_count(&self) -> usize {
        self.producers.load(Ordering::Acquire)
    }

    pub fn consumer_count(&self) -> usize {
        *self.consumers.borrow()
    }

    /// Returns `true` once the route has been torn down.
    pub fn is_closed(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    pub(crate) fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    /// Take one reference on `side`. Caller holds the table lock.
    pub(crate) fn retain(&self, side: Side, id: PartyId) {
        match side {
            Side::Producer => {
                self.producers.fetch_add(1, Ordering::AcqRel);
            }
            Side::Consumer => self.consumers.send_modify(|n| *n += 1),
        }
        *lock(&self.members).side(side).entry(id).or_insert(0) += 1;
    }

    /// Drop one reference on `side`. Caller holds the table lock.
    ///
    /// Returns `true` if the route is now unreferenced.
    pub(crate) fn release(&self, side: Side, id: PartyId) -> bool {
        {
            let mut members = lock(&self.members);
            let refs = members.side(side);
            if let Some(n) = refs.get_mut(&id) {
                *n -= 1;
                if *n == 0 {
                    refs.remove(&id);
                }
            }
        }
        let released = match side {
            Side::Producer => self
                .producers
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
            Side::Consumer => self.consumers.send_if_modified(|n| match n.checked_sub(1) {
                Some(left) => {
                    *n = left;
                    true
                }
                None => false,
            }),
        };
        if !released {
            warn!(route = %self.toolchain, ?side, "route reference released twice");
        }
        self.producer_count() == 0 && self.consumer_count() == 0
    }

    /// Hold a producer attachment until `scope` or the route itself ends.
    pub(crate) async fn attach_producer(&self, scope: &CancellationToken) {
        tokio::select! {
            _ = scope.cancelled() => {}
            _ = self.lifetime.cancelled() => {}
        }
    }

    /// Take requests from this route one at a time and forward them into `output`, until
    /// `scope` or the route ends.
    ///
    /// A request is taken before `output` has room for it, so the forward waits on the agent
    /// rather than on the route. A request taken right as the attachment ends is still
    /// forwarded; the agent fails whatever it cannot run.
    pub(crate) async fn attach_consumer(
        &self,
        scope: &CancellationToken,
        output: &mpsc::Sender<CompileRequest>,
    ) {
        loop {
            let (offer, mut taken) = oneshot::channel();
            if self.offers_tx.send(offer).is_err() {
                return;
            }

            let received = tokio::select! {
                biased;
                _ = scope.cancelled() => None,
                _ = self.lifetime.cancelled() => None,
                received = &mut taken => received.ok(),
            };
            let req = match received {
                Some(req) => req,
                None => {
                    taken.close();
                    match taken.try_recv() {
                        Ok(req) => req,
                        Err(_) => return,
                    }
                }
            };

            let request = req.request_id.clone();
            trace!(route = %self.toolchain, %request, "request handed to consumer");
            if output.send(req).await.is_err() {
                error!(route = %self.toolchain, %request, "consumer output closed with a request in hand");
                return;
            }
            if scope.is_cancelled() || self.lifetime.is_cancelled() {
                return;
            }
        }
    }

    /// Hand `req` to the next consumer that offers to take it.
    ///
    /// Fails with [`RouteError::NoAgents`] if the last consumer detaches while waiting.
    pub(crate) async fn enqueue(
        &self,
        cancel: &CancellationToken,
        req: CompileRequest,
    ) -> Result<(), RouteError> {
        let mut consumers = self.consumers.subscribe();
        let idle = async move {
            let _ = consumers.wait_for(|n| *n == 0).await;
        };
        tokio::pin!(idle);

        let mut offers = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RouteError::Canceled),
            _ = self.lifetime.cancelled() => return Err(RouteError::StreamClosed),
            _ = &mut idle => return Err(RouteError::NoAgents),
            offers = self.offers_rx.lock() => offers,
        };

        let mut req = req;
        loop {
            let offer = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RouteError::Canceled),
                _ = self.lifetime.cancelled() => return Err(RouteError::StreamClosed),
                _ = &mut idle => return Err(RouteError::NoAgents),
                offer = offers.recv() => offer,
            };
            let Some(offer) = offer else {
                return Err(RouteError::StreamClosed);
            };
            // Offers of consumers that have since detached are skipped.
            match offer.send(req) {
                Ok(()) => return Ok(()),
                Err(back) => req = back,
            }
        }
    }

    /// Cancel the route and discard pending offers. Only the first call has any effect.
    pub(crate) async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.lifetime.cancel();

        let mut offers = self.offers_rx.lock().await;
        offers.close();
        let mut stale = 0usize;
        while offers.try_recv().is_ok() {
            stale += 1;
        }
        trace!(route = %self.toolchain, stale, "route offers discarded");
        true
    }

    /// Snapshot of the route for listing.
    pub fn info(&self) -> RouteInfo {
        let members = lock(&self.members);
        RouteInfo {
            toolchain: self.toolchain.clone(),
            fingerprint: self.fingerprint,
            producers: members.producers.keys().copied().collect(),
            consumers: members.consumers.keys().copied().collect(),
        }
    }
}

/// Point-in-time description of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub toolchain: Toolchain,
    pub fingerprint: Fingerprint,
    /// Consumerds sending on this route.
    pub producers: Vec<PartyId>,
    /// Agents receiving from this route.
    pub consumers: Vec<PartyId>,
}
