//! Toolchain-keyed router between consumerds (producers) and agents (consumers).
//!
//! Every party advertises a toolchain set. For each toolchain the router attaches the party to
//! the [`Route`] for that toolchain's fingerprint, bound to a per-(party, toolchain) scope derived
//! from the party's lifetime. Ending the lifetime, or dropping the toolchain from the set,
//! cancels the scope and releases the route reference; unreferenced routes remove themselves.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use kcc_model::{CompileRequest, Fingerprint, PartyId, Toolchain, Toolchains};

use crate::{error::RouteError, guard::lock};

mod hook;
pub use hook::{HookAction, RouterHook};

mod route;
pub use route::{Route, RouteInfo};
use route::Side;

mod table;
use table::RouteTable;

/// Requests an agent's output holds beyond the one its send loop is writing.
const RECEIVER_OUTPUT_DEPTH: usize = 1;

/// Attachments of one party.
struct Membership {
    epoch: u64,
    lifetime: CancellationToken,
    links: HashMap<Fingerprint, CancellationToken>,
    /// Present for receivers only.
    output: Option<mpsc::Sender<CompileRequest>>,
}

impl Membership {
    fn cancel_all(&mut self) {
        for (_, link) in self.links.drain() {
            link.cancel();
        }
    }
}

struct RouterShared {
    lifetime: CancellationToken,
    table: Arc<RouteTable>,
    senders: Mutex<HashMap<PartyId, Membership>>,
    receivers: Mutex<HashMap<PartyId, Membership>>,
    hooks: Vec<Arc<dyn RouterHook>>,
    epochs: AtomicU64,
}

impl Drop for RouterShared {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

/// Router handle. Cheap to clone; all clones share the same tables.
#[derive(Clone)]
pub struct Router {
    shared: Arc<RouterShared>,
}

impl Router {
    /// Create a router without hooks. Cancelling `lifetime` tears down every route.
    pub fn new(lifetime: CancellationToken) -> Self {
        Self::with_hooks(lifetime, Vec::new())
    }

    /// Create a router whose [`Router::send`] runs `hooks` in order.
    pub fn with_hooks(lifetime: CancellationToken, hooks: Vec<Arc<dyn RouterHook>>) -> Self {
        Self {
            shared: Arc::new(RouterShared {
                table: RouteTable::new(lifetime.clone()),
                lifetime,
                senders: Mutex::new(HashMap::new()),
                receivers: Mutex::new(HashMap::new()),
                hooks,
                epochs: AtomicU64::new(0),
            }),
        }
    }

    /// Route for `tc`, created on first lookup.
    pub fn route_for_toolchain(&self, tc: &Toolchain) -> Arc<Route> {
        self.shared.table.route_for(tc)
    }

    /// Attach a consumerd as a producer on the route of every toolchain it advertises.
    #[instrument(level = "debug", skip(self, lifetime, toolchains), fields(consumerd = %id.short(), toolchains = toolchains.len()))]
    pub fn add_sender(&self, id: PartyId, lifetime: &CancellationToken, toolchains: &Toolchains) {
        self.join(Side::Producer, id, lifetime, toolchains, None);
    }

    /// Attach an agent as a consumer on the route of every toolchain it advertises.
    ///
    /// Returns the stream of requests routed to this agent. It ends once the agent's lifetime
    /// is over and every attachment has wound down.
    #[instrument(level = "debug", skip(self, lifetime, toolchains), fields(agent = %id.short(), toolchains = toolchains.len()))]
    pub fn add_receiver(
        &self,
        id: PartyId,
        lifetime: &CancellationToken,
        toolchains: &Toolchains,
    ) -> mpsc::Receiver<CompileRequest> {
        let (tx, rx) = mpsc::channel(RECEIVER_OUTPUT_DEPTH);
        self.join(Side::Consumer, id, lifetime, toolchains, Some(tx));
        rx
    }

    /// Reconcile a consumerd's attachments with a new toolchain set.
    ///
    /// Returns `false` if `id` is not a known sender.
    pub fn update_sender_toolchains(&self, id: PartyId, toolchains: &Toolchains) -> bool {
        self.reconcile(Side::Producer, id, toolchains)
    }

    /// Reconcile an agent's attachments with a new toolchain set.
    ///
    /// Returns `false` if `id` is not a known receiver.
    pub fn update_receiver_toolchains(&self, id: PartyId, toolchains: &Toolchains) -> bool {
        self.reconcile(Side::Consumer, id, toolchains)
    }

    /// Run hooks on `req` and place it on its route.
    ///
    /// Fails without waiting when the request has no toolchain, a hook rejects it or no agent
    /// serves its toolchain. Otherwise waits until an agent attached to the route takes it.
    /// The wait fails if `cancel` fires, the route closes or the last agent detaches.
    #[instrument(level = "debug", skip(self, cancel, req), fields(request = %req.request_id))]
    pub async fn send(&self, cancel: &CancellationToken, req: CompileRequest) -> Result<(), RouteError> {
        let Some(toolchain) = req.toolchain.as_ref() else {
            return Err(RouteError::InvalidToolchain);
        };
        let fp = toolchain.fingerprint();

        for hook in &self.shared.hooks {
            match hook.pre_receive(&req).await {
                HookAction::ProcessNormally => {}
                HookAction::Reject => return Err(RouteError::RequestRejected),
                HookAction::Intercepted => {
                    trace!("request intercepted by hook");
                    return Ok(());
                }
            }
        }

        let route = match self.shared.table.find(&fp) {
            Some(route) if route.can_send() => route,
            _ => return Err(RouteError::NoAgents),
        };
        route.enqueue(cancel, req).await
    }

    /// Snapshot of every live route.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.shared
            .table
            .snapshot()
            .iter()
            .filter(|r| !r.is_closed())
            .map(|r| r.info())
            .collect()
    }

    pub fn route_count(&self) -> usize {
        self.shared.table.len()
    }

    pub fn sender_count(&self) -> usize {
        lock(&self.shared.senders).len()
    }

    pub fn receiver_count(&self) -> usize {
        lock(&self.shared.receivers).len()
    }

    fn members(&self, side: Side) -> &Mutex<HashMap<PartyId, Membership>> {
        match side {
            Side::Producer => &self.shared.senders,
            Side::Consumer => &self.shared.receivers,
        }
    }

    fn join(
        &self,
        side: Side,
        id: PartyId,
        lifetime: &CancellationToken,
        toolchains: &Toolchains,
        output: Option<mpsc::Sender<CompileRequest>>,
    ) {
        let epoch = self.shared.epochs.fetch_add(1, Ordering::Relaxed);
        let mut membership = Membership {
            epoch,
            lifetime: lifetime.clone(),
            links: HashMap::new(),
            output,
        };
        for tc in toolchains {
            self.link(&mut membership, side, id, tc);
        }

        let replaced = lock(self.members(side)).insert(id, membership);
        if let Some(mut old) = replaced {
            debug!(party = %id.short(), "party re-registered; dropping previous attachments");
            old.cancel_all();
        }
        self.forget_on_close(side, id, epoch, lifetime.clone());
    }

    fn reconcile(&self, side: Side, id: PartyId, toolchains: &Toolchains) -> bool {
        let mut members = lock(self.members(side));
        let Some(membership) = members.get_mut(&id) else {
            debug!(party = %id.short(), ?side, "toolchain update for unknown party");
            return false;
        };

        let wanted: HashMap<Fingerprint, &Toolchain> =
            toolchains.iter().map(|tc| (tc.fingerprint(), tc)).collect();

        membership.links.retain(|fp, link| {
            let keep = wanted.contains_key(fp);
            if !keep {
                link.cancel();
            }
            keep
        });
        for (fp, tc) in wanted {
            if !membership.links.contains_key(&fp) {
                self.link(membership, side, id, tc);
            }
        }
        trace!(party = %id.short(), ?side, links = membership.links.len(), "toolchains reconciled");
        true
    }

    /// Take a reference on the route for `tc` and spawn the attachment task.
    fn link(&self, membership: &mut Membership, side: Side, id: PartyId, tc: &Toolchain) {
        let fp = tc.fingerprint();
        if membership.links.contains_key(&fp) {
            return;
        }
        let scope = membership.lifetime.child_token();
        let route = self.shared.table.acquire(tc, side, id);
        let table = Arc::clone(&self.shared.table);

        match (side, membership.output.clone()) {
            (Side::Consumer, Some(output)) => {
                let scope = scope.clone();
                tokio::spawn(async move {
                    route.attach_consumer(&scope, &output).await;
                    drop(output);
                    table.release(&route, side, id);
                });
            }
            _ => {
                let scope = scope.clone();
                tokio::spawn(async move {
                    route.attach_producer(&scope).await;
                    table.release(&route, side, id);
                });
            }
        }
        membership.links.insert(fp, scope);
    }

    /// Drop the party's table entry once its lifetime or the router's ends.
    ///
    /// The entry holds the receiver's output sender, so the stream returned by
    /// [`Router::add_receiver`] only ends after this runs.
    fn forget_on_close(&self, side: Side, id: PartyId, epoch: u64, lifetime: CancellationToken) {
        let shared: Weak<RouterShared> = Arc::downgrade(&self.shared);
        let router_lifetime = self.shared.lifetime.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = lifetime.cancelled() => {}
                _ = router_lifetime.cancelled() => {}
            }
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let router = Router { shared };
            let mut members = lock(router.members(side));
            if members.get(&id).is_some_and(|m| m.epoch == epoch) {
                if let Some(mut m) = members.remove(&id) {
                    m.cancel_all();
                }
                trace!(party = %id.short(), ?side, "party forgotten");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use kcc_model::{ToolchainKind, ToolchainLang};
    use tokio::time::{sleep, timeout};

    use super::*;

    fn clang_c() -> Toolchain {
        Toolchain {
            kind: ToolchainKind::Clang,
            lang: ToolchainLang::C,
            target_arch: "amd64".into(),
            version: "1.0".into(),
            pic_default: true,
            pie_default: false,
            executable: "clang-c".into(),
        }
    }

    fn gnu_c() -> Toolchain {
        Toolchain {
            kind: ToolchainKind::Gnu,
            executable: "gnu-c".into(),
            ..clang_c()
        }
    }

    fn set(tcs: &[Toolchain]) -> Toolchains {
        tcs.iter().cloned().collect()
    }

    fn sample_req1() -> CompileRequest {
        CompileRequest::new("req1", clang_c(), vec!["-c".into()], "test")
    }

    fn sample_req2() -> CompileRequest {
        CompileRequest::new("req2", gnu_c(), vec!["-c".into()], "test2")
    }

    async fn eventually(what: &str, f: impl Fn() -> bool) {
        for _ in 0..200 {
            if f() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never held: {what}");
    }

    #[tokio::test]
    async fn routes_between_matching_parties() {
        let root = CancellationToken::new();
        let router = Router::new(root.child_token());
        let cancel = CancellationToken::new();

        assert_eq!(router.sender_count(), 0);
        assert_eq!(router.receiver_count(), 0);
        assert_eq!(router.route_count(), 0);

        // consumerd with clang only: no agents yet
        let cd1 = CancellationToken::new();
        router.add_sender(PartyId::new(), &cd1, &set(&[clang_c()]));
        assert_eq!(router.sender_count(), 1);
        assert_eq!(router.route_count(), 1);

        let clang_route = router.route_for_toolchain(&clang_c());
        assert_eq!(clang_route.producer_count(), 1);
        assert_eq!(clang_route.consumer_count(), 0);
        assert!(!clang_route.can_send());
        assert_eq!(router.send(&cancel, sample_req1()).await, Err(RouteError::NoAgents));

        let mut invalid = sample_req1();
        invalid.toolchain = None;
        assert_eq!(
            router.send(&cancel, invalid.clone()).await,
            Err(RouteError::InvalidToolchain)
        );

        // agent with clang
        let a1 = CancellationToken::new();
        let mut out1 = router.add_receiver(PartyId::new(), &a1, &set(&[clang_c()]));
        assert!(clang_route.can_send());
        assert_eq!(router.route_count(), 1);

        router.send(&cancel, sample_req1()).await.unwrap();
        let got = timeout(Duration::from_secs(1), out1.recv()).await.unwrap();
        assert_eq!(got, Some(sample_req1()));

        // second consumerd with gnu: new route, still no agents for it
        let cd2 = CancellationToken::new();
        router.add_sender(PartyId::new(), &cd2, &set(&[gnu_c()]));
        assert_eq!(router.route_count(), 2);
        assert_eq!(router.send(&cancel, sample_req2()).await, Err(RouteError::NoAgents));

        // agent with gnu
        let a2 = CancellationToken::new();
        let mut out2 = router.add_receiver(PartyId::new(), &a2, &set(&[gnu_c()]));
        router.send(&cancel, sample_req2()).await.unwrap();
        let got = timeout(Duration::from_secs(1), out2.recv()).await.unwrap();
        assert_eq!(got, Some(sample_req2()));

        assert_eq!(
            router.send(&cancel, invalid).await,
            Err(RouteError::InvalidToolchain)
        );
        root.cancel();
    }

    #[tokio::test]
    async fn agent_on_two_toolchains_serves_both_routes() {
        let router = Router::new(CancellationToken::new());
        let cancel = CancellationToken::new();
        router.add_sender(PartyId::new(), &CancellationToken::new(), &set(&[clang_c(), gnu_c()]));
        let mut out = router.add_receiver(PartyId::new(), &CancellationToken::new(), &set(&[clang_c(), gnu_c()]));

        // Alternate toolchains so each route gets a turn while the other one waits.
        for round in 0..4 {
            let (req, other) = if round % 2 == 0 {
                (sample_req1(), sample_req2())
            } else {
                (sample_req2(), sample_req1())
            };
            timeout(Duration::from_secs(1), router.send(&cancel, req.clone()))
                .await
                .unwrap()
                .unwrap();
            let got = timeout(Duration::from_secs(1), out.recv()).await.unwrap();
            assert_eq!(got, Some(req));

            timeout(Duration::from_secs(1), router.send(&cancel, other.clone()))
                .await
                .unwrap()
                .unwrap();
            let got = timeout(Duration::from_secs(1), out.recv()).await.unwrap();
            assert_eq!(got, Some(other));
        }
    }

    #[tokio::test]
    async fn route_is_removed_when_all_parties_leave() {
        let router = Router::new(CancellationToken::new());

        let cd = CancellationToken::new();
        let agent = CancellationToken::new();
        router.add_sender(PartyId::new(), &cd, &set(&[clang_c()]));
        let mut out = router.add_receiver(PartyId::new(), &agent, &set(&[clang_c()]));
        let route = router.route_for_toolchain(&clang_c());
        assert_eq!(router.route_count(), 1);

        cd.cancel();
        eventually("producer released", || route.producer_count() == 0).await;
        assert_eq!(router.route_count(), 1, "consumer still holds the route");

        agent.cancel();
        eventually("route removed", || router.route_count() == 0).await;
        eventually("parties forgotten", || {
            router.sender_count() == 0 && router.receiver_count() == 0
        })
        .await;
        assert!(route.is_closed());

        let closed = timeout(Duration::from_secs(1), out.recv()).await.unwrap();
        assert_eq!(closed, None, "agent output ends with its attachments");
    }

    #[tokio::test]
    async fn sender_update_reconciles_attachments() {
        let router = Router::new(CancellationToken::new());
        let id = PartyId::new();
        let cd = CancellationToken::new();
        router.add_sender(id, &cd, &set(&[clang_c()]));
        let clang_route = router.route_for_toolchain(&clang_c());

        // unchanged toolchain is not attached twice
        assert!(router.update_sender_toolchains(id, &set(&[clang_c(), gnu_c()])));
        let gnu_route = router.route_for_toolchain(&gnu_c());
        assert_eq!(clang_route.producer_count(), 1);
        assert_eq!(gnu_route.producer_count(), 1);

        // removed toolchain releases only its own attachment
        assert!(router.update_sender_toolchains(id, &set(&[gnu_c()])));
        eventually("clang attachment released", || clang_route.producer_count() == 0).await;
        eventually("idle clang route removed", || router.route_count() == 1).await;
        assert_eq!(gnu_route.producer_count(), 1);
        assert!(!gnu_route.is_closed());

        assert!(!router.update_sender_toolchains(PartyId::new(), &set(&[gnu_c()])));
    }

    #[tokio::test]
    async fn receiver_update_moves_agent_between_routes() {
        let router = Router::new(CancellationToken::new());
        let cancel = CancellationToken::new();
        router.add_sender(PartyId::new(), &CancellationToken::new(), &set(&[clang_c(), gnu_c()]));

        let agent = PartyId::new();
        let mut out = router.add_receiver(agent, &CancellationToken::new(), &set(&[clang_c()]));
        assert_eq!(router.send(&cancel, sample_req2()).await, Err(RouteError::NoAgents));

        assert!(router.update_receiver_toolchains(agent, &set(&[gnu_c()])));
        eventually("clang consumer released", || {
            !router.route_for_toolchain(&clang_c()).can_send()
        })
        .await;

        router.send(&cancel, sample_req2()).await.unwrap();
        let got = timeout(Duration::from_secs(1), out.recv()).await.unwrap();
        assert_eq!(got, Some(sample_req2()));
        assert_eq!(router.send(&cancel, sample_req1()).await, Err(RouteError::NoAgents));
    }

    #[tokio::test]
    async fn consumers_compete_for_a_shared_route() {
        let router = Router::new(CancellationToken::new());
        let cancel = CancellationToken::new();
        router.add_sender(PartyId::new(), &CancellationToken::new(), &set(&[clang_c()]));
        let mut out1 = router.add_receiver(PartyId::new(), &CancellationToken::new(), &set(&[clang_c()]));
        let mut out2 = router.add_receiver(PartyId::new(), &CancellationToken::new(), &set(&[clang_c()]));

        let mut a = sample_req1();
        a.request_id = "a".into();
        let mut b = sample_req1();
        b.request_id = "b".into();
        router.send(&cancel, a).await.unwrap();
        router.send(&cancel, b).await.unwrap();

        // neither output is drained, so each agent ends up holding exactly one request
        let first = timeout(Duration::from_secs(1), out1.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), out2.recv()).await.unwrap().unwrap();
        let mut ids = vec![first.request_id.to_string(), second.request_id.to_string()];
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cancelled_send_does_not_wait() {
        let router = Router::new(CancellationToken::new());
        router.add_sender(PartyId::new(), &CancellationToken::new(), &set(&[clang_c()]));
        let _out = router.add_receiver(PartyId::new(), &CancellationToken::new(), &set(&[clang_c()]));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = timeout(Duration::from_secs(1), router.send(&cancel, sample_req1()))
            .await
            .unwrap();
        assert_eq!(res, Err(RouteError::Canceled));
    }

    struct Fixed {
        action: HookAction,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(action: HookAction) -> Arc<Self> {
            Arc::new(Self {
                action,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RouterHook for Fixed {
        async fn pre_receive(&self, _req: &CompileRequest) -> HookAction {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.action
        }
    }

    #[tokio::test]
    async fn hooks_run_in_order_and_first_verdict_wins() {
        let first = Fixed::new(HookAction::ProcessNormally);
        let intercept = Fixed::new(HookAction::Intercepted);
        let never = Fixed::new(HookAction::Reject);
        let hooks: Vec<Arc<dyn RouterHook>> = vec![first.clone(), intercept.clone(), never.clone()];
        let router = Router::with_hooks(CancellationToken::new(), hooks);

        // intercepted requests succeed even with no agents at all
        router
            .send(&CancellationToken::new(), sample_req1())
            .await
            .unwrap();
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(intercept.calls.load(Ordering::SeqCst), 1);
        assert_eq!(never.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejecting_hook_fails_send() {
        let hooks: Vec<Arc<dyn RouterHook>> = vec![Fixed::new(HookAction::Reject)];
        let router = Router::with_hooks(CancellationToken::new(), hooks);
        router.add_sender(PartyId::new(), &CancellationToken::new(), &set(&[clang_c()]));
        let _out = router.add_receiver(PartyId::new(), &CancellationToken::new(), &set(&[clang_c()]));

        assert_eq!(
            router.send(&CancellationToken::new(), sample_req1()).await,
            Err(RouteError::RequestRejected)
        );
    }

    #[tokio::test]
    async fn invalid_toolchain_skips_hooks() {
        let hook = Fixed::new(HookAction::Intercepted);
        let hooks: Vec<Arc<dyn RouterHook>> = vec![hook.clone()];
        let router = Router::with_hooks(CancellationToken::new(), hooks);
        let mut req = sample_req1();
        req.toolchain = None;

        assert_eq!(
            router.send(&CancellationToken::new(), req).await,
            Err(RouteError::InvalidToolchain)
        );
        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
    }
}
