use async_trait::async_trait;

use kcc_model::CompileRequest;

/// Verdict of a [`RouterHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Continue with the next hook, then route the request.
    ProcessNormally,
    /// Refuse the request; `send` fails with [`crate::RouteError::RequestRejected`].
    Reject,
    /// The hook has taken care of the request; `send` succeeds without routing it.
    Intercepted,
}

/// Inspection point run by [`crate::Router::send`] before a request is placed on its route.
///
/// Hooks run in registration order and the first non-[`HookAction::ProcessNormally`] verdict wins.
#[async_trait]
pub trait RouterHook: Send + Sync + 'static {
    async fn pre_receive(&self, req: &CompileRequest) -> HookAction;
}
