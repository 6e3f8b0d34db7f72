/*!
 * Request Ingress
 * Validation, admission control, and enqueueing for client requests
 *
 * Everything client-visible is decided here, synchronously: argument and
 * bounds validation, permission floors, rate limiting, and queue
 * admission. The dispatcher only ever sees well-formed work.
 */

use log::debug;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::client::manager::ClientDataManager;
use crate::client::rate_limiter::RateLimiter;
use crate::core::errors::{Result, TuneError};
use crate::core::types::{Permission, Pid, PriorityTier, ResourceTuple, Tid};
use crate::core::wire::{ClientRequest, ClientResponse};
use crate::registry::app::AppRegistry;
use crate::registry::properties::{PropertiesRegistry, Tunables};
use crate::registry::resource::ResourceRegistry;
use crate::registry::signal::SignalRegistry;
use crate::request::manager::RequestManager;
use crate::request::queue::{Message, RequestQueue};
use crate::request::types::Request;

/// Who is on the other end of the socket, from peer credentials
#[derive(Debug, Clone, Copy)]
pub struct PeerIdentity {
    pub pid: Pid,
    pub uid: u32,
}

impl PeerIdentity {
    /// Root holds system permission; everyone else is third-party
    pub fn permission(&self) -> Permission {
        if self.uid == 0 {
            Permission::System
        } else {
            Permission::ThirdParty
        }
    }
}

/// Everything the ingress workers share
pub struct IngressShared {
    pub cdm: Arc<ClientDataManager>,
    pub limiter: RateLimiter,
    pub queue: Arc<RequestQueue>,
    pub requests: Arc<RequestManager>,
    pub resources: Arc<ResourceRegistry>,
    pub signals: Arc<SignalRegistry>,
    pub apps: Arc<AppRegistry>,
    pub properties: Arc<PropertiesRegistry>,
    pub tunables: Tunables,
    /// Current activation mode bit; resources not declaring it are refused
    pub current_mode: AtomicU8,
}

impl IngressShared {
    pub fn set_mode(&self, mode: u8) {
        self.current_mode.store(mode, Ordering::SeqCst);
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Process one decoded client record into its reply
pub fn process_request(shared: &IngressShared, peer: PeerIdentity, req: ClientRequest) -> ClientResponse {
    let result = match req {
        ClientRequest::TuneResources {
            client_tid,
            resources,
            duration_ms,
            high_priority,
        } => tune_resources(shared, peer, client_tid, resources, duration_ms, high_priority),
        ClientRequest::TuneSignal {
            client_tid,
            sig_id,
            sig_type,
            duration_ms,
            high_priority,
            app_name,
        } => tune_signal(
            shared,
            peer,
            client_tid,
            sig_id,
            sig_type,
            duration_ms,
            high_priority,
            app_name,
        ),
        ClientRequest::Retune {
            client_tid,
            handle,
            duration_ms,
        } => retune(shared, peer, client_tid, handle, duration_ms).map(|_| ClientResponse::Ok),
        ClientRequest::Untune { client_tid, handle } => {
            untune(shared, peer, client_tid, handle).map(|_| ClientResponse::Ok)
        }
        ClientRequest::GetProp { name } => get_prop(shared, &name),
        ClientRequest::SetProp { name, value } => set_prop(shared, peer, &name, &value),
    };
    result.unwrap_or_else(|err| ClientResponse::failure(&err))
}

/// Admission shared by both tune paths: client tracking, per-client rate
/// limit, global ceiling.
fn admit(shared: &IngressShared, peer: PeerIdentity, tid: Tid) -> Result<Permission> {
    let permission = peer.permission();
    shared.cdm.upsert(peer.pid, tid, permission)?;
    if !shared.limiter.admit(&shared.cdm, tid, epoch_ms()) {
        return Err(TuneError::Throttled);
    }
    if !shared.limiter.global_admit(
        shared.requests.live_count(),
        shared.tunables.max_concurrent_requests,
    ) {
        return Err(TuneError::Throttled);
    }
    // The permission actually in force is the frozen one
    Ok(shared.cdm.permission(peer.pid).unwrap_or(permission))
}

fn validate_tuples(
    shared: &IngressShared,
    permission: Permission,
    tuples: &[ResourceTuple],
) -> Result<()> {
    if tuples.is_empty() {
        return Err(TuneError::ArgInvalid("no resources in request".into()));
    }
    if tuples.len() > shared.tunables.max_resources_per_request {
        return Err(TuneError::CapacityExceeded(format!(
            "request touches {} resources, cap is {}",
            tuples.len(),
            shared.tunables.max_resources_per_request
        )));
    }

    let mode = shared.current_mode.load(Ordering::SeqCst);
    for tuple in tuples {
        let desc = shared
            .resources
            .lookup(tuple.res_code)
            .ok_or(TuneError::ResourceUnknown(tuple.res_code))?;
        if shared
            .resources
            .scope_index(tuple.res_code, tuple.res_info)
            .is_none()
        {
            return Err(TuneError::ArgInvalid(format!(
                "resource '{}' has no {:?} instance {}",
                desc.name, desc.scope, tuple.res_info
            )));
        }
        if !desc.in_bounds(tuple.value) {
            return Err(TuneError::ArgInvalid(format!(
                "value {} outside [{}, {}] for '{}'",
                tuple.value, desc.low, desc.high, desc.name
            )));
        }
        if desc.permission == Permission::System && permission != Permission::System {
            return Err(TuneError::NotPermitted(format!(
                "resource '{}' needs system permission",
                desc.name
            )));
        }
        if desc.modes & mode == 0 {
            return Err(TuneError::NotPermitted(format!(
                "resource '{}' is not provisioned in the current mode",
                desc.name
            )));
        }
    }
    Ok(())
}

/// Allocate, record, and enqueue an admitted request
fn submit(
    shared: &IngressShared,
    peer: PeerIdentity,
    tid: Tid,
    tier: PriorityTier,
    duration_ms: i64,
    tuples: Vec<ResourceTuple>,
) -> Result<ClientResponse> {
    let handle = shared.requests.allocate_handle();
    let request = Request {
        handle,
        client_pid: peer.pid,
        client_tid: tid,
        tier,
        duration_ms,
        deadline: Instant::now() + Duration::from_millis(duration_ms as u64),
        resources: tuples,
    };
    shared.requests.insert(request.clone())?;
    shared.cdm.bind_handle(tid, handle);

    if let Err(err) = shared.queue.push(Message::Tune(Box::new(request))) {
        // Roll back so the rejected request leaves no trace
        shared.requests.remove(handle);
        shared.cdm.unbind_handle(tid, handle);
        return Err(err);
    }
    debug!("accepted request {} from pid {}", handle, peer.pid);
    Ok(ClientResponse::Handle(handle))
}

fn tune_resources(
    shared: &IngressShared,
    peer: PeerIdentity,
    tid: Tid,
    tuples: Vec<ResourceTuple>,
    duration_ms: i64,
    high_priority: bool,
) -> Result<ClientResponse> {
    let permission = admit(shared, peer, tid)?;
    if duration_ms <= 0 {
        return Err(TuneError::InvalidDuration(format!(
            "duration {} ms",
            duration_ms
        )));
    }
    validate_tuples(shared, permission, &tuples)?;
    let tier = PriorityTier::resolve(permission, high_priority);
    submit(shared, peer, tid, tier, duration_ms, tuples)
}

#[allow(clippy::too_many_arguments)]
fn tune_signal(
    shared: &IngressShared,
    peer: PeerIdentity,
    tid: Tid,
    sig_id: u16,
    sig_type: u32,
    duration_ms: i64,
    high_priority: bool,
    app_name: Option<String>,
) -> Result<ClientResponse> {
    let permission = admit(shared, peer, tid)?;

    let (desc, tuples) = shared
        .signals
        .expand(sig_id, sig_type)
        .ok_or_else(|| TuneError::ArgInvalid(format!("unknown signal {:#x}/{:#x}", sig_id, sig_type)))?;
    if !desc.permits(permission) {
        return Err(TuneError::NotPermitted(format!(
            "signal '{}' not allowed at {:?}",
            desc.name, permission
        )));
    }

    // Per-app bindings are a pure alias: when the app is registered, the
    // signal must be one of its declared codes.
    if let Some(app) = app_name.as_deref() {
        if let Some(binding) = shared.apps.lookup(app) {
            if !binding.signals.contains(&(sig_id, sig_type)) {
                return Err(TuneError::ArgInvalid(format!(
                    "signal {:#x}/{:#x} not bound for app '{}'",
                    sig_id, sig_type, app
                )));
            }
        }
    }

    let duration_ms = if duration_ms == 0 {
        desc.default_timeout_ms
    } else {
        duration_ms
    };
    if duration_ms <= 0 {
        return Err(TuneError::InvalidDuration(format!(
            "duration {} ms",
            duration_ms
        )));
    }

    validate_tuples(shared, permission, &tuples)?;
    let tier = PriorityTier::resolve(permission, high_priority);
    submit(shared, peer, tid, tier, duration_ms, tuples)
}

fn retune(
    shared: &IngressShared,
    peer: PeerIdentity,
    _tid: Tid,
    handle: u64,
    duration_ms: i64,
) -> Result<()> {
    if duration_ms <= 0 {
        return Err(TuneError::InvalidDuration(format!(
            "duration {} ms",
            duration_ms
        )));
    }
    let new_deadline = Instant::now() + Duration::from_millis(duration_ms as u64);

    let (owner, tier, current_deadline) = shared
        .requests
        .with(handle, |r| {
            (r.request.client_pid, r.request.tier, r.request.deadline)
        })
        .ok_or(TuneError::NoSuchHandle(handle))?;
    if owner != peer.pid {
        return Err(TuneError::NotPermitted(format!(
            "handle {} belongs to pid {}",
            handle, owner
        )));
    }
    // Only extension is allowed; the original timer stays untouched on
    // rejection.
    if new_deadline <= current_deadline {
        return Err(TuneError::InvalidDuration(
            "new duration does not extend the request".into(),
        ));
    }

    shared.queue.push(Message::Retune {
        handle,
        duration_ms,
        tier: Some(tier),
    })
}

fn untune(shared: &IngressShared, peer: PeerIdentity, _tid: Tid, handle: u64) -> Result<()> {
    let (owner, tier) = shared
        .requests
        .with(handle, |r| (r.request.client_pid, r.request.tier))
        .ok_or(TuneError::NoSuchHandle(handle))?;
    if owner != peer.pid {
        return Err(TuneError::NotPermitted(format!(
            "handle {} belongs to pid {}",
            handle, owner
        )));
    }
    shared.queue.push(Message::Untune {
        handle,
        tier: Some(tier),
    })
}

fn get_prop(shared: &IngressShared, name: &str) -> Result<ClientResponse> {
    shared
        .properties
        .get(name)
        .map(ClientResponse::Value)
        .ok_or_else(|| TuneError::ArgInvalid(format!("unknown property '{}'", name)))
}

fn set_prop(
    shared: &IngressShared,
    peer: PeerIdentity,
    name: &str,
    value: &str,
) -> Result<ClientResponse> {
    if peer.permission() != Permission::System {
        return Err(TuneError::NotPermitted("SET_PROP needs system permission".into()));
    }
    shared.properties.set(name, value);
    Ok(ClientResponse::Ok)
}
