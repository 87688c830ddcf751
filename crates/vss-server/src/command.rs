//! Request dispatch: parse, authorise, execute, shape the reply.
//!
//! One processor instance serves every connection. Recoverable failures are
//! rendered into protocol error envelopes here and never propagate further;
//! the transport only sees an optional reply string.

use crate::auth::Authenticator;
use crate::permd::PermDaemonClient;
use crate::subscription::SubscriptionEngine;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use vss_core::{Channel, CoreError, Path, SignalTree, SignalView};
use vss_protocol::{
    encode_frame, parse_request, response, ClientRequest, ErrorKind, ParseOutcome,
};

/// Dispatches parsed requests against the tree, authenticator and
/// subscription engine.
pub struct CommandProcessor {
    tree: Arc<RwLock<SignalTree>>,
    auth: Arc<Authenticator>,
    engine: Arc<SubscriptionEngine>,
    daemon: Option<PermDaemonClient>,
}

impl CommandProcessor {
    pub fn new(
        tree: Arc<RwLock<SignalTree>>,
        auth: Arc<Authenticator>,
        engine: Arc<SubscriptionEngine>,
        daemon: Option<PermDaemonClient>,
    ) -> Self {
        Self {
            tree,
            auth,
            engine,
            daemon,
        }
    }

    /// Handle one raw frame. `None` means "send nothing back" (unknown
    /// action, or a reply that failed to encode).
    pub async fn process(&self, raw: &str, channel: &mut Channel) -> Option<String> {
        let outcome = match parse_request(raw) {
            Ok(outcome) => outcome,
            Err(err) => {
                debug!(error = %err.message, "rejecting malformed request");
                return encode(response::error(
                    None,
                    err.request_id.as_ref(),
                    &ErrorKind::BadRequest(err.message),
                ));
            }
        };
        let (request_id, request) = match outcome {
            ParseOutcome::Request {
                request_id,
                request,
            } => (request_id, request),
            ParseOutcome::UnknownAction { action } => {
                info!(%action, "ignoring unknown action");
                return None;
            }
        };

        let action = request.action();
        let frame = match self.dispatch(request, request_id.as_ref(), channel).await {
            Ok(frame) => frame,
            Err(kind) => response::error(Some(action), request_id.as_ref(), &kind),
        };
        encode(frame)
    }

    async fn dispatch(
        &self,
        request: ClientRequest,
        request_id: Option<&Value>,
        channel: &mut Channel,
    ) -> Result<Value, ErrorKind> {
        match request {
            ClientRequest::Authorize { tokens } => {
                // plain authorize always verifies against the configured key
                self.auth
                    .update_pub_key("")
                    .map_err(|_| ErrorKind::InvalidToken)?;
                self.validate_token(channel, &tokens, "authorize", request_id)
                    .await
            }
            ClientRequest::KuksaAuthorize { clientid, secret } => {
                let Some(daemon) = &self.daemon else {
                    warn!("kuksa-authorize requested but no permission daemon configured");
                    return Err(ErrorKind::DaemonUnavailable);
                };
                let grant = daemon.fetch_token(&clientid, &secret).await.map_err(|e| {
                    warn!("permission daemon exchange failed: {e}");
                    ErrorKind::DaemonUnavailable
                })?;
                self.auth
                    .update_pub_key(&grant.pubkey)
                    .map_err(|_| ErrorKind::InvalidToken)?;
                self.validate_token(channel, &grant.token, "kuksa-authorize", request_id)
                    .await
            }
            ClientRequest::Get { path } => self.handle_get(&path, request_id, channel).await,
            ClientRequest::Set { path, value } => {
                self.refresh_authorization(channel);
                let path = parse_path(&path)?;
                let emitted = {
                    let mut tree = self.tree.write().await;
                    tree.set_signal(channel, &path, &value)
                        .map_err(shape_core_error)?
                };
                for (uuid, value) in &emitted {
                    self.engine.update_by_uuid(uuid, value);
                }
                Ok(response::set_ack(request_id))
            }
            ClientRequest::Subscribe { path } => {
                self.refresh_authorization(channel);
                let path = parse_path(&path)?;
                let tree = self.tree.read().await;
                let subscription_id = self
                    .engine
                    .subscribe(channel, &tree, &path)
                    .map_err(shape_core_error)?;
                Ok(response::subscribe_ack(request_id, subscription_id))
            }
            ClientRequest::Unsubscribe { subscription_id } => {
                if self.engine.unsubscribe(subscription_id) {
                    Ok(response::unsubscribe_ack(request_id, subscription_id))
                } else {
                    Err(ErrorKind::UnsubscribeFailed)
                }
            }
            ClientRequest::GetMetadata { path } => {
                let path = parse_path(&path)?;
                let tree = self.tree.read().await;
                let metadata = tree.get_metadata(&path).map_err(shape_core_error)?;
                Ok(response::metadata(request_id, metadata))
            }
            ClientRequest::UpdateMetadata { path, metadata } => {
                self.refresh_authorization(channel);
                let path = parse_path(&path)?;
                let mut tree = self.tree.write().await;
                tree.update_metadata(channel, &path, &metadata)
                    .map_err(shape_core_error)?;
                Ok(response::update_metadata_ack(request_id))
            }
        }
    }

    async fn validate_token(
        &self,
        channel: &mut Channel,
        token: &str,
        action: &str,
        request_id: Option<&Value>,
    ) -> Result<Value, ErrorKind> {
        let tree = self.tree.read().await;
        match self.auth.validate(channel, &tree, token) {
            Ok(ttl) => Ok(response::authorize_ack(action, request_id, ttl)),
            Err(err) => {
                debug!("token validation failed: {err}");
                Err(ErrorKind::InvalidToken)
            }
        }
    }

    /// Per-path permission is evaluated independently: denied paths are
    /// listed in a warning, all-denied is 403, no match at all is 404.
    async fn handle_get(
        &self,
        raw_path: &str,
        request_id: Option<&Value>,
        channel: &mut Channel,
    ) -> Result<Value, ErrorKind> {
        self.refresh_authorization(channel);
        let path = parse_path(raw_path)?;
        let tree = self.tree.read().await;

        let leaves = tree.get_leaf_paths(&path);
        if leaves.is_empty() {
            return Err(ErrorKind::PathNotFound(raw_path.to_string()));
        }

        let mut readable = Vec::new();
        let mut denied = Vec::new();
        for leaf in &leaves {
            if channel.can_read(leaf.as_str()) {
                readable.push(leaf);
            } else {
                denied.push(leaf.as_str().to_string());
            }
        }
        if readable.is_empty() {
            return Err(ErrorKind::Forbidden(format!("No read access to {raw_path}")));
        }
        let warning =
            (!denied.is_empty()).then(|| format!("No read access to [ {} ]", denied.join(",")));

        if leaves.len() == 1 {
            return match tree.get_signal(readable[0]).map_err(shape_core_error)? {
                SignalView::Leaf {
                    path,
                    value,
                    timestamp,
                } => Ok(response::get_single(
                    request_id, &path, value, timestamp, warning,
                )),
                SignalView::Branch { path, .. } => {
                    error!(%path, "leaf path resolved to a branch view");
                    Err(ErrorKind::Unknown(format!("{path} is not a signal")))
                }
            };
        }

        let mut values = Vec::with_capacity(readable.len());
        let mut timestamp = 0;
        for leaf in readable {
            if let SignalView::Leaf {
                path,
                value,
                timestamp: leaf_timestamp,
            } = tree.get_signal(leaf).map_err(shape_core_error)?
            {
                timestamp = leaf_timestamp;
                let mut entry = serde_json::Map::new();
                entry.insert(path, value);
                values.push(Value::Object(entry));
            }
        }
        Ok(response::get_multi(request_id, values, timestamp, warning))
    }

    /// An expired token behaves like no token at all.
    fn refresh_authorization(&self, channel: &mut Channel) {
        if channel.is_authorized() && !self.auth.is_still_valid(channel) {
            debug!(conn_id = channel.conn_id(), "token expired, dropping grants");
            channel.deauthorize();
        }
    }
}

fn parse_path(raw: &str) -> Result<Path, ErrorKind> {
    Path::parse(raw).map_err(|e| ErrorKind::BadRequest(e.to_string()))
}

fn shape_core_error(err: CoreError) -> ErrorKind {
    match err {
        CoreError::MalformedPath(m)
        | CoreError::TypeMismatch(m)
        | CoreError::NotSingleSignal(m) => ErrorKind::BadRequest(m),
        CoreError::OutOfBounds(m) => ErrorKind::OutOfBounds(m),
        CoreError::NoPermission(m) => ErrorKind::Forbidden(m),
        CoreError::PathNotFound(path) | CoreError::PathNotValid(path) => {
            ErrorKind::PathNotFound(path)
        }
        CoreError::NotALeaf(m) | CoreError::Generic(m) | CoreError::Schema(m) => {
            ErrorKind::Unknown(m)
        }
    }
}

fn encode(frame: Value) -> Option<String> {
    match encode_frame(&frame) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("failed to encode response frame: {e}");
            None
        }
    }
}
