//! Application-facing bridge: method calls in, events out.
//! Owns the listener registry and data store; collaborators come from the attached context.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::data::{self, DataEvent, DataItem, DataSyncStore};
use crate::error::BridgeError;
use crate::host::HostContext;
use crate::lifecycle::{AttachGuard, ContextSlot};
use crate::node::NodeId;
use crate::protocol::method;
use crate::registry::{ListenerId, ListenerRegistry};
use crate::relay::{self, PendingSend, SendReport};
use crate::value::{Dynamic, DynamicMap, Payload};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Returned by `getPlatformVersion`.
    pub platform_version: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            platform_version: format!("{} {}", std::env::consts::OS, env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Call from the application layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub arguments: Dynamic,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Dynamic) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// Parse `{"method": "...", "arguments": ...}`. Missing arguments are null.
    pub fn from_json(value: serde_json::Value) -> Result<Self, BridgeError> {
        let serde_json::Value::Object(mut obj) = value else {
            return Err(BridgeError::InvalidArgument(
                "method call must be a JSON object".into(),
            ));
        };
        let method = match obj.remove("method") {
            Some(serde_json::Value::String(m)) => m,
            _ => {
                return Err(BridgeError::InvalidArgument(
                    "method call needs a string \"method\"".into(),
                ))
            }
        };
        let arguments = obj
            .remove("arguments")
            .map(Dynamic::from)
            .unwrap_or(Dynamic::Null);
        Ok(Self { method, arguments })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    Success(Dynamic),
    Error { code: String, message: String },
    NotImplemented,
}

impl MethodResult {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MethodResult::Success(v) => serde_json::json!({ "result": serde_json::Value::from(v) }),
            MethodResult::Error { code, message } => {
                serde_json::json!({ "error": { "code": code, "message": message } })
            }
            MethodResult::NotImplemented => serde_json::json!({ "notImplemented": true }),
        }
    }
}

impl From<BridgeError> for MethodResult {
    fn from(e: BridgeError) -> Self {
        MethodResult::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// The relay instance the host runtime talks to.
pub struct WearableBridge {
    config: BridgeConfig,
    registry: Mutex<ListenerRegistry>,
    store: Mutex<DataSyncStore>,
    context: ContextSlot,
}

impl WearableBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(ListenerRegistry::new()),
            store: Mutex::new(DataSyncStore::new()),
            context: ContextSlot::new(),
        }
    }

    pub fn attach(&self, ctx: HostContext) -> AttachGuard {
        self.context.attach(ctx)
    }

    pub fn detach(&self) -> bool {
        self.context.detach()
    }

    pub fn is_attached(&self) -> bool {
        self.context.is_attached()
    }

    pub fn platform_version(&self) -> &str {
        &self.config.platform_version
    }

    pub fn listen_messages(&self, id: ListenerId) {
        self.registry.lock().register_message_listener(id);
    }

    pub fn listen_data(&self, id: ListenerId) {
        self.registry.lock().register_data_listener(id);
    }

    pub fn unlisten_messages(&self, id: ListenerId) -> bool {
        self.registry.lock().deregister_message_listener(id)
    }

    pub fn unlisten_data(&self, id: ListenerId) -> bool {
        self.registry.lock().deregister_data_listener(id)
    }

    /// Send to every connected node. Without an attached context this is a successful no-op.
    pub async fn send_message(&self, map: &DynamicMap) -> Result<SendReport, BridgeError> {
        let Some(attached) = self.context.current() else {
            debug!("no host context; message not sent");
            return Ok(SendReport::default());
        };
        Ok(attached.relay.send_message(map).await?)
    }

    /// Start sending to every connected node without waiting for peers to answer.
    pub async fn dispatch_message(&self, map: &DynamicMap) -> Result<PendingSend, BridgeError> {
        let Some(attached) = self.context.current() else {
            debug!("no host context; message not sent");
            return Ok(PendingSend::default());
        };
        let payload = Payload::from_dynamic(map);
        Ok(attached.relay.dispatch_payload(&payload).await?)
    }

    /// Write a data item and publish it without waiting for peers.
    pub fn set_data(&self, path: &str, map: &DynamicMap) -> Result<DataItem, BridgeError> {
        let attached = self.context.current().ok_or(BridgeError::NotAttached)?;
        Ok(self.store.lock().set_data(path, map, &attached.data_layer)?)
    }

    pub fn delete_data(&self, path: &str) -> Result<bool, BridgeError> {
        let attached = self.context.current().ok_or(BridgeError::NotAttached)?;
        Ok(self.store.lock().delete_data(path, &attached.data_layer)?)
    }

    /// Latest local write for `path`.
    pub fn data_item(&self, path: &str) -> Option<DataItem> {
        self.store.lock().get(path).cloned()
    }

    /// Inbound bytes from `source` on `channel`. Returns the number of events delivered.
    pub fn on_message_received(&self, source: &NodeId, channel: &str, bytes: &[u8]) -> usize {
        let delivered = self.context.with_attached(|attached| {
            let listeners = self.registry.lock().message_listeners().to_vec();
            relay::deliver_inbound(channel, bytes, &listeners, attached.sink.as_ref())
        });
        match delivered {
            Some(n) => {
                debug!(source = %source, channel, listeners = n, "message received");
                n
            }
            None => {
                debug!(source = %source, "no host context; dropping message");
                0
            }
        }
    }

    /// Inbound data layer events. Returns the number of events delivered.
    pub fn on_data_changed(&self, events: &[DataEvent]) -> usize {
        self.context
            .with_attached(|attached| {
                let listeners = self.registry.lock().data_listeners().to_vec();
                data::fan_out_changes(events, &listeners, attached.sink.as_ref())
            })
            .unwrap_or_else(|| {
                debug!(count = events.len(), "no host context; dropping data events");
                0
            })
    }

    /// Dispatch one application call.
    pub async fn handle_method_call(&self, call: &MethodCall) -> MethodResult {
        debug!(method = %call.method, "method call");
        let outcome = match call.method.as_str() {
            method::GET_PLATFORM_VERSION => {
                Ok(Dynamic::String(self.config.platform_version.clone()))
            }
            method::SEND_MESSAGE => match map_argument(&call.arguments) {
                Ok(map) => self.dispatch_message(map).await.map(|_| Dynamic::Null),
                Err(e) => Err(e),
            },
            method::SET_DATA => set_data_arguments(&call.arguments)
                .and_then(|(path, map)| self.set_data(path, map))
                .map(|_| Dynamic::Null),
            method::DELETE_DATA => string_argument(&call.arguments)
                .and_then(|path| self.delete_data(path))
                .map(Dynamic::Bool),
            method::LISTEN_MESSAGES => listener_argument(&call.arguments).map(|id| {
                self.listen_messages(id);
                Dynamic::Null
            }),
            method::LISTEN_DATA => listener_argument(&call.arguments).map(|id| {
                self.listen_data(id);
                Dynamic::Null
            }),
            method::UNLISTEN_MESSAGES => listener_argument(&call.arguments)
                .map(|id| Dynamic::Bool(self.unlisten_messages(id))),
            method::UNLISTEN_DATA => {
                listener_argument(&call.arguments).map(|id| Dynamic::Bool(self.unlisten_data(id)))
            }
            _ => return MethodResult::NotImplemented,
        };
        match outcome {
            Ok(value) => MethodResult::Success(value),
            Err(e) => {
                warn!(method = %call.method, error = %e, "method call failed");
                e.into()
            }
        }
    }
}

fn map_argument(args: &Dynamic) -> Result<&DynamicMap, BridgeError> {
    args.as_map().ok_or_else(|| {
        BridgeError::InvalidArgument(format!("expected a map, got {}", args.type_name()))
    })
}

fn string_argument(args: &Dynamic) -> Result<&str, BridgeError> {
    args.as_str().ok_or_else(|| {
        BridgeError::InvalidArgument(format!("expected a string, got {}", args.type_name()))
    })
}

fn listener_argument(args: &Dynamic) -> Result<ListenerId, BridgeError> {
    args.as_i64().map(ListenerId).ok_or_else(|| {
        BridgeError::InvalidArgument(format!(
            "expected an integer listener id, got {}",
            args.type_name()
        ))
    })
}

fn set_data_arguments(args: &Dynamic) -> Result<(&str, &DynamicMap), BridgeError> {
    let map = map_argument(args)?;
    let path = map
        .get("path")
        .and_then(Dynamic::as_str)
        .ok_or_else(|| BridgeError::InvalidArgument("setData needs a string \"path\"".into()))?;
    let data = map
        .get("data")
        .and_then(Dynamic::as_map)
        .ok_or_else(|| BridgeError::InvalidArgument("setData needs a map \"data\"".into()))?;
    Ok((path, data))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec;
    use crate::host::{Event, EventQueue};
    use crate::protocol::MESSAGE_CHANNEL;
    use crate::testutil::{DataOp, MockDataLayer, MockDiscovery, MockTransport};
    use crate::value::Value;

    struct Harness {
        bridge: WearableBridge,
        sink: Arc<EventQueue>,
        transport: Arc<MockTransport>,
        ops: tokio::sync::mpsc::UnboundedReceiver<DataOp>,
        guard: AttachGuard,
    }

    fn harness(nodes: &[&str]) -> Harness {
        harness_with(nodes, MockTransport::new())
    }

    fn harness_with(nodes: &[&str], transport: MockTransport) -> Harness {
        let bridge = WearableBridge::new(BridgeConfig {
            platform_version: "test 1".into(),
        });
        let sink = Arc::new(EventQueue::new());
        let transport = Arc::new(transport);
        let (layer, ops) = MockDataLayer::new();
        let guard = bridge.attach(HostContext {
            discovery: Arc::new(MockDiscovery::with_nodes(nodes)),
            transport: transport.clone(),
            data_layer: Arc::new(layer),
            sink: sink.clone(),
        });
        Harness {
            bridge,
            sink,
            transport,
            ops,
            guard,
        }
    }

    fn call(method: &str, json: serde_json::Value) -> MethodCall {
        MethodCall::new(method, Dynamic::from(json))
    }

    #[tokio::test]
    async fn listen_twice_delivers_twice() {
        let h = harness(&[]);
        for _ in 0..2 {
            let r = h
                .bridge
                .handle_method_call(&call("listenMessages", serde_json::json!(5)))
                .await;
            assert_eq!(r, MethodResult::Success(Dynamic::Null));
        }
        let n = h.bridge.on_message_received(
            &NodeId::new("watch"),
            MESSAGE_CHANNEL,
            br#"{"x":{"int64":1}}"#,
        );
        assert_eq!(n, 2);
        let events = h.sink.drain();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.listener() == ListenerId(5)));
    }

    #[tokio::test]
    async fn send_message_reaches_connected_nodes() {
        let h = harness(&["w1", "w2"]);
        let r = h
            .bridge
            .handle_method_call(&call("sendMessage", serde_json::json!({"x": 1})))
            .await;
        assert_eq!(r, MethodResult::Success(Dynamic::Null));
        // Sends finish in the background.
        let mut sent = h.transport.sent();
        for _ in 0..100 {
            if sent.len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            sent = h.transport.sent();
        }
        assert_eq!(sent.len(), 2);
        let payload = codec::decode(&sent[0].2).unwrap();
        assert_eq!(payload.get("x"), Some(&Value::Int64(1)));
    }

    #[tokio::test]
    async fn unresponsive_peer_does_not_hold_up_calls() {
        let h = harness_with(&["gone", "w1"], MockTransport::stalled_for(&["gone"]));
        let quick = std::time::Duration::from_millis(500);
        let r = tokio::time::timeout(
            quick,
            h.bridge
                .handle_method_call(&call("sendMessage", serde_json::json!({"x": 1}))),
        )
        .await
        .expect("sendMessage waited on the stalled peer");
        assert_eq!(r, MethodResult::Success(Dynamic::Null));

        let r = tokio::time::timeout(
            quick,
            h.bridge
                .handle_method_call(&call("listenMessages", serde_json::json!(1))),
        )
        .await
        .expect("listenMessages was held up");
        assert_eq!(r, MethodResult::Success(Dynamic::Null));
    }

    #[tokio::test]
    async fn send_message_without_context_succeeds_quietly() {
        let h = harness(&["w1"]);
        h.guard.release();
        let r = h
            .bridge
            .handle_method_call(&call("sendMessage", serde_json::json!({"x": 1})))
            .await;
        assert_eq!(r, MethodResult::Success(Dynamic::Null));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn set_data_round_trip_to_listeners() {
        let mut h = harness(&[]);
        h.bridge.listen_data(ListenerId(1));
        h.bridge.listen_data(ListenerId(2));
        let r = h
            .bridge
            .handle_method_call(&call(
                "setData",
                serde_json::json!({"path": "/steps", "data": {"today": 9000, "goal": [1, 2]}}),
            ))
            .await;
        assert_eq!(r, MethodResult::Success(Dynamic::Null));

        let DataOp::Put(item) = h.ops.recv().await.unwrap() else {
            panic!("expected put");
        };
        assert_eq!(item.path, "/steps");
        assert_eq!(h.bridge.data_item("/steps"), Some(item.clone()));

        // The same item arriving from a peer fans out to both data listeners.
        let n = h.bridge.on_data_changed(&[
            DataEvent::changed(item),
            DataEvent::deleted("/steps"),
        ]);
        assert_eq!(n, 2);
        let events = h.sink.drain();
        let Event::DataChanged { args, .. } = &events[0] else {
            panic!("expected DataChanged");
        };
        assert_eq!(args.get("today"), Some(&Value::Int64(9000)));
        assert_eq!(args.get("goal"), Some(&Value::Int64Array(vec![1, 2])));
    }

    #[tokio::test]
    async fn set_data_errors_are_structured() {
        let h = harness(&[]);
        let r = h
            .bridge
            .handle_method_call(&call("setData", serde_json::json!({"data": {}})))
            .await;
        assert!(matches!(r, MethodResult::Error { ref code, .. } if code == "INVALID_ARGUMENT"));

        let r = h
            .bridge
            .handle_method_call(&call(
                "setData",
                serde_json::json!({"path": "steps", "data": {}}),
            ))
            .await;
        assert!(matches!(r, MethodResult::Error { ref code, .. } if code == "INVALID_PATH"));

        h.guard.release();
        let r = h
            .bridge
            .handle_method_call(&call(
                "setData",
                serde_json::json!({"path": "/steps", "data": {}}),
            ))
            .await;
        assert!(matches!(r, MethodResult::Error { ref code, .. } if code == "NOT_ATTACHED"));
    }

    #[tokio::test]
    async fn discovery_failure_is_reported_with_code() {
        let bridge = WearableBridge::new(BridgeConfig::default());
        let (layer, _ops) = MockDataLayer::new();
        let _guard = bridge.attach(HostContext {
            discovery: Arc::new(MockDiscovery::failing(crate::error::DiscoveryError(
                "unavailable".into(),
            ))),
            transport: Arc::new(MockTransport::new()),
            data_layer: Arc::new(layer),
            sink: Arc::new(EventQueue::new()),
        });
        let r = bridge
            .handle_method_call(&call("sendMessage", serde_json::json!({})))
            .await;
        assert!(matches!(r, MethodResult::Error { ref code, .. } if code == "DISCOVERY_FAILED"));
    }

    #[tokio::test]
    async fn detached_bridge_drops_inbound() {
        let h = harness(&[]);
        h.bridge.listen_messages(ListenerId(1));
        h.bridge.listen_data(ListenerId(1));
        assert!(h.bridge.detach());
        let n = h.bridge.on_message_received(&NodeId::new("w"), MESSAGE_CHANNEL, b"{}");
        assert_eq!(n, 0);
        let item = DataItem {
            path: "/steps".into(),
            version: 1,
            data: br#"{"today":{"int64":9000}}"#.to_vec(),
        };
        assert_eq!(h.bridge.on_data_changed(&[DataEvent::changed(item)]), 0);
        assert!(h.sink.is_empty());
        drop(h.guard);
    }

    #[tokio::test]
    async fn misc_methods() {
        let h = harness(&[]);
        assert_eq!(
            h.bridge
                .handle_method_call(&call("getPlatformVersion", serde_json::Value::Null))
                .await,
            MethodResult::Success(Dynamic::String("test 1".into()))
        );
        assert_eq!(
            h.bridge
                .handle_method_call(&call("reboot", serde_json::Value::Null))
                .await,
            MethodResult::NotImplemented
        );
        let r = h
            .bridge
            .handle_method_call(&call("listenData", serde_json::json!("seven")))
            .await;
        assert!(matches!(r, MethodResult::Error { ref code, .. } if code == "INVALID_ARGUMENT"));
        h.bridge.listen_data(ListenerId(7));
        assert_eq!(
            h.bridge
                .handle_method_call(&call("unlistenData", serde_json::json!(7)))
                .await,
            MethodResult::Success(Dynamic::Bool(true))
        );
    }

    #[test]
    fn method_call_from_json() {
        let c = MethodCall::from_json(serde_json::json!({"method": "listenData", "arguments": 3}))
            .unwrap();
        assert_eq!(c.method, "listenData");
        assert_eq!(c.arguments, Dynamic::Int(3));
        let c = MethodCall::from_json(serde_json::json!({"method": "getPlatformVersion"})).unwrap();
        assert_eq!(c.arguments, Dynamic::Null);
        assert!(MethodCall::from_json(serde_json::json!([1])).is_err());
        assert!(MethodCall::from_json(serde_json::json!({"arguments": 1})).is_err());
    }
}
