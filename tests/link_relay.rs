use serde_json::json;
use std::sync::{Arc, Mutex};
use wireflow::{
    registry::node_factory,
    runtime::{
        link::{LINK_IN, LINK_OUT},
        FlowConfig, Message, NodeConfig, NodeContext, NodeHandler, Runtime, EVENT_FIELD,
    },
};

type Captured = Arc<Mutex<Vec<Message>>>;

struct Capture(Captured);

impl NodeHandler for Capture {
    fn on_input(&self, msg: Message, _ctx: &NodeContext) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(msg);
        Ok(())
    }
}

fn runtime_with_capture() -> (Runtime, Captured) {
    let runtime = Runtime::new(true).unwrap();
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    runtime
        .registry()
        .register_type(
            "capture",
            node_factory(move |_, _| Ok(Box::new(Capture(Arc::clone(&sink))) as Box<dyn NodeHandler>)),
        )
        .unwrap();
    (runtime, captured)
}

fn flow(id: &str, nodes: Vec<NodeConfig>) -> FlowConfig {
    FlowConfig {
        id: id.to_string(),
        label: String::new(),
        env: vec![],
        groups: vec![],
        nodes,
    }
}

#[test]
fn link_out_reaches_link_in_with_provenance() {
    let (runtime, captured) = runtime_with_capture();
    let deployed = runtime
        .deploy(flow(
            "f1",
            vec![
                NodeConfig::new("out1", LINK_OUT).with_prop("links", json!(["n42"])),
                NodeConfig::new("n42", LINK_IN).with_wires(0, ["sink"]),
                NodeConfig::new("sink", "capture"),
            ],
        ))
        .unwrap();

    let mut msg = Message::new(json!(1));
    msg.set("topic", "demo");
    deployed.receive("out1", msg);

    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].payload(), Some(&json!(1)));
    assert_eq!(captured[0].get("topic"), Some(&json!("demo")));
    assert_eq!(captured[0].get(EVENT_FIELD), Some(&json!("node:out1")));
}

#[test]
fn links_cross_flows_and_direct_wires_stay_unstamped() {
    let (runtime, captured) = runtime_with_capture();
    runtime
        .deploy(flow(
            "receiver",
            vec![
                NodeConfig::new("n42", LINK_IN).with_wires(0, ["sink"]),
                NodeConfig::new("sink", "capture"),
            ],
        ))
        .unwrap();
    let sender = runtime
        .deploy(flow(
            "sender",
            vec![
                NodeConfig::new("out1", LINK_OUT)
                    .with_prop("links", json!(["n42"]))
                    .with_wires(0, ["direct"]),
                NodeConfig::new("direct", "capture"),
            ],
        ))
        .unwrap();

    sender.receive("out1", Message::new(json!("hello")));

    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 2);
    // bus delivery is synchronous, so the linked copy lands first
    assert_eq!(captured[0].get(EVENT_FIELD), Some(&json!("node:out1")));
    assert_eq!(captured[1].get(EVENT_FIELD), None);
    assert_eq!(captured[1].payload(), Some(&json!("hello")));
}

#[test]
fn missing_target_is_a_silent_no_op() {
    let (runtime, captured) = runtime_with_capture();
    let deployed = runtime
        .deploy(flow(
            "f1",
            vec![NodeConfig::new("out1", LINK_OUT).with_prop("links", json!(["nobody"]))],
        ))
        .unwrap();

    deployed.receive("out1", Message::new(json!(1)));
    assert!(captured.lock().unwrap().is_empty());
}

#[test]
fn stopped_link_in_no_longer_receives() {
    let (runtime, captured) = runtime_with_capture();
    runtime
        .deploy(flow(
            "receiver",
            vec![
                NodeConfig::new("n42", LINK_IN).with_wires(0, ["sink"]),
                NodeConfig::new("sink", "capture"),
            ],
        ))
        .unwrap();
    let sender = runtime
        .deploy(flow(
            "sender",
            vec![NodeConfig::new("out1", LINK_OUT).with_prop("links", json!(["n42"]))],
        ))
        .unwrap();

    assert!(runtime.stop_flow("receiver"));
    sender.receive("out1", Message::new(json!(1)));

    assert!(captured.lock().unwrap().is_empty());
    assert_eq!(runtime.bus().listener_count("node:n42"), 0);
}
