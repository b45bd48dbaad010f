use error_tracker::builder::{CIRCULAR_REFERENCE_PLACEHOLDER, EventBuilderConfig};
use error_tracker::domain::{StackFrame, metadata};
use error_tracker::{EventBuilder, EventLevel, Fault, StructuredFault, Value, safe_stringify};
use std::fmt;

#[derive(Debug)]
struct CheckoutError {
    order: u32,
    source: std::num::ParseIntError,
}

impl fmt::Display for CheckoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "checkout failed for order {}", self.order)
    }
}

impl std::error::Error for CheckoutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

fn builder() -> EventBuilder {
    EventBuilder::new(EventBuilderConfig {
        app: Some("shop".to_string()),
        version: Some("3.0.0".to_string()),
        platform: Some("linux".to_string()),
        device: Some("till-2".to_string()),
    })
}

fn wire(event: &error_tracker::Event) -> serde_json::Value {
    serde_json::from_str(&builder().stringify(event).unwrap()).unwrap()
}

#[test]
fn test_rust_error_with_cause_chain() {
    let err = CheckoutError {
        order: 991,
        source: "x".parse::<u32>().unwrap_err(),
    };
    let fault = Fault::from_error(&err);

    let event = builder()
        .build("checkout failed for order 991", &fault, EventLevel::Error, None)
        .unwrap();
    let json = wire(&event);

    assert_eq!(json["event"]["name"], "CheckoutError");
    assert_eq!(json["event"]["message"], "checkout failed for order 991");
    assert_eq!(json["event"]["extra"]["cause"]["name"], "ParseIntError");
    assert_eq!(json["context"]["culprit"], "CheckoutError");
    assert_eq!(json["context"]["tags"], serde_json::json!(["error:CheckoutError"]));
    assert_eq!(json["context"]["app"], "shop");
    assert_eq!(json["context"]["version"], "3.0.0");
    assert_eq!(json["context"]["platform"], "linux");
    assert_eq!(json["context"]["device"], "till-2");
}

#[test]
fn test_culprit_prefers_first_stack_frame() {
    let fault = StructuredFault::new("TypeError", "x is undefined")
        .with_frames(vec![
            StackFrame::new("shop::cart::total").at("src/cart.rs", 10),
            StackFrame::new("shop::main"),
        ])
        .with_code("ECART");

    let event = builder()
        .build("x is undefined", &fault.into(), EventLevel::Error, None)
        .unwrap();

    assert_eq!(event.context.culprit, "shop::cart::total");
    assert_eq!(event.context.tags, vec!["error:TypeError", "code:ECART"]);
}

#[test]
fn test_culprit_from_textual_stack() {
    let stack = "   0: std::backtrace::Backtrace::create
             at /rustc/abc/library/std/src/backtrace.rs:331:13
   1: shop::payments::charge::h00112233aabbccdd
             at ./src/payments.rs:88:5
   2: shop::main
             at ./src/main.rs:3:5";
    let fault = StructuredFault::new("ChargeError", "gateway refused").with_stack(stack);

    let event = builder()
        .build("gateway refused", &fault.into(), EventLevel::Error, None)
        .unwrap();

    assert_eq!(event.context.culprit, "shop::payments::charge");
    assert_eq!(event.event.stack.as_deref(), Some(stack));
}

#[test]
fn test_levels_serialize_uppercase() {
    for level in EventLevel::ALL {
        let event = builder()
            .build("t", &Fault::message_only("t"), level, None)
            .unwrap();
        assert_eq!(wire(&event)["level"], level.as_str());
    }
}

#[test]
fn test_self_referencing_metadata_serializes_finitely() {
    let user = Value::map();
    user.insert("name", "ada");
    user.insert("self", user.clone());

    let event = builder()
        .build(
            "cyclic",
            &Fault::message_only("cyclic"),
            EventLevel::Info,
            Some(metadata([("user", user)])),
        )
        .unwrap();

    let text = builder().stringify(&event).unwrap();

    assert_eq!(text.matches(CIRCULAR_REFERENCE_PLACEHOLDER).count(), 1);
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["context"]["extra"]["user"]["name"], "ada");
    assert_eq!(json["context"]["extra"]["user"]["self"], "[Circular]");
}

#[test]
fn test_cycle_through_a_child_list() {
    let parent = Value::map();
    let children = Value::list();
    let child = Value::map();
    child.insert("parent", parent.clone());
    children.push(child);
    parent.insert("children", children);

    let text = safe_stringify(&parent).unwrap();

    assert_eq!(text, r#"{"children":[{"parent":"[Circular]"}]}"#);
}

#[test]
fn test_unrepresentable_leaves_become_strings() {
    let extra = metadata([
        ("callback", Value::callable()),
        ("huge", Value::from(u64::MAX)),
        ("socket", Value::opaque("[Socket fd=3]")),
        ("ratio", Value::from(f64::INFINITY)),
        (
            "inner",
            Value::from(StructuredFault::new("Inner", "nested").with_stack("at inner")),
        ),
    ]);

    let event = builder()
        .build("leaves", &Fault::message_only("leaves"), EventLevel::Debug, Some(extra))
        .unwrap();
    let json = wire(&event);
    let extra = &json["context"]["extra"];

    assert_eq!(extra["callback"], "[Function]");
    assert_eq!(extra["huge"], u64::MAX.to_string());
    assert_eq!(extra["socket"], "[Socket fd=3]");
    assert_eq!(extra["ratio"], "inf");
    assert_eq!(
        extra["inner"],
        serde_json::json!({"name": "Inner", "message": "nested", "stack": "at inner"})
    );
}

#[test]
fn test_json_metadata_is_accepted() {
    let extra = metadata([(
        "request",
        Value::from(serde_json::json!({"path": "/pay", "status": 502})),
    )]);

    let event = builder()
        .build("bad gateway", &Fault::message_only("bad gateway"), EventLevel::Error, Some(extra))
        .unwrap();

    assert_eq!(wire(&event)["context"]["extra"]["request"]["status"], 502);
}
