// Property tests for response classification

use bearer_client::{classify, ErrorKind};
use proptest::prelude::*;
use serde_json::{json, Value};

fn arb_body() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(json!({})),
        Just(Value::Null),
        ".*".prop_map(|m| json!({ "message": m })),
        ("[a-z]{1,8}", ".+").prop_map(|(field, m)| json!({ "errors": { field: [m] } })),
        ("[a-z]{1,8}").prop_map(|field| json!({ "errors": { field: [] } })),
        any::<i64>().prop_map(|n| json!({ "message": n })),
    ]
}

proptest! {
    #[test]
    fn only_unauthorized_is_retryable(status in 400u16..600, body in arb_body()) {
        let err = classify(status, &body);
        prop_assert_eq!(err.retryable, status == 401);
        prop_assert_eq!(err.kind == ErrorKind::AuthExpired, status == 401);
    }

    #[test]
    fn known_statuses_map_to_their_kind(body in arb_body()) {
        prop_assert_eq!(classify(422, &body).kind, ErrorKind::Validation);
        prop_assert_eq!(classify(500, &body).kind, ErrorKind::Server);
    }

    #[test]
    fn other_statuses_are_unknown(status in 400u16..600, body in arb_body()) {
        prop_assume!(![401, 422, 500].contains(&status));
        let err = classify(status, &body);
        prop_assert_eq!(err.kind, ErrorKind::Unknown);
        prop_assert!(!err.kind.is_session_ending());
    }

    #[test]
    fn fallback_messages_are_never_empty(status in 400u16..600) {
        let err = classify(status, &json!({}));
        prop_assert!(!err.message.is_empty());
    }
}
