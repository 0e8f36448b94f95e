// tests/property/decoding_test.rs

//! Property-based tests for line decoding
//! Tests that status, property and change lines decode to the fields they were built from

use mprotocol_client::core::protocol::{DecodedLine, Payload, decode_line};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_status_lines(code in 0u8..10, message in "[ -~]{0,60}") {
        match decode_line(&format!("E{code}:{message}")) {
            DecodedLine::Result(result) => {
                prop_assert_eq!(result.code(), code);
                prop_assert_eq!(result.message(), message.as_str());
                prop_assert_eq!(result.is_ok(), code == 0);
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn test_property_lines(
        writable in any::<bool>(),
        kind in "[a-z]{1,8}",
        name in "[a-zA-Z_][a-zA-Z0-9_]{0,15}",
        value in "[^=\r\n]{0,30}",
    ) {
        let prefix = if writable { "PW_" } else { "P_" };
        match decode_line(&format!("{prefix}{kind} {name}={value}")) {
            DecodedLine::Result(result) => {
                prop_assert_eq!(result.payload(), &Payload::Property { kind, value });
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn test_change_lines(
        segments in prop::collection::vec("[a-z0-9_]{1,8}", 1..5),
        property in "[a-z0-9_]{1,8}",
        value in "[ -~]{0,30}",
    ) {
        let node_path = format!("/{}", segments.join("/"));
        match decode_line(&format!("CHG {node_path}.{property}={value}")) {
            DecodedLine::Change(change) => {
                prop_assert_eq!(change.node_path, node_path);
                prop_assert_eq!(change.property, property);
                prop_assert_eq!(change.value, value);
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn test_any_line_decodes_without_panicking(line in "\\PC{0,80}") {
        let _ = decode_line(&line);
    }
}
