fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use relay_protocol::{ClientInfo, ClientRole, Frame, FrameError};

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Decodes a fixture, re-encodes it, and compares the JSON values
    /// (key order independent). Returns the decoded frame.
    fn roundtrip_test(name: &str) -> Frame {
        let raw = load_fixture(name);
        let fixture: serde_json::Value = serde_json::from_str(&raw)
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"));
        let frame =
            Frame::decode(&raw).unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        let encoded = frame
            .encode()
            .unwrap_or_else(|e| panic!("failed to encode {name}: {e}"));
        let reserialized: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  encoded: {reserialized}"
        );
        frame
    }

    #[test]
    fn fixture_announce() {
        assert_eq!(
            roundtrip_test("announce.json"),
            Frame::announce("editor-3f2a", None)
        );
    }

    #[test]
    fn fixture_announce_with_role() {
        assert_eq!(
            roundtrip_test("announce_with_role.json"),
            Frame::announce("build-bot", Some(ClientRole::Dispatcher))
        );
    }

    #[test]
    fn fixture_message_outbound() {
        // Clients send no messageId; the broker assigns one.
        assert_eq!(
            roundtrip_test("message_outbound.json"),
            Frame::outbound(r#"{"cmd":"reload"}"#)
        );
    }

    #[test]
    fn fixture_message() {
        assert_eq!(roundtrip_test("message.json"), Frame::message("hello", "42"));
    }

    #[test]
    fn fixture_ack() {
        assert_eq!(roundtrip_test("ack.json"), Frame::ack("42"));
    }

    #[test]
    fn fixture_client_list() {
        assert_eq!(
            roundtrip_test("client_list.json"),
            Frame::client_list(vec![
                ClientInfo::new("dispatcher-1", ClientRole::Dispatcher),
                ClientInfo::new("editor-3f2a", ClientRole::Host),
            ])
        );
    }

    #[test]
    fn unknown_role_is_rejected() {
        let raw = r#"{"type":"announce","id":"x","role":"observer"}"#;
        assert!(matches!(Frame::decode(raw), Err(FrameError::Decode(_))));
    }

    #[test]
    fn unknown_type_is_reported() {
        let raw = r#"{"type":"heartbeat"}"#;
        assert!(matches!(
            Frame::decode(raw),
            Err(FrameError::UnknownType(t)) if t == "heartbeat"
        ));
    }

    #[test]
    fn every_fixture_is_covered() {
        let mut names: Vec<String> = fs::read_dir(fixtures_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            [
                "ack.json",
                "announce.json",
                "announce_with_role.json",
                "client_list.json",
                "message.json",
                "message_outbound.json",
            ]
        );
    }
}
