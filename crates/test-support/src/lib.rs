pub mod fixtures {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use board_xmpp::Stanza;

    pub fn root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tests")
            .join("fixtures")
    }

    pub fn path(relative: impl AsRef<Path>) -> PathBuf {
        root().join(relative.as_ref())
    }

    pub fn read(relative: impl AsRef<Path>) -> io::Result<String> {
        fs::read_to_string(path(relative))
    }

    pub fn stanza(name: &str) -> String {
        read_or_panic(Path::new("stanzas").join(name))
    }

    /// Loads and parses a stanza fixture.
    pub fn parsed_stanza(name: &str) -> Stanza {
        let xml = stanza(name);
        Stanza::parse(xml.as_bytes())
            .unwrap_or_else(|error| panic!("fixture {name} is not a valid stanza: {error}"))
    }

    pub fn config(name: &str) -> String {
        read_or_panic(Path::new("config").join(name))
    }

    fn read_or_panic(relative: impl AsRef<Path>) -> String {
        let relative = relative.as_ref();
        read(relative).unwrap_or_else(|error| {
            panic!(
                "failed to read fixture {}: {error}",
                relative.to_string_lossy()
            )
        })
    }
}

pub mod transport {
    pub use board_xmpp::testing::RecordingTransport;
}

#[cfg(test)]
mod tests {
    use board_xmpp::{
        ConnectEndpoint, StanzaTransport, TransportEvent, TransportStatus,
        transport_event_channel,
    };

    use super::{fixtures, transport::RecordingTransport};

    #[test]
    fn fixture_root_exists() {
        assert!(fixtures::root().is_dir());
    }

    #[test]
    fn loads_stanza_fixture() {
        let stanza = fixtures::stanza("groupchat-hello.xml");
        assert!(stanza.contains("<message"));
        assert_eq!(fixtures::parsed_stanza("groupchat-hello.xml").name(), "message");
    }

    #[test]
    fn loads_config_fixture() {
        let config = fixtures::config("full-config.toml");
        let parsed = board_core::config::load_config_from_str(&config)
            .expect("full-config.toml should be a valid configuration");
        assert_eq!(parsed.room.history_max_stanzas, Some(20));
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let parsed = board_core::config::load_config_from_str(&fixtures::config(
            "minimal-config.toml",
        ))
        .unwrap();
        assert_eq!(parsed.room.name, "test1");
        assert_eq!(parsed.reconnect.ceiling_ms, 30_000);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn recording_transport_forwards_events_to_latest_channel() {
        let transport = RecordingTransport::new();
        let mut session_side = transport.clone();
        assert!(!transport.deliver_status(TransportStatus::Connecting));

        let (events, mut receiver) = transport_event_channel();
        let endpoint = ConnectEndpoint {
            server: "wss://localhost".to_string(),
            domain: "localhost".to_string(),
            resource: None,
        };
        session_side.connect(&endpoint, events).await.unwrap();

        assert!(transport.deliver_status(TransportStatus::Disconnected));
        assert_eq!(
            receiver.recv().await,
            Some(TransportEvent::Status(TransportStatus::Disconnected))
        );
        assert_eq!(transport.endpoints(), vec![endpoint]);
    }
}
