use mcp_the_force::config::Settings;
use mcp_the_force::server::{Gateway, bootstrap};
use std::path::Path;

/// Build a gateway against a temp project dir with the mock adapter, so no
/// test touches the network.
pub fn mock_gateway(project_dir: &Path) -> Gateway {
    let settings = Settings {
        session_db_path: Some(project_dir.join(".force-test/sessions.sqlite3")),
        project_dir: Some(project_dir.to_path_buf()),
        adapter_mock: true,
        ..Default::default()
    };
    bootstrap(settings).expect("gateway bootstrap")
}

/// Parse the mock adapter's echoed JSON record out of a tool response.
#[allow(dead_code)]
pub fn mock_record(content: &str) -> serde_json::Value {
    serde_json::from_str(content).expect("mock adapter emits JSON")
}
