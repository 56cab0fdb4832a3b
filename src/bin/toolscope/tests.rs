//! Unit tests for the selection CLI helpers.

use super::{load_catalog, write_ranking};
use mockable::DefaultClock;
use rstest::{fixture, rstest};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use toolscope::selection::ScoredTool;
use toolscope::server_registry::{
    domain::{ServerConfig, ServerId, ServerTransport, ToolDefinition},
    services::ServerRegistry,
};

#[fixture]
fn registry() -> ServerRegistry<DefaultClock> {
    let registry = ServerRegistry::new(Arc::new(DefaultClock));
    let transport = ServerTransport::local("fs").expect("valid transport");
    registry
        .add(ServerConfig::new(server_id("fs"), transport))
        .expect("server add");
    registry
}

fn server_id(value: &str) -> ServerId {
    ServerId::new(value).expect("valid server id")
}

fn tool(name: &str) -> ToolDefinition {
    ToolDefinition::new(name, json!({"type": "object"})).expect("valid tool")
}

fn render(selected: &[ScoredTool]) -> String {
    let mut out = Vec::new();
    write_ranking(&mut out, selected).expect("write to buffer");
    String::from_utf8(out).expect("utf-8 output")
}

#[test]
fn empty_ranking_says_nothing_matched() {
    assert_eq!(render(&[]), "no tools matched\n");
}

#[test]
fn ranking_lines_carry_score_owner_and_reasons() {
    let selected = vec![ScoredTool {
        tool: tool("read_file"),
        server_id: server_id("fs"),
        score: 0.75,
        reasons: vec!["exact keyword: file".to_owned(), "domain: files".to_owned()],
    }];

    assert_eq!(
        render(&selected),
        "0.750  fs/read_file  exact keyword: file; domain: files\n"
    );
}

#[rstest]
fn catalogue_skips_unknown_and_invalid_ids(registry: ServerRegistry<DefaultClock>) {
    let catalog = BTreeMap::from([
        ("fs".to_owned(), vec![tool("read_file")]),
        ("ghost".to_owned(), vec![tool("haunt")]),
        ("   ".to_owned(), vec![tool("nothing")]),
    ]);

    load_catalog(&registry, catalog).expect("catalogue should load");

    let state = registry
        .get(&server_id("fs"))
        .expect("lookup")
        .expect("server exists");
    assert_eq!(state.tools().map(<[ToolDefinition]>::len), Some(1));
    assert_eq!(registry.ids().expect("ids"), vec![server_id("fs")]);
}
