//! Selection over a registry populated from configuration and live catalogues.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mockable::DefaultClock;
use rstest::{fixture, rstest};
use serde_json::{Map, Value, json};
use toolscope::config::OrchestratorConfig;
use toolscope::selection::{
    QueryCache, ScoredTool, ScoringWeights, SelectionContext, SelectionOptions, ServerDomain,
    ToolSelector, select_tools_for_prompt,
};
use toolscope::server_registry::{
    adapters::{LocalModuleRegistry, LocalTool, TransportRouter},
    domain::{ServerId, ServerInput, ServerStatus, ToolDefinition},
    services::{ConnectionManager, ConnectionSettings, ServerRegistry},
};

type TestRegistry = ServerRegistry<DefaultClock>;

struct TestContext {
    registry: TestRegistry,
    manager: ConnectionManager<DefaultClock>,
}

#[fixture]
fn context() -> TestContext {
    let registry = ServerRegistry::new(Arc::new(DefaultClock));
    let router = TransportRouter::new(workspace_modules());
    let settings = ConnectionSettings {
        health_checks_enabled: false,
        ..ConnectionSettings::default()
    };
    let manager = ConnectionManager::new(registry.clone(), Arc::new(router), settings)
        .expect("manager should subscribe");
    TestContext { registry, manager }
}

fn tool(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition::new(name, json!({"type": "object"}))
        .expect("valid tool")
        .with_description(description)
}

fn echo_tool(name: &str, description: &str) -> LocalTool {
    let tool_name = name.to_owned();
    LocalTool::new(tool(name, description), move |arguments| {
        let called = tool_name.clone();
        async move { Ok(json!({ "tool": called, "arguments": Value::Object(arguments) })) }
    })
}

fn workspace_modules() -> LocalModuleRegistry {
    let modules = LocalModuleRegistry::new();
    modules
        .register("fs", |_export| {
            Ok(vec![
                echo_tool("read_file", "Read the contents of a file"),
                echo_tool("list_directory", "List the entries of a directory"),
            ])
        })
        .expect("fs module should register");
    modules
        .register("gh", |_export| {
            Ok(vec![echo_tool("create_issue", "Open a new issue in a repository")])
        })
        .expect("gh module should register");
    modules
}

fn local_server(module: &str, domain: &str) -> ServerInput {
    ServerInput {
        transport: "local".to_owned(),
        module: Some(module.to_owned()),
        domain: Some(domain.to_owned()),
        ..ServerInput::default()
    }
}

fn workspace_servers() -> BTreeMap<String, ServerInput> {
    BTreeMap::from([
        ("fs".to_owned(), local_server("fs", "files")),
        ("gh".to_owned(), local_server("gh", "vcs")),
    ])
}

fn server_id(value: &str) -> ServerId {
    ServerId::new(value).expect("valid server id")
}

fn names(selected: &[ScoredTool]) -> Vec<&str> {
    selected.iter().map(|scored| scored.tool.name()).collect()
}

async fn connect_workspace(context: &TestContext) {
    context
        .registry
        .apply_config(&workspace_servers())
        .expect("config should apply");
    for id in ["fs", "gh"] {
        context
            .manager
            .get_client(&server_id(id))
            .await
            .expect("local server should connect");
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn file_prompt_ranks_file_tools_first(context: TestContext) {
    connect_workspace(&context).await;

    let snapshot = context.registry.list().expect("snapshot");
    let selected = select_tools_for_prompt(
        &snapshot,
        &SelectionContext::new("read the file content"),
        &SelectionOptions::default(),
    );

    let ranked = names(&selected);
    assert_eq!(ranked.first().copied(), Some("read_file"));
    let read_position = ranked.iter().position(|name| *name == "read_file");
    if let Some(issue_position) = ranked.iter().position(|name| *name == "create_issue") {
        assert!(read_position < Some(issue_position));
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn high_threshold_with_vague_prompt_selects_nothing(context: TestContext) {
    connect_workspace(&context).await;

    let snapshot = context.registry.list().expect("snapshot");
    let selected = select_tools_for_prompt(
        &snapshot,
        &SelectionContext::new("hello there"),
        &SelectionOptions::default().with_min_score(0.9),
    );

    assert!(selected.is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn excluded_domain_never_contributes(context: TestContext) {
    connect_workspace(&context).await;

    let snapshot = context.registry.list().expect("snapshot");
    let selected = select_tools_for_prompt(
        &snapshot,
        &SelectionContext::new("read the file and open an issue")
            .with_exclude_domains([ServerDomain::Files]),
        &SelectionOptions::default(),
    );

    assert!(
        selected
            .iter()
            .all(|scored| scored.server_id != server_id("fs"))
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn errored_server_is_left_out_of_selection(context: TestContext) {
    connect_workspace(&context).await;
    context
        .registry
        .set_status(&server_id("fs"), ServerStatus::Error("lost".to_owned()))
        .expect("status update");

    let snapshot = context.registry.list().expect("snapshot");
    let selected = select_tools_for_prompt(
        &snapshot,
        &SelectionContext::new("read the file content"),
        &SelectionOptions::default().with_min_score(0.0),
    );

    assert!(!names(&selected).contains(&"read_file"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn selected_tool_can_be_invoked(context: TestContext) {
    connect_workspace(&context).await;
    let snapshot = context.registry.list().expect("snapshot");
    let selected = select_tools_for_prompt(
        &snapshot,
        &SelectionContext::new("read the file content"),
        &SelectionOptions::default(),
    );
    let top = selected.first().expect("a tool should be selected");

    let mut arguments = Map::new();
    arguments.insert("path".to_owned(), json!("README.md"));
    let outcome = context
        .manager
        .call_tool(&top.server_id, top.tool.name(), arguments)
        .await;

    assert!(!outcome.is_error);
    assert_eq!(
        outcome.content,
        json!({ "tool": "read_file", "arguments": { "path": "README.md" } })
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cache_keeps_only_the_most_recent_queries(context: TestContext) {
    connect_workspace(&context).await;
    let selector = ToolSelector::new(ScoringWeights::default(), SelectionOptions::default())
        .with_cache(QueryCache::new(2, Duration::from_secs(60)));
    let snapshot = context.registry.list().expect("snapshot");

    for prompt in ["read the file", "list the directory", "open an issue"] {
        drop(selector.select(&snapshot, &SelectionContext::new(prompt)));
    }
    drop(selector.select(&snapshot, &SelectionContext::new("read the file")));

    let stats = selector.cache().expect("cache attached").stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 4);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn registry_changes_clear_the_cache(context: TestContext) {
    connect_workspace(&context).await;
    let config = OrchestratorConfig::from_json_str(r#"{"selection": {"cache": {"maxSize": 8}}}"#)
        .expect("valid config");
    let selector = config.selection.selector();
    let _watch = selector
        .watch_registry(&context.registry)
        .expect("subscription")
        .expect("selector has a cache");

    let warm = selector
        .select_from_registry(&context.registry, &SelectionContext::new("read the file"))
        .expect("selection");
    assert!(!warm.is_empty());
    assert_eq!(selector.cache().map(QueryCache::len), Some(1));

    context
        .registry
        .set_tools(&server_id("gh"), vec![tool("merge_pull_request", "Merge a pull request")])
        .expect("tool update");

    assert_eq!(selector.cache().map(QueryCache::len), Some(0));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn removed_server_drops_out_and_disconnects(context: TestContext) {
    connect_workspace(&context).await;
    let mut remaining = workspace_servers();
    remaining.remove("fs");

    let report = context
        .registry
        .apply_config(&remaining)
        .expect("config should apply");

    assert_eq!(report.removed, vec![server_id("fs")]);
    let snapshot = context.registry.list().expect("snapshot");
    let selected = select_tools_for_prompt(
        &snapshot,
        &SelectionContext::new("read the file content"),
        &SelectionOptions::default().with_min_score(0.0),
    );
    assert!(!names(&selected).contains(&"read_file"));

    for _ in 0..50 {
        if !context.manager.is_connected(&server_id("fs")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!context.manager.is_connected(&server_id("fs")));
}
