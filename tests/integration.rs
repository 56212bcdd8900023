use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use uuid::Uuid;

/// Spawn the memory MCP server binary with given args.
async fn spawn_server(args: &[&str]) -> Result<ServerHandle> {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_memory-graph-mcp"));
    cmd.args(args)
        .env_remove("MEMORY_FILE_PATH")
        .env_remove("MEMORY_SAVE_POLICY")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit());

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().unwrap();
    let mut stdin = child.stdin.take().unwrap();

    let (tx_out, mut rx_out) = mpsc::channel::<serde_json::Value>(32);
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

    // Writer task
    tokio::spawn(async move {
        while let Some(msg) = rx_out.recv().await {
            if let Ok(line) = serde_json::to_string(&msg) {
                let _ = stdin.write_all(line.as_bytes()).await;
                let _ = stdin.write_all(b"\n").await;
                let _ = stdin.flush().await;
            }
        }
    });

    // Reader task
    {
        let pending = pending.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(&line)
                    && let Some(id) = v.get("id").and_then(|x| x.as_str())
                    && let Some(waiter) = pending.lock().await.remove(id)
                {
                    let _ = waiter.send(v);
                }
                // Notifications without id are ignored
            }
        });
    }

    Ok(ServerHandle {
        child,
        tx_out,
        pending,
    })
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>>;

struct ServerHandle {
    child: Child,
    tx_out: mpsc::Sender<serde_json::Value>,
    pending: PendingMap,
}

impl ServerHandle {
    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);
        self.tx_out
            .send(json!({"jsonrpc":"2.0","id":id,"method":method,"params":params}))
            .await?;
        let resp = rx.await?;
        Ok(resp)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.request(
            "tools/call",
            json!({
                "name": name,
                "arguments": arguments
            }),
        )
        .await
    }

    async fn notify(&self, method: &str, params: serde_json::Value) -> Result<()> {
        self.tx_out
            .send(json!({"jsonrpc":"2.0","method":method,"params":params}))
            .await?;
        Ok(())
    }

    async fn kill(mut self) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

async fn start_server_with_args(memory_file: &Path, extra: &[&str]) -> Result<ServerHandle> {
    let mut args: Vec<&str> = extra.to_vec();
    args.push("--memory-file");
    args.push(memory_file.to_str().unwrap());
    let srv = spawn_server(&args).await?;
    let _ = srv
        .request(
            "initialize",
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "1" }
            }),
        )
        .await?;
    srv.notify("notifications/initialized", json!({})).await?;
    Ok(srv)
}

async fn start_server(memory_file: &Path) -> Result<ServerHandle> {
    start_server_with_args(memory_file, &[]).await
}

fn text(res: &serde_json::Value) -> &str {
    res["result"]["content"][0]["text"].as_str().unwrap_or("")
}

fn structured(res: &serde_json::Value) -> &serde_json::Value {
    &res["result"]["structuredContent"]
}

fn assert_ok(res: &serde_json::Value) {
    assert!(res.get("error").is_none(), "unexpected error: {res}");
    assert!(!res["result"]["isError"].as_bool().unwrap_or(false));
}

fn assert_err(res: &serde_json::Value) {
    if let Some(err) = res.get("error") {
        assert!(err.is_object());
        return;
    }
    assert!(res["result"]["isError"].as_bool().unwrap_or(false));
}

#[tokio::test]
async fn tools_list_includes_all_tools() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    let tools = srv.request("tools/list", json!({})).await?;
    let names: Vec<_> = tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t.get("name").and_then(|v| v.as_str()))
        .collect();
    for required in [
        "create_entities",
        "create_relations",
        "add_observations",
        "search_nodes",
        "read_graph",
    ] {
        assert!(names.contains(&required), "missing tool {required}");
    }

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn create_entities_twice_creates_once() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;
    let args = json!({ "entities": [
        { "name": "Kim", "entityType": "Engineer", "observations": ["likes Python"] },
        { "name": "Acme", "entityType": "Company" }
    ]});

    let first = srv.call_tool("create_entities", args.clone()).await?;
    assert_ok(&first);
    assert_eq!(
        structured(&first)["created_entities"],
        json!(["Kim", "Acme"])
    );
    assert!(text(&first).contains("Kim, Acme"));

    let second = srv.call_tool("create_entities", args).await?;
    assert_ok(&second);
    assert_eq!(structured(&second)["created_entities"], json!([]));

    let graph = srv.call_tool("read_graph", json!({})).await?;
    assert_eq!(structured(&graph)["summary"]["total_entities"], 2);

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn relations_dedup_and_tolerate_dangling_endpoints() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    srv.call_tool(
        "create_entities",
        json!({ "entities": [{ "name": "Kim", "entityType": "Engineer" }] }),
    )
    .await?;

    let rels = json!({ "relations": [
        { "from": "Kim", "to": "Acme", "relationType": "works_at" },
        { "from": "Kim", "to": "Acme", "relationType": "works_at" }
    ]});
    let first = srv.call_tool("create_relations", rels.clone()).await?;
    assert_ok(&first);
    assert_eq!(
        structured(&first)["created_relations"],
        json!(["Kim -> works_at -> Acme"])
    );

    let second = srv.call_tool("create_relations", rels).await?;
    assert_eq!(structured(&second)["created_relations"], json!([]));

    let graph = srv.call_tool("read_graph", json!({})).await?;
    assert_eq!(
        structured(&graph)["relations"],
        json!([{ "from_entity": "Kim", "to_entity": "Acme", "relationType": "works_at" }])
    );

    // Acme is not an entity, so searching it finds nothing
    let acme = srv
        .call_tool("search_nodes", json!({ "query": "Acme" }))
        .await?;
    assert_eq!(structured(&acme)["total_matches"], 0);
    assert_eq!(structured(&acme)["related_relations"], json!([]));

    // ...while the relation surfaces through Kim
    let kim = srv
        .call_tool("search_nodes", json!({ "query": "kim" }))
        .await?;
    assert_eq!(structured(&kim)["total_matches"], 1);
    assert_eq!(
        structured(&kim)["related_relations"][0]["to_entity"],
        "Acme"
    );

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn add_observations_reports_unknown_entities() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    srv.call_tool(
        "create_entities",
        json!({ "entities": [{ "name": "Kim", "entityType": "Engineer", "observations": ["likes Python"] }] }),
    )
    .await?;

    let res = srv
        .call_tool(
            "add_observations",
            json!({ "observations": [
                { "entityName": "Kim", "contents": ["likes Python", "drinks tea"] },
                { "entityName": "Ghost", "contents": ["boo"] }
            ]}),
        )
        .await?;
    assert_ok(&res);
    assert_eq!(
        structured(&res)["added_observations"],
        json!([
            { "entityName": "Kim", "status": "added", "observations": ["drinks tea"] },
            { "entityName": "Ghost", "status": "entity_not_found" }
        ])
    );
    assert!(text(&res).contains("Ghost: entity not found"));

    let search = srv
        .call_tool("search_nodes", json!({ "query": "TEA" }))
        .await?;
    assert_eq!(
        structured(&search)["matched_entities"][0]["observations"],
        json!(["likes Python", "drinks tea"])
    );

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn graph_persists_across_restarts() -> Result<()> {
    let tmp = TempDir::new()?;
    let memory_file = tmp.path().join("memory.json");

    let srv = start_server(&memory_file).await?;
    srv.call_tool(
        "create_entities",
        json!({ "entities": [{ "name": "김철수", "entityType": "AI 개발자", "observations": ["Python을 좋아함"] }] }),
    )
    .await?;
    srv.call_tool(
        "create_relations",
        json!({ "relations": [{ "from": "김철수", "to": "삼성", "relationType": "works_at" }] }),
    )
    .await?;
    srv.kill().await;

    let raw = std::fs::read_to_string(&memory_file)?;
    assert!(raw.contains("김철수"));
    assert!(raw.contains("\"from_entity\""));

    let srv = start_server(&memory_file).await?;
    let graph = srv.call_tool("read_graph", json!({})).await?;
    assert_eq!(structured(&graph)["summary"]["total_entities"], 1);
    assert_eq!(structured(&graph)["summary"]["total_relations"], 1);
    assert_eq!(structured(&graph)["entities"][0]["entityType"], "AI 개발자");

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn malformed_memory_file_starts_empty() -> Result<()> {
    let tmp = TempDir::new()?;
    let memory_file = tmp.path().join("memory.json");
    std::fs::write(&memory_file, "{ this is not json")?;

    let srv = start_server(&memory_file).await?;
    let graph = srv.call_tool("read_graph", json!({})).await?;
    assert_ok(&graph);
    assert_eq!(structured(&graph)["summary"]["total_entities"], 0);

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn missing_required_field_is_rejected() -> Result<()> {
    let tmp = TempDir::new()?;
    let memory_file = tmp.path().join("memory.json");
    let srv = start_server(&memory_file).await?;

    let res = srv
        .call_tool(
            "create_entities",
            json!({ "entities": [{ "name": "Kim" }] }),
        )
        .await?;
    assert_err(&res);

    let res = srv
        .call_tool(
            "create_entities",
            json!({ "entities": [{ "name": "", "entityType": "Engineer" }] }),
        )
        .await?;
    assert_err(&res);

    let graph = srv.call_tool("read_graph", json!({})).await?;
    assert_eq!(structured(&graph)["summary"]["total_entities"], 0);

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn strict_policy_surfaces_save_failures() -> Result<()> {
    let tmp = TempDir::new()?;
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, "x")?;
    let memory_file = blocker.join("memory.json");

    let srv = start_server_with_args(&memory_file, &["--save-policy", "strict"]).await?;
    let res = srv
        .call_tool(
            "create_entities",
            json!({ "entities": [{ "name": "Kim", "entityType": "Engineer" }] }),
        )
        .await?;
    assert_err(&res);
    srv.kill().await;

    let srv = start_server(&memory_file).await?;
    let res = srv
        .call_tool(
            "create_entities",
            json!({ "entities": [{ "name": "Kim", "entityType": "Engineer" }] }),
        )
        .await?;
    assert_ok(&res);
    assert_eq!(structured(&res)["created_entities"], json!(["Kim"]));
    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn status_resource_reports_counts() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    srv.call_tool(
        "create_entities",
        json!({ "entities": [
            { "name": "Kim", "entityType": "Engineer" },
            { "name": "Lee", "entityType": "Scientist" }
        ]}),
    )
    .await?;

    let list = srv.request("resources/list", json!({})).await?;
    let uris: Vec<_> = list["result"]["resources"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["uri"].as_str())
        .collect();
    assert_eq!(uris, vec!["memory://current_status"]);

    let status = srv
        .request("resources/read", json!({ "uri": "memory://current_status" }))
        .await?;
    let body = status["result"]["contents"][0]["text"].as_str().unwrap_or("");
    assert!(body.contains("Stored entities: 2"));
    assert!(body.contains("Stored relations: 0"));
    assert!(body.contains("memory.json"));

    let unknown = srv
        .request("resources/read", json!({ "uri": "memory://nope" }))
        .await?;
    assert_err(&unknown);

    srv.kill().await;
    Ok(())
}
