use std::path::PathBuf;
use std::time::SystemTime;

use clap::Parser;
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        AnnotateAble, CallToolResult, Content, Implementation, ListResourcesResult,
        PaginatedRequestParam, RawResource, ReadResourceRequestParam, ReadResourceResult,
        ResourceContents, ServerCapabilities, ServerInfo,
    },
    serde::{Deserialize, Serialize},
    service::RequestContext,
    tool, tool_handler, tool_router,
    transport::stdio,
};
use schemars::JsonSchema;
use serde_json::json;
use tracing::{info, warn};

use crate::tools::memory::{
    Entity, KnowledgeGraphManager, MemoryConfig, MemoryError, ObservationInput, RelationInput,
};

mod format;
mod logging;
mod tools;

use logging::{TransportMode, init_logging};

const STATUS_URI: &str = "memory://current_status";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Knowledge graph file (default: memory.json, or MEMORY_FILE_PATH)
    #[arg(short = 'm', long = "memory-file", value_name = "FILE")]
    memory_file: Option<PathBuf>,

    /// Behavior when saving the graph fails: "lossy" (log and continue) or "strict" (fail the call)
    #[arg(long, value_name = "POLICY")]
    save_policy: Option<String>,

    /// Enable streamable HTTP mode (default: stdio)
    #[arg(short = 's', long = "stream")]
    stream_mode: bool,

    /// HTTP port for stream mode
    #[arg(short = 'p', long, default_value = "8084")]
    port: u16,

    /// Bind address for stream mode
    #[arg(short = 'b', long, default_value = "127.0.0.1")]
    bind: String,

    /// Enable file logging. Optionally specify log file name (default: memory-graph-mcp.log)
    #[arg(short = 'l', long, value_name = "FILE", num_args = 0..=1, default_missing_value = "memory-graph-mcp.log")]
    log: Option<String>,
}

#[derive(Clone)]
struct MemoryServer {
    memory: KnowledgeGraphManager,
    tool_router: ToolRouter<Self>,
}

impl MemoryServer {
    fn new(memory: KnowledgeGraphManager) -> Self {
        Self {
            memory,
            tool_router: Self::tool_router(),
        }
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "memory-graph-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                website_url: None,
                icons: None,
            },
            instructions: Some(
                "Knowledge graph memory: store entities, relations between them and \
                 observations about them, then search or read the whole graph."
                    .to_string(),
            ),
        }
    }

    async fn status_text(&self) -> String {
        let summary = self.memory.summary().await;
        format::status(
            &summary,
            self.memory.storage_path(),
            &humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct CreateEntitiesArgs {
    /// Entities to create; each has name, entityType and optional observations
    entities: Vec<Entity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct CreateRelationsArgs {
    /// Relations to create; each has from, to and relationType
    relations: Vec<RelationInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct AddObservationsArgs {
    /// Observations to add; each has entityName and contents
    observations: Vec<ObservationInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct SearchNodesArgs {
    /// Case-insensitive text matched against entity names, types and observations
    query: String,
}

#[tool_router]
impl MemoryServer {
    #[tool(
        name = "create_entities",
        description = "Create new entities in the knowledge graph. Each entity has a unique name, an entityType and optional observations. Names that already exist are skipped."
    )]
    async fn create_entities(
        &self,
        Parameters(CreateEntitiesArgs { entities }): Parameters<CreateEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let created = self
            .memory
            .create_entities(entities)
            .await
            .map_err(memory_err)?;
        Ok(
            CallToolResult::success(vec![Content::text(format::created_entities(&created))])
                .with_structured(json!({ "created_entities": created })),
        )
    }

    #[tool(
        name = "create_relations",
        description = "Create directed relations between entities (from, to, relationType). Use active voice for relationType. Exact duplicates are skipped; endpoints do not have to exist yet."
    )]
    async fn create_relations(
        &self,
        Parameters(CreateRelationsArgs { relations }): Parameters<CreateRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let created = self
            .memory
            .create_relations(relations)
            .await
            .map_err(memory_err)?;
        Ok(
            CallToolResult::success(vec![Content::text(format::created_relations(&created))])
                .with_structured(json!({ "created_relations": created })),
        )
    }

    #[tool(
        name = "add_observations",
        description = "Add observations to existing entities. Observations an entity already has are skipped; unknown entities are reported per item."
    )]
    async fn add_observations(
        &self,
        Parameters(AddObservationsArgs { observations }): Parameters<AddObservationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let results = self
            .memory
            .add_observations(observations)
            .await
            .map_err(memory_err)?;
        Ok(
            CallToolResult::success(vec![Content::text(format::added_observations(&results))])
                .with_structured(json!({ "added_observations": results })),
        )
    }

    #[tool(
        name = "search_nodes",
        description = "Search entities by case-insensitive substring over name, entityType and observations. Returns matching entities and the relations touching them."
    )]
    async fn search_nodes(
        &self,
        Parameters(SearchNodesArgs { query }): Parameters<SearchNodesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self.memory.search_nodes(&query).await;
        let structured = serde_json::to_value(&result)
            .map_err(internal_err("Failed to serialize search result"))?;
        Ok(
            CallToolResult::success(vec![Content::text(format::search_result(&result))])
                .with_structured(structured),
        )
    }

    #[tool(
        name = "read_graph",
        description = "Read the entire knowledge graph: all entities, all relations and a summary."
    )]
    async fn read_graph(&self) -> Result<CallToolResult, McpError> {
        let snapshot = self.memory.read_graph().await;
        let structured = serde_json::to_value(&snapshot)
            .map_err(internal_err("Failed to serialize graph"))?;
        Ok(
            CallToolResult::success(vec![Content::text(format::graph_snapshot(&snapshot))])
                .with_structured(structured),
        )
    }
}

#[tool_handler]
impl ServerHandler for MemoryServer {
    fn get_info(&self) -> ServerInfo {
        self.server_info()
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let mut status = RawResource::new(STATUS_URI, "current_status".to_string());
        status.description = Some("Current time, entity/relation counts and memory file".into());
        status.mime_type = Some("text/plain".into());
        Ok(ListResourcesResult::with_all_items(vec![status.no_annotation()]))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        if request.uri != STATUS_URI {
            return Err(McpError::resource_not_found(
                "Unknown resource",
                Some(json!({ "uri": request.uri })),
            ));
        }
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(self.status_text().await, STATUS_URI)],
        })
    }
}

/// Run server in stdio mode (default)
async fn run_stdio_mode(server: MemoryServer) -> Result<(), Box<dyn std::error::Error>> {
    let transport = stdio();
    let svc = server.serve(transport).await?;
    svc.waiting().await?;
    Ok(())
}

/// Run server in streamable HTTP mode
async fn run_stream_mode(
    server: MemoryServer,
    bind: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    use rmcp::transport::StreamableHttpService;
    use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;

    let addr = format!("{}:{}", bind, port);
    info!("Starting MCP HTTP server on http://{}/mcp", addr);

    // Every session gets a clone; they all share one graph
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new()
        .nest_service("/mcp", service)
        .route("/health", axum::routing::get(|| async { "OK" }));

    let tcp_listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional env files, read before clap so env defaults see them
    let _ = dotenv::from_filename("env");
    let _ = dotenv::dotenv();

    let args = Args::parse();

    let mode = if args.stream_mode {
        TransportMode::Stream
    } else {
        TransportMode::Stdio
    };

    // stdio mode MUST NOT log to stderr: it breaks the client handshake
    init_logging(mode, args.log)?;

    let config = MemoryConfig::load(args.memory_file, args.save_policy.as_deref());
    info!(
        "Memory file {} (save policy: {})",
        config.storage_path.display(),
        config.save_policy.as_str()
    );
    let memory = KnowledgeGraphManager::open(&config).await;
    let server = MemoryServer::new(memory);

    match mode {
        TransportMode::Stdio => run_stdio_mode(server).await,
        TransportMode::Stream => run_stream_mode(server, &args.bind, args.port).await,
    }
}

fn internal_err<T: ToString>(message: &'static str) -> impl FnOnce(T) -> McpError + Clone {
    move |err| McpError::internal_error(message, Some(json!({ "error": err.to_string() })))
}

fn memory_err(err: MemoryError) -> McpError {
    match &err {
        MemoryError::InvalidInput { field, .. } => {
            McpError::invalid_params(err.to_string(), Some(json!({ "field": field })))
        }
        MemoryError::Persistence { path, source } => {
            warn!("{}: {:#}", err, source);
            McpError::internal_error(
                "Failed to persist memory graph",
                Some(json!({ "path": path.display().to_string(), "error": format!("{:#}", source) })),
            )
        }
    }
}

trait WithStructured {
    fn with_structured(self, value: serde_json::Value) -> Self;
}

impl WithStructured for CallToolResult {
    fn with_structured(mut self, value: serde_json::Value) -> Self {
        self.structured_content = Some(value);
        self
    }
}
