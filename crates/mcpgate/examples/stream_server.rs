//! Example: Countdown Server
//!
//! A WebSocket gateway demonstrating streamed tool output:
//! - `countdown` emits one chunk per number as it counts down, then a
//!   Done event carrying a summary
//! - On a transport without text streaming the same tool answers with
//!   one buffered result instead
//!
//! Run with:
//! ```bash
//! cargo run --example stream_server
//! ```
//!
//! Then connect with [`mcpgate::Client`] over
//! `WsTransport::connect("ws://127.0.0.1:9100")` and call the tool via
//! `call_stream`.

use std::sync::Arc;
use std::time::Duration;

use mcpgate::prelude::*;
use tokio::net::TcpListener;

/// Counts down from a starting number, one streamed chunk per step.
struct Countdown;

#[async_trait]
impl ToolHandler for Countdown {
    fn definition(&self) -> Tool {
        Tool {
            name: "countdown".to_owned(),
            description: Some("Counts down to zero, streaming one chunk per step".to_owned()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "from": {"type": "integer", "minimum": 1, "maximum": 100}
                },
                "required": ["from"]
            }),
        }
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn call(&self, cx: &RequestCx, arguments: Value) -> McpResult<Vec<Content>> {
        // Buffered fallback for transports without text streaming.
        let from = arguments["from"].as_i64().unwrap_or(1);
        cx.checkpoint()?;
        let steps: Vec<String> = (0..=from).rev().map(|n| n.to_string()).collect();
        Ok(vec![Content::text(steps.join(" "))])
    }

    async fn call_stream(
        &self,
        cx: &RequestCx,
        arguments: Value,
        stream: &mut StreamProducer,
    ) -> McpResult<()> {
        let from = arguments["from"].as_i64().unwrap_or(1);
        stream.start()?;
        for n in (0..=from).rev() {
            cx.checkpoint()?;
            stream.send(json!({ "value": n }))?;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        stream.done(Some(json!({ "count": from + 1 })))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Arc::new(
        Server::new("countdown-server", "1.0.0")
            .tool(Countdown)
            // Streams run at their own pace; no per-request deadline.
            .request_timeout(0)
            .instructions("Call 'countdown' with {\"from\": 5} and watch the chunks arrive.")
            .logging(LoggingConfig::default())
            .build(),
    );

    let listener = TcpListener::bind("127.0.0.1:9100").await?;
    println!("listening on ws://{}", listener.local_addr()?);
    server.serve_ws(listener).await?;
    Ok(())
}
