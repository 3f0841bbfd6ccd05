//! Example: Adder Server
//!
//! A small arithmetic gateway demonstrating the basic surface:
//! - Tools with JSON Schemas the gateway enforces before dispatch
//! - Structured results via [`Content::json`]
//! - A static resource and a prompt
//!
//! Run with:
//! ```bash
//! cargo run --example adder_server
//! ```
//!
//! The server speaks newline-delimited JSON-RPC on stdin/stdout. Try:
//! ```json
//! {"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"manual","version":"0"}}}
//! {"jsonrpc":"2.0","method":"notifications/initialized"}
//! {"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"add_numbers","arguments":{"number1":5,"number2":3}}}
//! ```

use mcpgate::prelude::*;

/// Adds two numbers.
struct AddNumbers;

#[async_trait]
impl ToolHandler for AddNumbers {
    fn definition(&self) -> Tool {
        Tool {
            name: "add_numbers".to_owned(),
            description: Some("Adds two numbers and returns their sum".to_owned()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "number1": {"type": "number", "description": "First addend"},
                    "number2": {"type": "number", "description": "Second addend"}
                },
                "required": ["number1", "number2"]
            }),
        }
    }

    async fn call(&self, _cx: &RequestCx, arguments: Value) -> McpResult<Vec<Content>> {
        // Schema validation already guaranteed both fields are numbers.
        // Integer inputs get an integer sum.
        let result = match (
            arguments["number1"].as_i64(),
            arguments["number2"].as_i64(),
        ) {
            (Some(a), Some(b)) => json!(a + b),
            _ => {
                let a = arguments["number1"].as_f64().unwrap_or(0.0);
                let b = arguments["number2"].as_f64().unwrap_or(0.0);
                json!(a + b)
            }
        };
        Ok(vec![Content::json(&json!({ "result": result }))])
    }
}

/// Multiplies two numbers.
struct Multiply;

#[async_trait]
impl ToolHandler for Multiply {
    fn definition(&self) -> Tool {
        Tool {
            name: "multiply".to_owned(),
            description: Some("Multiplies two numbers".to_owned()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "number1": {"type": "number"},
                    "number2": {"type": "number"}
                },
                "required": ["number1", "number2"]
            }),
        }
    }

    async fn call(&self, _cx: &RequestCx, arguments: Value) -> McpResult<Vec<Content>> {
        let a = arguments["number1"].as_f64().unwrap_or(0.0);
        let b = arguments["number2"].as_f64().unwrap_or(0.0);
        Ok(vec![Content::json(&json!({ "result": a * b }))])
    }
}

/// Usage notes served as a static resource.
struct UsageGuide;

#[async_trait]
impl ResourceHandler for UsageGuide {
    fn definition(&self) -> Resource {
        Resource {
            uri: "guide://adder".to_owned(),
            name: "Adder usage guide".to_owned(),
            description: Some("How to call the arithmetic tools".to_owned()),
            mime_type: Some("text/plain".to_owned()),
        }
    }

    async fn read(
        &self,
        _cx: &RequestCx,
        uri: &str,
        _params: &UriParams,
    ) -> McpResult<Vec<ResourceContent>> {
        Ok(vec![ResourceContent::text(
            uri,
            "Call add_numbers or multiply with {\"number1\": <number>, \"number2\": <number>}. \
             Results come back as JSON text: {\"result\": <number>}.",
        )])
    }
}

/// Prompt asking the model to add two numbers and show its work.
struct ShowWork;

#[async_trait]
impl PromptHandler for ShowWork {
    fn definition(&self) -> Prompt {
        Prompt {
            name: "show_work".to_owned(),
            description: Some("Add two numbers step by step".to_owned()),
            arguments: vec![
                PromptArgument {
                    name: "number1".to_owned(),
                    description: Some("First addend".to_owned()),
                    required: true,
                },
                PromptArgument {
                    name: "number2".to_owned(),
                    description: Some("Second addend".to_owned()),
                    required: true,
                },
            ],
        }
    }

    async fn get(
        &self,
        _cx: &RequestCx,
        arguments: std::collections::HashMap<String, String>,
    ) -> McpResult<Vec<PromptMessage>> {
        let a = arguments.get("number1").map_or("?", String::as_str);
        let b = arguments.get("number2").map_or("?", String::as_str);
        Ok(vec![PromptMessage::user(format!(
            "Add {a} and {b}. Show each step of the calculation."
        ))])
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    Server::new("adder-server", "1.0.0")
        // Tools
        .tool(AddNumbers)
        .tool(Multiply)
        // Resources
        .resource(UsageGuide)
        // Prompts
        .prompt(ShowWork)
        // Config
        .request_timeout(30)
        .instructions(
            "An arithmetic server. Call 'add_numbers' or 'multiply' with two numbers; \
             read 'guide://adder' for usage notes.",
        )
        .build()
        .run_stdio()
        .await?;
    Ok(())
}
