use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::bot::{BotReply, SixSixBot};

/// Line-delimited JSON-RPC over stdio, one request per line.
pub struct BotServer {
    bot: SixSixBot,
}

impl BotServer {
    pub fn new(bot: SixSixBot) -> Self {
        BotServer { bot }
    }

    pub async fn run(&self) -> Result<()> {
        let mut lines = BufReader::new(io::stdin()).lines();
        let mut stdout = io::stdout();

        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request = match serde_json::from_str::<Value>(trimmed) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "dropping malformed request");
                    continue;
                }
            };

            let response = self.handle_request(request);
            let response_str = serde_json::to_string(&response)?;
            stdout.write_all(response_str.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        Ok(())
    }

    pub fn handle_request(&self, request: Value) -> Value {
        let method = request["method"].as_str().unwrap_or("");
        let id = request["id"].clone();
        debug!(method, "request");

        match method {
            "initialize" => self.handle_initialize(id),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(&request, id),
            _ => self.handle_unknown_method(id),
        }
    }

    fn handle_initialize(&self, id: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "sixsixbot",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }
        })
    }

    fn handle_tools_list(&self, id: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": available_tools()
            }
        })
    }

    fn handle_tools_call(&self, request: &Value, id: Value) -> Value {
        let tool_name = request["params"]["name"].as_str().unwrap_or("");
        let arguments = &request["params"]["arguments"];

        let result = self.execute_tool(tool_name, arguments);

        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "content": [{
                    "type": "text",
                    "text": result.to_string()
                }]
            }
        })
    }

    pub fn execute_tool(&self, tool_name: &str, arguments: &Value) -> Value {
        let arg = |key: &str| arguments[key].as_str().unwrap_or("");
        let caller = arguments["caller"].as_str();

        let reply = match tool_name {
            "checkin" => Some(self.bot.checkin(arg("user"))),
            "say" => self.bot.on_message(arg("user"), arg("text")),
            "message" => self.bot.handle(arg("user"), arg("text")),
            "profile" => Some(self.bot.profile(arg("target"))),
            "add_nickname" => Some(self.bot.add_nickname(arg("name"), arg("nickname"))),
            "add_catchphrase" => {
                Some(self.bot.add_catchphrase(arg("idol"), arg("trigger"), arg("response")))
            }
            "list_nicknames" => Some(self.bot.list_nicknames(arg("target"))),
            "list_catchphrases" => Some(self.bot.list_catchphrases()),
            "auth" => Some(self.bot.auth(caller, arg("user"))),
            "rauth" => Some(self.bot.rauth(caller, arg("user"))),
            "reset_today" => Some(self.bot.reset_today(caller)),
            _ => {
                return json!({
                    "success": false,
                    "error": format!("Unknown tool: {}", tool_name)
                })
            }
        };

        reply_json(reply)
    }

    fn handle_unknown_method(&self, id: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": -32601,
                "message": "Method not found"
            }
        })
    }
}

fn reply_json(reply: Option<BotReply>) -> Value {
    json!({
        "success": true,
        "reply": reply
    })
}

fn tool(name: &str, description: &str, params: &[(&str, &str)], required: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = params
        .iter()
        .map(|(param, desc)| {
            (
                param.to_string(),
                json!({ "type": "string", "description": desc }),
            )
        })
        .collect();

    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required
        }
    })
}

pub fn available_tools() -> Vec<Value> {
    const CALLER: (&str, &str) = ("caller", "User issuing the command; omit for the local operator");

    vec![
        tool("checkin", "Daily check-in: draw today's idol for a user", &[("user", "User id")], &["user"]),
        tool(
            "say",
            "Match a plain group message against the catchphrase rules",
            &[("user", "Sender id"), ("text", "Message text")],
            &["user", "text"],
        ),
        tool(
            "message",
            "Handle a raw chat line, either a /command or a plain message",
            &[("user", "Sender id"), ("text", "Chat line")],
            &["user", "text"],
        ),
        tool("profile", "Show an idol's profile card", &[("target", "Name or nickname")], &["target"]),
        tool(
            "add_nickname",
            "Register an idol if needed and add a nickname",
            &[("name", "Canonical name"), ("nickname", "Nickname to add")],
            &["name", "nickname"],
        ),
        tool(
            "add_catchphrase",
            "Add a trigger/response pair to an idol",
            &[
                ("idol", "Name or nickname"),
                ("trigger", "Trigger phrase"),
                ("response", "Reply text"),
            ],
            &["idol", "trigger", "response"],
        ),
        tool("list_nicknames", "List an idol's nicknames", &[("target", "Name or nickname")], &["target"]),
        tool("list_catchphrases", "List every trigger and its idol", &[], &[]),
        tool("auth", "Grant admin rights", &[("user", "User id"), CALLER], &["user"]),
        tool("rauth", "Revoke admin rights", &[("user", "User id"), CALLER], &["user"]),
        tool("reset_today", "Clear today's check-ins", &[CALLER], &[]),
    ]
}
